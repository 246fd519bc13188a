//! Work items and the executable capability
//!
//! This module provides:
//! - [`QueuedItem`] - A unit of work with its payload and executable
//! - [`Executable`] - The single capability callers implement
//! - [`TaskError`] - Outcome of one execution attempt

mod error;
mod executable;
mod item;

pub use error::TaskError;
pub use executable::{from_fn, Executable, FnExecutable};
pub use item::{ItemId, ItemSnapshot, QueuedItem};
