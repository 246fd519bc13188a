use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use taskqueue::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "taskqueue-demo")]
#[command(about = "Send simulated emails through a bounded worker pool", long_about = None)]
struct Args {
    /// Number of emails to submit
    #[arg(short, long, default_value_t = 5, env = "DEMO_EMAILS")]
    emails: u32,

    /// Simulated delivery latency in milliseconds
    #[arg(long, default_value_t = 1000, env = "DEMO_LATENCY_MS")]
    latency_ms: u64,

    /// Seconds to wait for the backlog to drain before stopping
    #[arg(long, default_value_t = 15)]
    wait_secs: u64,

    /// Do not submit the item that always fails
    #[arg(long)]
    no_failure: bool,
}

#[derive(Debug)]
struct EmailPayload {
    to: String,
    subject: String,
    body: String,
}

struct SendEmail {
    latency: Duration,
}

#[async_trait]
impl Executable<EmailPayload> for SendEmail {
    async fn execute(
        &self,
        email: Arc<EmailPayload>,
        cancel: CancellationToken,
    ) -> Result<(), TaskError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            body = %email.body,
            "Sending email"
        );
        tokio::select! {
            _ = cancel.cancelled() => Err(TaskError::Cancelled),
            _ = tokio::time::sleep(self.latency) => {
                tracing::info!(to = %email.to, "Email sent");
                Ok(())
            }
        }
    }
}

struct BouncingEmail;

#[async_trait]
impl Executable<EmailPayload> for BouncingEmail {
    async fn execute(
        &self,
        email: Arc<EmailPayload>,
        cancel: CancellationToken,
    ) -> Result<(), TaskError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TaskError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                Err(TaskError::msg(format!("mailbox {} does not exist", email.to)))
            }
        }
    }
}

fn log_event(event: QueueEvent<EmailPayload>) {
    let item_id = event.item_id();
    let priority = event.item.priority;
    match event.kind {
        EventKind::Enqueued => tracing::info!(%item_id, priority, "[enqueued]"),
        EventKind::Started => tracing::info!(%item_id, priority, "[started]"),
        EventKind::Retrying {
            attempt,
            delay,
            error,
        } => tracing::info!(
            %item_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            %error,
            "[retrying]"
        ),
        EventKind::Completed => tracing::info!(%item_id, "[completed]"),
        EventKind::Failed { error } => tracing::info!(%item_id, %error, "[failed]"),
        EventKind::Cancelled => tracing::info!(%item_id, "[cancelled]"),
    }
}

async fn wait_until_drained(pool: &WorkerPool<EmailPayload>, submitted: u64) {
    while pool.stats().finished() < submitted {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskqueue=debug,taskqueue_demo=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = WorkerPoolConfig::from_env().context("Invalid TASKQUEUE_* configuration")?;
    tracing::info!(
        max_concurrency = config.max_concurrency,
        max_queue_size = config.max_queue_size,
        retry_count = config.retry_count,
        "taskqueue-demo starting..."
    );

    let pool = WorkerPool::new(config).context("Failed to create worker pool")?;
    let listener = pool.events().listen(log_event);

    let cancel = CancellationToken::new();
    pool.start(&cancel)?;

    let sender = Arc::new(SendEmail {
        latency: Duration::from_millis(args.latency_ms),
    });
    let mut submitted = 0u64;
    for i in 0..args.emails {
        let email = EmailPayload {
            to: format!("user{i}@test.com"),
            subject: "Hello".to_string(),
            body: "This is a test message".to_string(),
        };
        match pool.submit(Arc::clone(&sender), email, i as i32).await {
            Ok(_) => submitted += 1,
            Err(e) => tracing::warn!(error = %e, "Email rejected"),
        }
    }

    if !args.no_failure {
        let bounce = EmailPayload {
            to: "nobody@invalid.test".to_string(),
            subject: "Undeliverable".to_string(),
            body: "This one always fails".to_string(),
        };
        match pool.submit(BouncingEmail, bounce, 0).await {
            Ok(_) => submitted += 1,
            Err(e) => tracing::warn!(error = %e, "Email rejected"),
        }
    }

    tracing::info!(submitted, "Emails queued, waiting for processing...");

    tokio::select! {
        _ = wait_until_drained(&pool, submitted) => {
            tracing::info!("All emails processed");
        }
        _ = tokio::time::sleep(Duration::from_secs(args.wait_secs)) => {
            tracing::warn!(wait_secs = args.wait_secs, "Stopping before the backlog drained");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    pool.stop().await;
    listener.abort();

    let stats = serde_json::to_string_pretty(&pool.stats())?;
    tracing::info!("Worker pool stopped\n{stats}");
    Ok(())
}
