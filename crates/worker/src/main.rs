//! Widget store background worker
//!
//! Re-sends invoice requests left in the outbox and prunes delivered rows.

mod invoice_processor;

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use widgetstore_checkout::{HttpInvoiceClient, InvoiceConfig, InvoiceDispatcher};
use widgetstore_shared::{create_pool, PgRepository};

use crate::invoice_processor::{cleanup_sent_invoices, process_pending_invoices};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("widgetstore_worker=info,widgetstore_checkout=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let retry_cron =
        env::var("INVOICE_RETRY_CRON").unwrap_or_else(|_| "0 */5 * * * *".to_string());
    let cleanup_cron =
        env::var("INVOICE_CLEANUP_CRON").unwrap_or_else(|_| "0 0 3 * * *".to_string());
    let batch_size: i64 = env_or("INVOICE_RETRY_BATCH", 10);
    let retry_after_secs: i64 = env_or("INVOICE_RETRY_AFTER_SECS", 300);
    let retention_days: i32 = env_or("INVOICE_RETENTION_DAYS", 30);

    let pool = create_pool(&database_url, env_or("DATABASE_MAX_CONNECTIONS", 5))
        .await
        .context("Failed to connect to database")?;
    let repository = Arc::new(PgRepository::with_timeout(
        pool,
        Duration::from_secs(env_or("REPOSITORY_TIMEOUT_SECS", 3)),
    ));

    let invoice_config = InvoiceConfig::from_env();
    let dispatcher = Arc::new(InvoiceDispatcher::new(
        Arc::new(HttpInvoiceClient::new(&invoice_config)),
        repository,
        invoice_config,
    ));

    let scheduler = JobScheduler::new()
        .await
        .context("Failed to create scheduler")?;

    let retry_dispatcher = dispatcher.clone();
    scheduler
        .add(Job::new_async(retry_cron.as_str(), move |_id, _scheduler| {
            let dispatcher = retry_dispatcher.clone();
            Box::pin(async move {
                process_pending_invoices(&dispatcher, batch_size, retry_after_secs).await;
            })
        })?)
        .await?;

    let cleanup_dispatcher = dispatcher.clone();
    scheduler
        .add(Job::new_async(cleanup_cron.as_str(), move |_id, _scheduler| {
            let dispatcher = cleanup_dispatcher.clone();
            Box::pin(async move {
                cleanup_sent_invoices(&dispatcher, retention_days).await;
            })
        })?)
        .await?;

    scheduler.start().await.context("Failed to start scheduler")?;
    tracing::info!(
        retry_cron = %retry_cron,
        cleanup_cron = %cleanup_cron,
        "Invoice worker started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down invoice worker");

    Ok(())
}
