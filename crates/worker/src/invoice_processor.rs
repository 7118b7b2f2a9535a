//! Invoice Outbox Processor
//!
//! Re-drives invoice requests that the checkout path could not deliver and
//! prunes rows that were delivered.

use tracing::{error, info, warn};
use widgetstore_checkout::InvoiceDispatcher;

/// Outcome of one pass over the outbox
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Claim due outbox rows and make one delivery attempt for each
pub async fn process_pending_invoices(
    dispatcher: &InvoiceDispatcher,
    batch_size: i64,
    retry_after_secs: i64,
) -> BatchReport {
    let entries = match dispatcher
        .outbox()
        .claim_retryable_invoices(batch_size, retry_after_secs)
        .await
    {
        Ok(entries) => entries,
        Err(e) => {
            error!(error = %e, "Failed to claim invoices from outbox");
            return BatchReport::default();
        }
    };

    let mut report = BatchReport {
        claimed: entries.len(),
        ..BatchReport::default()
    };
    if entries.is_empty() {
        return report;
    }

    info!(count = entries.len(), "Processing invoices from outbox");

    for entry in entries {
        match dispatcher.redeliver(&entry).await {
            Ok(()) => {
                report.delivered += 1;
                info!(
                    outbox_id = entry.id,
                    order_id = entry.order_id,
                    "Invoice delivered"
                );
            }
            Err(e) => {
                report.failed += 1;
                let attempts = entry.attempts + 1;
                if !e.is_transient() {
                    error!(
                        outbox_id = entry.id,
                        order_id = entry.order_id,
                        attempts = attempts,
                        error = %e,
                        "Invoice rejected by invoicing service"
                    );
                } else if attempts >= entry.max_attempts {
                    error!(
                        outbox_id = entry.id,
                        order_id = entry.order_id,
                        attempts = attempts,
                        error = %e,
                        "Invoice permanently failed after max retries"
                    );
                } else {
                    warn!(
                        outbox_id = entry.id,
                        order_id = entry.order_id,
                        attempts = attempts,
                        max_attempts = entry.max_attempts,
                        error = %e,
                        "Invoice delivery failed, will retry"
                    );
                }
            }
        }
    }

    report
}

/// Delete delivered outbox rows past retention (maintenance job)
pub async fn cleanup_sent_invoices(dispatcher: &InvoiceDispatcher, retention_days: i32) -> u64 {
    match dispatcher.outbox().purge_sent_invoices(retention_days).await {
        Ok(deleted) => {
            if deleted > 0 {
                info!(
                    deleted = deleted,
                    retention_days = retention_days,
                    "Cleaned up sent invoice outbox entries"
                );
            }
            deleted
        }
        Err(e) => {
            error!(error = %e, "Failed to cleanup sent invoices");
            0
        }
    }
}
