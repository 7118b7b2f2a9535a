//! Invoice issuance
//!
//! Invoices are requested from a separate invoicing service over HTTP. A
//! failed request never undoes a checkout: the dispatcher retries a bounded
//! number of times, leaves a durable outbox row behind, and reports the error
//! so the caller can surface a warning. Transient failures keep a separate
//! budget of worker attempts on the row; rejections by the service are final.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use widgetstore_shared::{InvoiceOutbox, InvoiceOutboxEntry, RepositoryError};

/// Default invoicing endpoint
pub const DEFAULT_INVOICE_SERVICE_URL: &str = "http://localhost:4002/v1/invoice/create-and-send";

/// Default per-attempt timeout (5 seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of delivery attempts per dispatch
const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Default number of retry worker attempts after the inline ones
const DEFAULT_WORKER_MAX_ATTEMPTS: usize = 5;

/// Initial backoff between attempts (100ms)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Maximum backoff between attempts (2 seconds)
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Invoice payload understood by the invoicing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    /// Order id
    pub id: i64,
    pub quantity: i32,
    pub amount: i64,
    pub product: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum InvoiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invoice service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invoice request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid invoice payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl InvoiceError {
    /// Returns true if this error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            InvoiceError::Http(_) => true,
            InvoiceError::Timeout(_) => true,
            InvoiceError::Status { status, .. } => *status == 429 || *status >= 500,
            InvoiceError::Payload(_) => false,
        }
    }
}

#[async_trait]
pub trait InvoiceClient: Send + Sync {
    async fn request_invoice(&self, request: &InvoiceRequest) -> Result<(), InvoiceError>;
}

/// Invoice delivery settings
#[derive(Debug, Clone)]
pub struct InvoiceConfig {
    pub service_url: String,
    /// Timeout for a single delivery attempt
    pub timeout: Duration,
    /// Attempts made inline before the outbox row is left for the retry worker
    pub max_attempts: usize,
    /// Further attempts the retry worker may make on a transient failure
    pub worker_max_attempts: usize,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_INVOICE_SERVICE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            worker_max_attempts: DEFAULT_WORKER_MAX_ATTEMPTS,
            retry_base_delay: RETRY_BASE_DELAY,
            retry_max_delay: RETRY_MAX_DELAY,
        }
    }
}

impl InvoiceConfig {
    /// Create config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_url: std::env::var("INVOICE_SERVICE_URL").unwrap_or(defaults.service_url),
            timeout: std::env::var("INVOICE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_attempts: std::env::var("INVOICE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|attempts: &usize| *attempts > 0)
                .unwrap_or(defaults.max_attempts),
            worker_max_attempts: std::env::var("INVOICE_WORKER_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.worker_max_attempts),
            ..defaults
        }
    }
}

/// Posts invoice requests as JSON to the invoicing service
#[derive(Clone)]
pub struct HttpInvoiceClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpInvoiceClient {
    pub fn new(config: &InvoiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.service_url.clone(),
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl InvoiceClient for HttpInvoiceClient {
    async fn request_invoice(&self, request: &InvoiceRequest) -> Result<(), InvoiceError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InvoiceError::Timeout(self.timeout)
                } else {
                    InvoiceError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvoiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // The response body carries nothing we use
        Ok(())
    }
}

/// Sends invoice requests with bounded retry and records each one in the outbox
#[derive(Clone)]
pub struct InvoiceDispatcher {
    client: Arc<dyn InvoiceClient>,
    outbox: Arc<dyn InvoiceOutbox>,
    config: InvoiceConfig,
}

impl InvoiceDispatcher {
    pub fn new(
        client: Arc<dyn InvoiceClient>,
        outbox: Arc<dyn InvoiceOutbox>,
        config: InvoiceConfig,
    ) -> Self {
        Self {
            client,
            outbox,
            config,
        }
    }

    pub fn config(&self) -> &InvoiceConfig {
        &self.config
    }

    pub fn outbox(&self) -> &Arc<dyn InvoiceOutbox> {
        &self.outbox
    }

    /// One delivery attempt bounded by the configured timeout
    pub async fn deliver_once(&self, request: &InvoiceRequest) -> Result<(), InvoiceError> {
        match tokio::time::timeout(self.config.timeout, self.client.request_invoice(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(InvoiceError::Timeout(self.config.timeout)),
        }
    }

    /// Records a pending outbox row, then delivers with exponential backoff.
    ///
    /// The row ends `sent`, `rejected` when the service refused the invoice, or
    /// `failed` with the worker's attempts still ahead of it.
    pub async fn dispatch(&self, request: &InvoiceRequest) -> Result<(), InvoiceError> {
        let outbox_id = match self.record_pending(request).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(
                    order_id = %request.id,
                    error = %e,
                    "Failed to record pending invoice - delivering without outbox entry"
                );
                None
            }
        };

        let retry_strategy = ExponentialBackoff::from_millis(
            self.config.retry_base_delay.as_millis() as u64,
        )
        .max_delay(self.config.retry_max_delay)
        .take(self.config.max_attempts.saturating_sub(1))
        .map(jitter);

        let attempts = AtomicI32::new(0);
        let result = RetryIf::spawn(
            retry_strategy,
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.deliver_once(request)
            },
            |e: &InvoiceError| {
                tracing::debug!(order_id = %request.id, error = %e, "Invoice attempt failed");
                e.is_transient()
            },
        )
        .await;
        let attempts = attempts.load(Ordering::Relaxed);

        match &result {
            Ok(()) => {
                tracing::info!(order_id = %request.id, attempts = attempts, "Invoice requested");
            }
            Err(e) if e.is_transient() && outbox_id.is_some() => {
                tracing::warn!(
                    order_id = %request.id,
                    attempts = attempts,
                    error = %e,
                    "Invoice request failed - left for retry worker"
                );
            }
            Err(e) => {
                tracing::error!(
                    order_id = %request.id,
                    attempts = attempts,
                    error = %e,
                    "Invoice request failed - not retried"
                );
            }
        }

        if let Some(id) = outbox_id {
            self.record_outcome(id, attempts, &result).await;
        }

        result
    }

    /// Single attempt for an outbox row claimed by the retry worker
    pub async fn redeliver(&self, entry: &InvoiceOutboxEntry) -> Result<(), InvoiceError> {
        let result = match serde_json::from_value::<InvoiceRequest>(entry.payload.clone()) {
            Ok(request) => self.deliver_once(&request).await,
            Err(e) => Err(InvoiceError::Payload(e)),
        };
        self.record_outcome(entry.id, 1, &result).await;
        result
    }

    async fn record_pending(&self, request: &InvoiceRequest) -> Result<i64, RepositoryError> {
        let payload = serde_json::to_value(request)?;
        let budget = self
            .config
            .max_attempts
            .saturating_add(self.config.worker_max_attempts);
        let max_attempts = i32::try_from(budget).unwrap_or(i32::MAX);
        self.outbox
            .record_pending_invoice(request.id, payload, max_attempts)
            .await
    }

    async fn record_outcome(&self, id: i64, attempts: i32, result: &Result<(), InvoiceError>) {
        let update = match result {
            Ok(()) => self.outbox.mark_invoice_sent(id, attempts).await,
            Err(e) if e.is_transient() => {
                self.outbox
                    .mark_invoice_failed(id, attempts, &e.to_string())
                    .await
            }
            Err(e) => {
                self.outbox
                    .mark_invoice_rejected(id, attempts, &e.to_string())
                    .await
            }
        };

        if let Err(e) = update {
            tracing::error!(outbox_id = %id, error = %e, "Failed to update invoice outbox");
        }
    }
}
