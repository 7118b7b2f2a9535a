//! Checkout error types

use serde::Serialize;
use thiserror::Error;
use widgetstore_shared::{OrderStatus, PersistStage, RepositoryError};

/// Shown for every failure that is not a card decline
pub const GENERIC_FAILURE: &str = "Something went wrong, please try again";

/// Shown when the gateway reversed money but the order row still says `cleared`
pub const REVERSED_BUT_NOT_RECORDED: &str =
    "The charge was reversed, but the order could not be updated. Do not retry; contact support.";

/// Checkout and reversal failures
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Payment could not be confirmed: {reason}")]
    GatewayConfirmationFailed { reason: String },

    #[error("Subscription could not be set up: {reason}")]
    SubscriptionSetupFailed { reason: String },

    #[error("Payment gateway error: {reason}")]
    Gateway { reason: String },

    #[error("Failed to persist {stage}: {source}")]
    PersistenceFailed {
        stage: PersistStage,
        #[source]
        source: RepositoryError,
    },

    #[error("Order not found: {0}")]
    NotFound(i64),

    #[error("Amounts do not match: claimed {claimed}, recorded {recorded}")]
    AmountMismatch { claimed: i64, recorded: i64 },

    #[error("Order {order_id} is already {status}")]
    AlreadyReversed { order_id: i64, status: OrderStatus },

    #[error("Order {order_id} was reversed at the gateway but its status was not updated: {source}")]
    ReversedButNotRecorded {
        order_id: i64,
        #[source]
        source: RepositoryError,
    },

    #[error("Database error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable machine-readable failure reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    GatewayConfirmationFailed,
    SubscriptionSetupFailed,
    GatewayError,
    PersistenceFailed,
    NotFound,
    AmountMismatch,
    AlreadyReversed,
    ReversedButNotRecorded,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::GatewayConfirmationFailed => "gateway_confirmation_failed",
            FailureKind::SubscriptionSetupFailed => "subscription_setup_failed",
            FailureKind::GatewayError => "gateway_error",
            FailureKind::PersistenceFailed => "persistence_failed",
            FailureKind::NotFound => "not_found",
            FailureKind::AmountMismatch => "amount_mismatch",
            FailureKind::AlreadyReversed => "already_reversed",
            FailureKind::ReversedButNotRecorded => "reversed_but_not_recorded",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CheckoutError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CheckoutError::InvalidInput(_) => FailureKind::InvalidInput,
            CheckoutError::GatewayConfirmationFailed { .. } => {
                FailureKind::GatewayConfirmationFailed
            }
            CheckoutError::SubscriptionSetupFailed { .. } => FailureKind::SubscriptionSetupFailed,
            CheckoutError::Gateway { .. } => FailureKind::GatewayError,
            CheckoutError::PersistenceFailed { .. } => FailureKind::PersistenceFailed,
            CheckoutError::NotFound(_) => FailureKind::NotFound,
            CheckoutError::AmountMismatch { .. } => FailureKind::AmountMismatch,
            CheckoutError::AlreadyReversed { .. } => FailureKind::AlreadyReversed,
            CheckoutError::ReversedButNotRecorded { .. } => FailureKind::ReversedButNotRecorded,
            CheckoutError::Repository(_) | CheckoutError::Config(_) => FailureKind::Internal,
        }
    }

    /// Message safe to show the caller. Gateway declines carry their mapped
    /// reason; internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            CheckoutError::GatewayConfirmationFailed { reason }
            | CheckoutError::SubscriptionSetupFailed { reason }
            | CheckoutError::Gateway { reason } => reason.clone(),
            CheckoutError::NotFound(_) => "Order not found".to_string(),
            CheckoutError::AmountMismatch { .. } => "Amounts do not match".to_string(),
            CheckoutError::AlreadyReversed { status, .. } => {
                format!("This order is already {}", status)
            }
            CheckoutError::ReversedButNotRecorded { .. } => REVERSED_BUT_NOT_RECORDED.to_string(),
            CheckoutError::InvalidInput(_)
            | CheckoutError::PersistenceFailed { .. }
            | CheckoutError::Repository(_)
            | CheckoutError::Config(_) => GENERIC_FAILURE.to_string(),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, CheckoutError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_declines_surface_their_reason() {
        let err = CheckoutError::GatewayConfirmationFailed {
            reason: "Your card is expired".to_string(),
        };
        assert_eq!(err.user_message(), "Your card is expired");
        assert_eq!(err.kind(), FailureKind::GatewayConfirmationFailed);
    }

    #[test]
    fn test_persistence_failure_is_generic() {
        let err = CheckoutError::PersistenceFailed {
            stage: PersistStage::Transaction,
            source: RepositoryError::Database("connection reset".to_string()),
        };
        assert_eq!(err.user_message(), GENERIC_FAILURE);
        assert!(err.to_string().contains("transaction"));
        assert_eq!(err.kind().as_str(), "persistence_failed");
    }

    #[test]
    fn test_reversed_but_not_recorded_has_own_message() {
        let err = CheckoutError::ReversedButNotRecorded {
            order_id: 4,
            source: RepositoryError::Timeout(3000),
        };
        assert_eq!(err.user_message(), REVERSED_BUT_NOT_RECORDED);
        assert_eq!(err.kind(), FailureKind::ReversedButNotRecorded);
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::AmountMismatch).unwrap();
        assert_eq!(json, "\"amount_mismatch\"");
    }
}
