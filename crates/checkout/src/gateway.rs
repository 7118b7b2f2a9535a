//! Payment gateway port
//!
//! Every operation takes the [`GatewayCredential`] explicitly, so concurrent
//! callers holding different keys never share mutable client state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decline::decline_reason;

/// API key pair for the card gateway
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayCredential {
    secret: String,
    publishable: String,
}

impl GatewayCredential {
    pub fn new(secret: impl Into<String>, publishable: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            publishable: publishable.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn publishable(&self) -> &str {
        &self.publishable
    }
}

impl std::fmt::Debug for GatewayCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayCredential")
            .field("secret", &"[REDACTED]")
            .field("publishable", &self.publishable)
            .finish()
    }
}

/// Gateway failure with the customer-facing reason already resolved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GatewayError {
    /// Structured gateway code, when the gateway sent one
    pub code: Option<String>,
    /// Message safe to show the card holder
    pub reason: String,
    /// Raw gateway message, for logs only
    pub message: String,
}

impl GatewayError {
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        let reason = decline_reason(code.as_deref()).to_string();
        Self {
            code,
            reason,
            message: message.into(),
        }
    }

    /// Error without a structured code
    pub fn uncoded(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    /// Gateway status string, e.g. `succeeded` or `requires_payment_method`
    pub status: String,
    pub client_secret: Option<String>,
    pub payment_method_id: Option<String>,
    pub latest_charge_id: Option<String>,
}

impl PaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub last_four: String,
    pub expiry_month: i32,
    pub expiry_year: i32,
    pub brand: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub customer_id: String,
    pub plan_id: String,
    pub email: String,
    pub last_four: String,
    pub card_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        credential: &GatewayCredential,
        currency: &str,
        amount: i64,
    ) -> GatewayResult<PaymentIntent>;

    async fn retrieve_payment_intent(
        &self,
        credential: &GatewayCredential,
        id: &str,
    ) -> GatewayResult<PaymentIntent>;

    async fn get_payment_method(
        &self,
        credential: &GatewayCredential,
        id: &str,
    ) -> GatewayResult<CardDetails>;

    /// Creates a gateway customer with the payment method as its invoice default.
    /// Returns the gateway customer id.
    async fn create_customer(
        &self,
        credential: &GatewayCredential,
        payment_method_id: &str,
        email: &str,
    ) -> GatewayResult<String>;

    async fn create_subscription(
        &self,
        credential: &GatewayCredential,
        request: SubscriptionRequest,
    ) -> GatewayResult<Subscription>;

    /// Refunds `amount` minor units of a payment intent. Returns the refund id.
    async fn refund(
        &self,
        credential: &GatewayCredential,
        payment_intent_id: &str,
        amount: i64,
    ) -> GatewayResult<String>;

    async fn cancel_subscription(
        &self,
        credential: &GatewayCredential,
        subscription_id: &str,
    ) -> GatewayResult<()>;
}
