//! Storefront checkout routes

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use widgetstore_checkout::{parse_amount, CheckoutFlow, CheckoutInput, CheckoutResult, FailureKind};

use crate::state::AppState;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PaymentIntentRequest {
    pub currency: String,
    pub amount: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentIntentResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PaymentIntentResponse {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id: None,
            client_secret: None,
            message: Some(message.into()),
        }
    }
}

/// Checkout submission. The flow comes from the route.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    pub currency: String,
    pub amount: String,
    #[serde(alias = "product_id")]
    pub widget_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, alias = "plan")]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub last_four: Option<String>,
    #[serde(default)]
    pub card_brand: Option<String>,
    #[serde(default, alias = "exp_month")]
    pub expiry_month: Option<i32>,
    #[serde(default, alias = "exp_year")]
    pub expiry_year: Option<i32>,
}

impl CheckoutRequest {
    fn into_input(self, flow: CheckoutFlow) -> CheckoutInput {
        CheckoutInput {
            flow,
            payment_intent: self.payment_intent,
            payment_method: self.payment_method,
            currency: self.currency,
            amount: self.amount,
            widget_id: self.widget_id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            plan_id: self.plan_id,
            last_four: self.last_four,
            card_brand: self.card_brand,
            expiry_month: self.expiry_month,
            expiry_year: self.expiry_year,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Status code for a checkout or reversal failure
pub(crate) fn failure_status(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::InvalidInput | FailureKind::AmountMismatch => StatusCode::BAD_REQUEST,
        FailureKind::GatewayConfirmationFailed
        | FailureKind::SubscriptionSetupFailed
        | FailureKind::GatewayError => StatusCode::PAYMENT_REQUIRED,
        FailureKind::NotFound => StatusCode::NOT_FOUND,
        FailureKind::AlreadyReversed => StatusCode::CONFLICT,
        FailureKind::PersistenceFailed
        | FailureKind::ReversedButNotRecorded
        | FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn checkout_response(result: CheckoutResult) -> (StatusCode, Json<CheckoutResult>) {
    let status = match result.machine_reason {
        Some(kind) if !result.success => failure_status(kind),
        _ => StatusCode::OK,
    };
    (status, Json(result))
}

/// Creates a payment intent for the browser to confirm
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Json(req): Json<PaymentIntentRequest>,
) -> (StatusCode, Json<PaymentIntentResponse>) {
    let amount = match parse_amount(&req.amount) {
        Ok(amount) => amount,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(PaymentIntentResponse::rejected(e.to_string())),
            )
        }
    };

    let orchestrator = &state.orchestrator;
    match orchestrator
        .gateway()
        .create_payment_intent(orchestrator.credential(), &req.currency, amount)
        .await
    {
        Ok(intent) => (
            StatusCode::OK,
            Json(PaymentIntentResponse {
                ok: true,
                id: Some(intent.id),
                client_secret: intent.client_secret,
                message: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(
                code = ?e.code,
                error = %e.message,
                amount = amount,
                "Failed to create payment intent"
            );
            (
                StatusCode::PAYMENT_REQUIRED,
                Json(PaymentIntentResponse::rejected(e.reason)),
            )
        }
    }
}

/// Records a one-off purchase whose payment intent the browser confirmed
pub async fn payment_succeeded(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> (StatusCode, Json<CheckoutResult>) {
    let result = state
        .orchestrator
        .execute_checkout(req.into_input(CheckoutFlow::OneOff))
        .await;
    checkout_response(result)
}

/// Creates a gateway customer and subscribes them to the widget's plan
pub async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> (StatusCode, Json<CheckoutResult>) {
    let result = state
        .orchestrator
        .execute_checkout(req.into_input(CheckoutFlow::Subscription))
        .await;
    checkout_response(result)
}
