//! Back-office routes: sales listings, reversals, terminal payments, users

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use widgetstore_checkout::{
    ReversalKind, ReversalRequest, ReversalResult, TerminalPayment, TerminalResult,
};
use widgetstore_shared::{page_offset, Order, OrderSummary, Page, User};

use super::checkout::failure_status;
use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Default number of rows per page
const DEFAULT_PAGE_SIZE: i64 = 10;

/// Largest page a caller may ask for
const MAX_PAGE_SIZE: i64 = 100;

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    fn resolve(&self) -> ApiResult<(i64, i64)> {
        let page = self.page.unwrap_or(1);
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page < 1 {
            return Err(ApiError::BadRequest("page must be at least 1".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ApiError::BadRequest(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        if page_offset(page, page_size).is_none() {
            return Err(ApiError::BadRequest(format!("page {} is out of range", page)));
        }
        Ok((page, page_size))
    }
}

/// Refund or cancellation request for a recorded order
#[derive(Debug, Deserialize)]
pub struct ReversalBody {
    /// Order id
    pub id: i64,
    /// Payment intent (refund) or subscription id (cancellation)
    pub payment_intent: String,
    pub amount: i64,
    pub currency: String,
}

impl ReversalBody {
    fn into_request(self, kind: ReversalKind) -> ReversalRequest {
        ReversalRequest {
            order_id: self.id,
            claimed_amount: self.amount,
            currency: self.currency,
            gateway_ref: self.payment_intent,
            kind,
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// One-off sales, newest first
pub async fn list_sales(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<OrderSummary>>> {
    let (page, page_size) = query.resolve()?;
    let orders = state.repository.list_orders(false, page, page_size).await?;
    Ok(Json(orders))
}

/// Subscription orders, newest first
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<OrderSummary>>> {
    let (page, page_size) = query.resolve()?;
    let orders = state.repository.list_orders(true, page, page_size).await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Order>> {
    let order = state.repository.get_order_by_id(id).await?;
    Ok(Json(order))
}

// =============================================================================
// Reversals
// =============================================================================

async fn reverse(
    state: &AppState,
    body: ReversalBody,
    kind: ReversalKind,
) -> (StatusCode, Json<ReversalResult>) {
    let result = state.orchestrator.reverse_charge(body.into_request(kind)).await;
    let status = match result.machine_reason {
        Some(kind) if !result.success => failure_status(kind),
        _ => StatusCode::OK,
    };
    (status, Json(result))
}

pub async fn refund(
    State(state): State<AppState>,
    Json(body): Json<ReversalBody>,
) -> (StatusCode, Json<ReversalResult>) {
    reverse(&state, body, ReversalKind::Refund).await
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Json(body): Json<ReversalBody>,
) -> (StatusCode, Json<ReversalResult>) {
    reverse(&state, body, ReversalKind::CancelSubscription).await
}

// =============================================================================
// Virtual terminal
// =============================================================================

/// Records a card payment taken from the back office; no order is created
pub async fn virtual_terminal_succeeded(
    State(state): State<AppState>,
    Json(payment): Json<TerminalPayment>,
) -> (StatusCode, Json<TerminalResult>) {
    let result = state.orchestrator.record_terminal_payment(payment).await;
    let status = match result.machine_reason {
        Some(kind) if !result.success => failure_status(kind),
        _ => StatusCode::OK,
    };
    (status, Json(result))
}

// =============================================================================
// Users
// =============================================================================

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    let users = state.repository.list_users().await?;
    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<User>> {
    let user = state.repository.get_user_by_id(id).await?;
    Ok(Json(user))
}
