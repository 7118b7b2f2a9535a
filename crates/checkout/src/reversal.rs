//! Refunds and subscription cancellations for recorded orders

use serde::{Deserialize, Serialize};
use widgetstore_shared::OrderStatus;

use crate::checkout::CheckoutOrchestrator;
use crate::error::{CheckoutError, FailureKind, OrchestratorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalKind {
    Refund,
    CancelSubscription,
}

impl ReversalKind {
    /// Order status recorded once the gateway has reversed the charge
    pub fn target_status(self) -> OrderStatus {
        match self {
            ReversalKind::Refund => OrderStatus::Refunded,
            ReversalKind::CancelSubscription => OrderStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalRequest {
    pub order_id: i64,
    /// Amount the operator expects to reverse, in minor units
    pub claimed_amount: i64,
    pub currency: String,
    /// Payment intent id (refund) or subscription id (cancellation)
    pub gateway_ref: String,
    pub kind: ReversalKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReversalResult {
    pub success: bool,
    pub order_id: i64,
    pub user_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_reason: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
}

impl CheckoutOrchestrator {
    /// Reverses a charge and folds any failure into a uniform result
    pub async fn reverse_charge(&self, request: ReversalRequest) -> ReversalResult {
        match self.try_reverse_charge(&request).await {
            Ok(status) => ReversalResult {
                success: true,
                order_id: request.order_id,
                user_message: match request.kind {
                    ReversalKind::Refund => "Charge refunded".to_string(),
                    ReversalKind::CancelSubscription => "Subscription cancelled".to_string(),
                },
                machine_reason: None,
                status: Some(status),
            },
            Err(err) => {
                if !matches!(err, CheckoutError::ReversedButNotRecorded { .. }) {
                    tracing::warn!(
                        order_id = %request.order_id,
                        reason = %err.kind(),
                        error = %err,
                        "Reversal rejected"
                    );
                }
                ReversalResult {
                    success: false,
                    order_id: request.order_id,
                    user_message: err.user_message(),
                    machine_reason: Some(err.kind()),
                    status: None,
                }
            }
        }
    }

    /// Loads the order, checks the claimed amount and current status, reverses
    /// at the gateway, then records the new status.
    pub async fn try_reverse_charge(
        &self,
        request: &ReversalRequest,
    ) -> OrchestratorResult<OrderStatus> {
        if request.gateway_ref.trim().is_empty() {
            return Err(CheckoutError::InvalidInput(
                "gateway reference is required".to_string(),
            ));
        }

        let order = self
            .repository
            .get_order_by_id(request.order_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    CheckoutError::NotFound(request.order_id)
                } else {
                    CheckoutError::Repository(e)
                }
            })?;

        if order.amount != request.claimed_amount {
            return Err(CheckoutError::AmountMismatch {
                claimed: request.claimed_amount,
                recorded: order.amount,
            });
        }

        let target = request.kind.target_status();
        if !order.status.can_transition_to(target) {
            return Err(CheckoutError::AlreadyReversed {
                order_id: order.id,
                status: order.status,
            });
        }

        let gateway_result = match request.kind {
            ReversalKind::Refund => self
                .gateway
                .refund(&self.credential, &request.gateway_ref, order.amount)
                .await
                .map(|_| ()),
            ReversalKind::CancelSubscription => {
                self.gateway
                    .cancel_subscription(&self.credential, &request.gateway_ref)
                    .await
            }
        };
        gateway_result.map_err(|e| {
            tracing::warn!(
                order_id = %order.id,
                code = ?e.code,
                error = %e.message,
                "Gateway rejected reversal"
            );
            CheckoutError::Gateway { reason: e.reason }
        })?;

        if let Err(e) = self.repository.update_order_status(order.id, target).await {
            tracing::error!(
                order_id = %order.id,
                gateway_ref = %request.gateway_ref,
                amount = order.amount,
                currency = %request.currency,
                error = %e,
                "Charge reversed at gateway but order status not updated - manual fix required"
            );
            return Err(CheckoutError::ReversedButNotRecorded {
                order_id: order.id,
                source: e,
            });
        }

        tracing::info!(
            order_id = %order.id,
            status = %target,
            amount = order.amount,
            currency = %request.currency,
            "Order reversed"
        );

        Ok(target)
    }
}
