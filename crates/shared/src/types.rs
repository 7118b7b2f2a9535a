//! Storefront entities shared by the checkout core, the API and the worker

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::error::RepositoryError;

// =============================================================================
// Status Enums
// =============================================================================

/// Status of a payment transaction. Stored as its integer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending = 1,
    Succeeded = 2,
    Declined = 3,
    Refunded = 4,
    PartiallyRefunded = 5,
}

impl TransactionStatus {
    pub fn id(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for TransactionStatus {
    type Error = RepositoryError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Pending),
            2 => Ok(Self::Succeeded),
            3 => Ok(Self::Declined),
            4 => Ok(Self::Refunded),
            5 => Ok(Self::PartiallyRefunded),
            _ => Err(RepositoryError::UnknownStatus {
                kind: "transaction",
                value,
            }),
        }
    }
}

/// Status of an order. Orders start `Cleared` and may only move to
/// `Refunded` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Cleared = 1,
    Refunded = 2,
    Cancelled = 3,
}

impl OrderStatus {
    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Cleared => "cleared",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Forward-only lifecycle check
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Cleared, OrderStatus::Refunded)
                | (OrderStatus::Cleared, OrderStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i32> for OrderStatus {
    type Error = RepositoryError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Cleared),
            2 => Ok(Self::Refunded),
            3 => Ok(Self::Cancelled),
            _ => Err(RepositoryError::UnknownStatus {
                kind: "order",
                value,
            }),
        }
    }
}

/// Delivery state of an invoice outbox row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceDeliveryStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    /// Refused by the invoicing service; never retried
    Rejected,
}

impl InvoiceDeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceDeliveryStatus::Pending => "pending",
            InvoiceDeliveryStatus::Processing => "processing",
            InvoiceDeliveryStatus::Sent => "sent",
            InvoiceDeliveryStatus::Failed => "failed",
            InvoiceDeliveryStatus::Rejected => "rejected",
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A sellable product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Widget {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub inventory_level: i32,
    /// Unit price in minor currency units
    pub price: i64,
    pub is_recurring: bool,
    /// Gateway plan identifier for recurring widgets
    pub plan_id: Option<String>,
    pub image: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub amount: i64,
    pub currency: String,
    pub last_four: String,
    pub expiry_month: i32,
    pub expiry_year: i32,
    /// Payment intent id for one-off charges, subscription id for subscriptions
    pub payment_intent: String,
    pub payment_method: String,
    pub bank_return_code: String,
    #[sqlx(try_from = "i32", rename = "transaction_status_id")]
    pub status: TransactionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub amount: i64,
    pub currency: String,
    pub last_four: String,
    pub expiry_month: i32,
    pub expiry_year: i32,
    pub payment_intent: String,
    pub payment_method: String,
    pub bank_return_code: String,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub widget_id: i64,
    pub transaction_id: i64,
    pub customer_id: i64,
    pub quantity: i32,
    pub amount: i64,
    #[sqlx(try_from = "i32", rename = "status_id")]
    pub status: OrderStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Order values known before the customer and transaction rows exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub widget_id: i64,
    pub quantity: i32,
    pub amount: i64,
}

impl OrderDraft {
    pub fn into_order(self, customer_id: i64, transaction_id: i64) -> NewOrder {
        NewOrder {
            widget_id: self.widget_id,
            transaction_id,
            customer_id,
            quantity: self.quantity,
            amount: self.amount,
            status: OrderStatus::Cleared,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub widget_id: i64,
    pub transaction_id: i64,
    pub customer_id: i64,
    pub quantity: i32,
    pub amount: i64,
    pub status: OrderStatus,
}

/// Order joined with its widget, customer and transaction for admin listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderSummary {
    pub id: i64,
    pub widget_id: i64,
    pub widget_name: String,
    pub customer_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub transaction_id: i64,
    pub payment_intent: String,
    pub currency: String,
    pub quantity: i32,
    pub amount: i64,
    #[sqlx(try_from = "i32", rename = "status_id")]
    pub status: OrderStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Administrative account. Password material never leaves the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One page of a paginated read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: i64,
    pub page_size: i64,
    pub last_page: i64,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, current_page: i64, page_size: i64, total: i64) -> Self {
        let last_page = if page_size > 0 {
            ((total + page_size - 1) / page_size).max(1)
        } else {
            1
        };
        Self {
            items,
            current_page,
            page_size,
            last_page,
            total,
        }
    }
}

/// Rows to skip for a 1-based page, or `None` when the page is out of range
pub fn page_offset(page: i64, page_size: i64) -> Option<i64> {
    if page < 1 || page_size < 1 {
        return None;
    }
    (page - 1).checked_mul(page_size)
}

/// Durable marker for an invoice that still has to reach the invoicing service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvoiceOutboxEntry {
    pub id: i64,
    pub order_id: i64,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_attempt_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_ids() {
        assert_eq!(OrderStatus::Cleared.id(), 1);
        assert_eq!(OrderStatus::Refunded.id(), 2);
        assert_eq!(OrderStatus::Cancelled.id(), 3);
        assert_eq!(OrderStatus::try_from(2).ok(), Some(OrderStatus::Refunded));
        assert!(OrderStatus::try_from(9).is_err());
    }

    #[test]
    fn test_transaction_status_ids() {
        assert_eq!(TransactionStatus::Pending.id(), 1);
        assert_eq!(TransactionStatus::Succeeded.id(), 2);
        assert_eq!(
            TransactionStatus::try_from(4).ok(),
            Some(TransactionStatus::Refunded)
        );
        assert!(TransactionStatus::try_from(0).is_err());
    }

    #[test]
    fn test_order_status_moves_forward_only() {
        assert!(OrderStatus::Cleared.can_transition_to(OrderStatus::Refunded));
        assert!(OrderStatus::Cleared.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Refunded.can_transition_to(OrderStatus::Cleared));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Cleared.can_transition_to(OrderStatus::Cleared));
    }

    #[test]
    fn test_page_last_page() {
        let page: Page<i64> = Page::new(vec![], 1, 10, 0);
        assert_eq!(page.last_page, 1);

        let page: Page<i64> = Page::new(vec![1, 2], 3, 10, 21);
        assert_eq!(page.last_page, 3);

        let page: Page<i64> = Page::new(vec![], 1, 10, 30);
        assert_eq!(page.last_page, 3);
    }

    #[test]
    fn test_page_offset_bounds() {
        assert_eq!(page_offset(1, 10), Some(0));
        assert_eq!(page_offset(3, 25), Some(50));
        assert_eq!(page_offset(0, 10), None);
        assert_eq!(page_offset(i64::MAX, 100), None);
    }

    #[test]
    fn test_order_draft_into_order() {
        let draft = OrderDraft {
            widget_id: 2,
            quantity: 1,
            amount: 5000,
        };
        let order = draft.into_order(7, 9);
        assert_eq!(order.customer_id, 7);
        assert_eq!(order.transaction_id, 9);
        assert_eq!(order.status, OrderStatus::Cleared);
    }
}
