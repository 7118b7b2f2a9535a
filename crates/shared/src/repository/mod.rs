//! Repository port for the checkout core
//!
//! Every method is a single-entity commit. `persist_checkout` groups the three
//! checkout inserts: its default body runs them strictly in
//! Customer -> Transaction -> Order order and stops at the first failure, while
//! stores that support it override it with one atomic transaction.

mod in_memory;
mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::error::{RepositoryError, RepositoryResult};
use crate::types::{
    InvoiceOutboxEntry, NewCustomer, NewOrder, NewTransaction, Order, OrderDraft, OrderStatus,
    OrderSummary, Page, User, Widget,
};

pub use in_memory::InMemoryRepository;
pub use postgres::PgRepository;

/// Which persistence step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistStage {
    Widget,
    Customer,
    Transaction,
    Order,
}

impl PersistStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PersistStage::Widget => "widget",
            PersistStage::Customer => "customer",
            PersistStage::Transaction => "transaction",
            PersistStage::Order => "order",
        }
    }
}

impl std::fmt::Display for PersistStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{stage} persistence failed: {source}")]
pub struct PersistError {
    pub stage: PersistStage,
    #[source]
    pub source: RepositoryError,
}

impl PersistError {
    pub fn new(stage: PersistStage, source: RepositoryError) -> Self {
        Self { stage, source }
    }
}

/// Row ids assigned by a completed checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckoutIds {
    pub customer_id: i64,
    pub transaction_id: i64,
    pub order_id: i64,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_widget(&self, id: i64) -> RepositoryResult<Widget>;

    async fn insert_customer(&self, customer: NewCustomer) -> RepositoryResult<i64>;

    async fn insert_transaction(&self, transaction: NewTransaction) -> RepositoryResult<i64>;

    async fn insert_order(&self, order: NewOrder) -> RepositoryResult<i64>;

    async fn get_order_by_id(&self, id: i64) -> RepositoryResult<Order>;

    async fn update_order_status(&self, id: i64, status: OrderStatus) -> RepositoryResult<()>;

    /// Orders for one-off (`recurring = false`) or subscription widgets, newest first
    async fn list_orders(
        &self,
        recurring: bool,
        page: i64,
        page_size: i64,
    ) -> RepositoryResult<Page<OrderSummary>>;

    async fn get_user_by_id(&self, id: i64) -> RepositoryResult<User>;

    async fn list_users(&self) -> RepositoryResult<Vec<User>>;

    async fn persist_checkout(
        &self,
        customer: NewCustomer,
        transaction: NewTransaction,
        order: OrderDraft,
    ) -> Result<CheckoutIds, PersistError> {
        let customer_id = self
            .insert_customer(customer)
            .await
            .map_err(|e| PersistError::new(PersistStage::Customer, e))?;

        let transaction_id = self
            .insert_transaction(transaction)
            .await
            .map_err(|e| PersistError::new(PersistStage::Transaction, e))?;

        let order_id = self
            .insert_order(order.into_order(customer_id, transaction_id))
            .await
            .map_err(|e| PersistError::new(PersistStage::Order, e))?;

        Ok(CheckoutIds {
            customer_id,
            transaction_id,
            order_id,
        })
    }
}

/// Durable queue of invoice requests waiting for the invoicing service
#[async_trait]
pub trait InvoiceOutbox: Send + Sync {
    /// Records a pending invoice. The row is stamped with an attempt time so the
    /// retry worker leaves it alone while the caller makes its own attempts.
    async fn record_pending_invoice(
        &self,
        order_id: i64,
        payload: serde_json::Value,
        max_attempts: i32,
    ) -> RepositoryResult<i64>;

    async fn mark_invoice_sent(&self, id: i64, attempts_made: i32) -> RepositoryResult<()>;

    async fn mark_invoice_failed(
        &self,
        id: i64,
        attempts_made: i32,
        error: &str,
    ) -> RepositoryResult<()>;

    /// Terminal failure: the row is kept for inspection but never claimed again
    async fn mark_invoice_rejected(
        &self,
        id: i64,
        attempts_made: i32,
        error: &str,
    ) -> RepositoryResult<()>;

    /// Claims up to `limit` rows that are pending, failed with attempts left, or
    /// stuck in processing, and whose last attempt is older than `retry_after_secs`
    async fn claim_retryable_invoices(
        &self,
        limit: i64,
        retry_after_secs: i64,
    ) -> RepositoryResult<Vec<InvoiceOutboxEntry>>;

    /// Deletes sent rows older than `retention_days`, returning how many went
    async fn purge_sent_invoices(&self, retention_days: i32) -> RepositoryResult<u64>;
}
