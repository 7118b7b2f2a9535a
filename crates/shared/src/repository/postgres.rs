//! Postgres-backed repository
//!
//! Every statement runs under the configured per-call timeout; an elapsed
//! timeout surfaces as [`RepositoryError::Timeout`] like any other failure.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{CheckoutIds, InvoiceOutbox, PersistError, PersistStage, Repository};
use crate::error::{RepositoryError, RepositoryResult};
use crate::types::{
    InvoiceDeliveryStatus, InvoiceOutboxEntry, NewCustomer, NewOrder, NewTransaction, Order,
    page_offset, OrderDraft, OrderStatus, OrderSummary, Page, User, Widget,
};

/// Default bound for a single repository call
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

const INSERT_CUSTOMER: &str = r#"
    INSERT INTO customers (first_name, last_name, email, created_at, updated_at)
    VALUES ($1, $2, $3, NOW(), NOW())
    RETURNING id
"#;

const INSERT_TRANSACTION: &str = r#"
    INSERT INTO transactions (
        amount, currency, last_four, expiry_month, expiry_year,
        payment_intent, payment_method, bank_return_code, transaction_status_id,
        created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
    RETURNING id
"#;

const INSERT_ORDER: &str = r#"
    INSERT INTO orders (
        widget_id, transaction_id, customer_id, status_id, quantity, amount,
        created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
    RETURNING id
"#;

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self::with_timeout(pool, DEFAULT_QUERY_TIMEOUT)
    }

    pub fn with_timeout(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn timed<T, F>(&self, fut: F) -> RepositoryResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(RepositoryError::from),
            Err(_) => Err(RepositoryError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn get_widget(&self, id: i64) -> RepositoryResult<Widget> {
        let widget: Option<Widget> = self
            .timed(
                sqlx::query_as(
                    r#"
                    SELECT id, name, description, inventory_level, price, is_recurring,
                           plan_id, image, created_at, updated_at
                    FROM widgets WHERE id = $1
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;

        widget.ok_or_else(|| RepositoryError::NotFound(format!("widget {}", id)))
    }

    async fn insert_customer(&self, customer: NewCustomer) -> RepositoryResult<i64> {
        self.timed(
            sqlx::query_scalar(INSERT_CUSTOMER)
                .bind(&customer.first_name)
                .bind(&customer.last_name)
                .bind(&customer.email)
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn insert_transaction(&self, transaction: NewTransaction) -> RepositoryResult<i64> {
        self.timed(
            sqlx::query_scalar(INSERT_TRANSACTION)
                .bind(transaction.amount)
                .bind(&transaction.currency)
                .bind(&transaction.last_four)
                .bind(transaction.expiry_month)
                .bind(transaction.expiry_year)
                .bind(&transaction.payment_intent)
                .bind(&transaction.payment_method)
                .bind(&transaction.bank_return_code)
                .bind(transaction.status.id())
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn insert_order(&self, order: NewOrder) -> RepositoryResult<i64> {
        self.timed(
            sqlx::query_scalar(INSERT_ORDER)
                .bind(order.widget_id)
                .bind(order.transaction_id)
                .bind(order.customer_id)
                .bind(order.status.id())
                .bind(order.quantity)
                .bind(order.amount)
                .fetch_one(&self.pool),
        )
        .await
    }

    async fn get_order_by_id(&self, id: i64) -> RepositoryResult<Order> {
        let order: Option<Order> = self
            .timed(
                sqlx::query_as(
                    r#"
                    SELECT id, widget_id, transaction_id, customer_id, status_id, quantity,
                           amount, created_at, updated_at
                    FROM orders WHERE id = $1
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;

        order.ok_or_else(|| RepositoryError::NotFound(format!("order {}", id)))
    }

    async fn update_order_status(&self, id: i64, status: OrderStatus) -> RepositoryResult<()> {
        let result = self
            .timed(
                sqlx::query("UPDATE orders SET status_id = $1, updated_at = NOW() WHERE id = $2")
                    .bind(status.id())
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("order {}", id)));
        }

        tracing::info!(order_id = id, status = %status, "Updated order status");
        Ok(())
    }

    async fn list_orders(
        &self,
        recurring: bool,
        page: i64,
        page_size: i64,
    ) -> RepositoryResult<Page<OrderSummary>> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);

        let total: i64 = self
            .timed(
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(o.id)
                    FROM orders o
                    JOIN widgets w ON w.id = o.widget_id
                    WHERE w.is_recurring = $1
                    "#,
                )
                .bind(recurring)
                .fetch_one(&self.pool),
            )
            .await?;

        // Past the last addressable row
        let Some(offset) = page_offset(page, page_size) else {
            return Ok(Page::new(Vec::new(), page, page_size, total));
        };

        let items: Vec<OrderSummary> = self
            .timed(
                sqlx::query_as(
                    r#"
                    SELECT o.id, o.widget_id, w.name AS widget_name, o.customer_id,
                           c.first_name, c.last_name, c.email, o.transaction_id,
                           t.payment_intent, t.currency, o.quantity, o.amount, o.status_id,
                           o.created_at
                    FROM orders o
                    JOIN widgets w ON w.id = o.widget_id
                    JOIN customers c ON c.id = o.customer_id
                    JOIN transactions t ON t.id = o.transaction_id
                    WHERE w.is_recurring = $1
                    ORDER BY o.created_at DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(recurring)
                .bind(page_size)
                .bind(offset)
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(Page::new(items, page, page_size, total))
    }

    async fn get_user_by_id(&self, id: i64) -> RepositoryResult<User> {
        let user: Option<User> = self
            .timed(
                sqlx::query_as(
                    "SELECT id, first_name, last_name, email, created_at, updated_at FROM users WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;

        user.ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))
    }

    async fn list_users(&self) -> RepositoryResult<Vec<User>> {
        self.timed(
            sqlx::query_as(
                "SELECT id, first_name, last_name, email, created_at, updated_at FROM users ORDER BY last_name, first_name",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn persist_checkout(
        &self,
        customer: NewCustomer,
        transaction: NewTransaction,
        order: OrderDraft,
    ) -> Result<CheckoutIds, PersistError> {
        let mut tx = self
            .timed(self.pool.begin())
            .await
            .map_err(|e| PersistError::new(PersistStage::Customer, e))?;

        let customer_id: i64 = self
            .timed(
                sqlx::query_scalar(INSERT_CUSTOMER)
                    .bind(&customer.first_name)
                    .bind(&customer.last_name)
                    .bind(&customer.email)
                    .fetch_one(&mut *tx),
            )
            .await
            .map_err(|e| PersistError::new(PersistStage::Customer, e))?;

        let transaction_id: i64 = self
            .timed(
                sqlx::query_scalar(INSERT_TRANSACTION)
                    .bind(transaction.amount)
                    .bind(&transaction.currency)
                    .bind(&transaction.last_four)
                    .bind(transaction.expiry_month)
                    .bind(transaction.expiry_year)
                    .bind(&transaction.payment_intent)
                    .bind(&transaction.payment_method)
                    .bind(&transaction.bank_return_code)
                    .bind(transaction.status.id())
                    .fetch_one(&mut *tx),
            )
            .await
            .map_err(|e| PersistError::new(PersistStage::Transaction, e))?;

        let order = order.into_order(customer_id, transaction_id);
        let order_id: i64 = self
            .timed(
                sqlx::query_scalar(INSERT_ORDER)
                    .bind(order.widget_id)
                    .bind(order.transaction_id)
                    .bind(order.customer_id)
                    .bind(order.status.id())
                    .bind(order.quantity)
                    .bind(order.amount)
                    .fetch_one(&mut *tx),
            )
            .await
            .map_err(|e| PersistError::new(PersistStage::Order, e))?;

        self.timed(tx.commit())
            .await
            .map_err(|e| PersistError::new(PersistStage::Order, e))?;

        Ok(CheckoutIds {
            customer_id,
            transaction_id,
            order_id,
        })
    }
}

#[async_trait]
impl InvoiceOutbox for PgRepository {
    async fn record_pending_invoice(
        &self,
        order_id: i64,
        payload: serde_json::Value,
        max_attempts: i32,
    ) -> RepositoryResult<i64> {
        self.timed(
            sqlx::query_scalar(
                r#"
                INSERT INTO invoice_outbox (order_id, payload, status, attempts, max_attempts, created_at, last_attempt_at)
                VALUES ($1, $2, $3, 0, $4, NOW(), NOW())
                RETURNING id
                "#,
            )
            .bind(order_id)
            .bind(payload)
            .bind(InvoiceDeliveryStatus::Pending.as_str())
            .bind(max_attempts)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn mark_invoice_sent(&self, id: i64, attempts_made: i32) -> RepositoryResult<()> {
        self.timed(
            sqlx::query(
                r#"
                UPDATE invoice_outbox
                SET status = $1, attempts = attempts + $2, last_error = NULL, processed_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(InvoiceDeliveryStatus::Sent.as_str())
            .bind(attempts_made)
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn mark_invoice_failed(
        &self,
        id: i64,
        attempts_made: i32,
        error: &str,
    ) -> RepositoryResult<()> {
        self.timed(
            sqlx::query(
                r#"
                UPDATE invoice_outbox
                SET status = $1, attempts = attempts + $2, last_error = $3, last_attempt_at = NOW()
                WHERE id = $4
                "#,
            )
            .bind(InvoiceDeliveryStatus::Failed.as_str())
            .bind(attempts_made)
            .bind(error)
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn mark_invoice_rejected(
        &self,
        id: i64,
        attempts_made: i32,
        error: &str,
    ) -> RepositoryResult<()> {
        self.timed(
            sqlx::query(
                r#"
                UPDATE invoice_outbox
                SET status = $1, attempts = attempts + $2, last_error = $3, last_attempt_at = NOW()
                WHERE id = $4
                "#,
            )
            .bind(InvoiceDeliveryStatus::Rejected.as_str())
            .bind(attempts_made)
            .bind(error)
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn claim_retryable_invoices(
        &self,
        limit: i64,
        retry_after_secs: i64,
    ) -> RepositoryResult<Vec<InvoiceOutboxEntry>> {
        self.timed(
            sqlx::query_as(
                r#"
                UPDATE invoice_outbox
                SET status = 'processing', last_attempt_at = NOW()
                WHERE id IN (
                    SELECT id FROM invoice_outbox
                    WHERE (status IN ('pending', 'processing')
                           OR (status = 'failed' AND attempts < max_attempts))
                      AND (last_attempt_at IS NULL
                           OR last_attempt_at < NOW() - ($2::bigint * INTERVAL '1 second'))
                    ORDER BY created_at ASC
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, order_id, payload, status, attempts, max_attempts, last_error,
                          created_at, last_attempt_at
                "#,
            )
            .bind(limit)
            .bind(retry_after_secs)
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn purge_sent_invoices(&self, retention_days: i32) -> RepositoryResult<u64> {
        let result = self
            .timed(
                sqlx::query(
                    r#"
                    DELETE FROM invoice_outbox
                    WHERE status = 'sent'
                      AND processed_at < NOW() - ($1::int * INTERVAL '1 day')
                    "#,
                )
                .bind(retention_days)
                .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected())
    }
}
