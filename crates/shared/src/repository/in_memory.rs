use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

use super::{InvoiceOutbox, Repository};
use crate::error::{RepositoryError, RepositoryResult};
use crate::types::{
    Customer, InvoiceDeliveryStatus, InvoiceOutboxEntry, NewCustomer, NewOrder, NewTransaction,
    page_offset, Order, OrderStatus, OrderSummary, Page, Transaction, User, Widget,
};

#[derive(Default)]
struct State {
    widgets: BTreeMap<i64, Widget>,
    customers: BTreeMap<i64, Customer>,
    transactions: BTreeMap<i64, Transaction>,
    orders: BTreeMap<i64, Order>,
    users: BTreeMap<i64, User>,
    invoices: BTreeMap<i64, InvoiceOutboxEntry>,
    next_customer_id: i64,
    next_transaction_id: i64,
    next_order_id: i64,
    next_invoice_id: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

/// A thread-safe in-memory store.
///
/// Ids start at 1 per entity, like freshly created sequences. Used for local
/// development and as the base of test doubles.
#[derive(Default, Clone)]
pub struct InMemoryRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_widget(&self, widget: Widget) {
        let mut state = self.state.write().await;
        state.widgets.insert(widget.id, widget);
    }

    pub async fn insert_user(&self, user: User) {
        let mut state = self.state.write().await;
        state.users.insert(user.id, user);
    }

    pub async fn customers(&self) -> Vec<Customer> {
        self.state.read().await.customers.values().cloned().collect()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.state.read().await.transactions.values().cloned().collect()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.read().await.orders.values().cloned().collect()
    }

    pub async fn invoices(&self) -> Vec<InvoiceOutboxEntry> {
        self.state.read().await.invoices.values().cloned().collect()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_widget(&self, id: i64) -> RepositoryResult<Widget> {
        let state = self.state.read().await;
        state
            .widgets
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("widget {}", id)))
    }

    async fn insert_customer(&self, customer: NewCustomer) -> RepositoryResult<i64> {
        let mut state = self.state.write().await;
        let id = next_id(&mut state.next_customer_id);
        let now = OffsetDateTime::now_utc();
        state.customers.insert(
            id,
            Customer {
                id,
                first_name: customer.first_name,
                last_name: customer.last_name,
                email: customer.email,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn insert_transaction(&self, transaction: NewTransaction) -> RepositoryResult<i64> {
        let mut state = self.state.write().await;
        let id = next_id(&mut state.next_transaction_id);
        let now = OffsetDateTime::now_utc();
        state.transactions.insert(
            id,
            Transaction {
                id,
                amount: transaction.amount,
                currency: transaction.currency,
                last_four: transaction.last_four,
                expiry_month: transaction.expiry_month,
                expiry_year: transaction.expiry_year,
                payment_intent: transaction.payment_intent,
                payment_method: transaction.payment_method,
                bank_return_code: transaction.bank_return_code,
                status: transaction.status,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn insert_order(&self, order: NewOrder) -> RepositoryResult<i64> {
        let mut state = self.state.write().await;
        if !state.customers.contains_key(&order.customer_id) {
            return Err(RepositoryError::Database(format!(
                "order references missing customer {}",
                order.customer_id
            )));
        }
        if !state.transactions.contains_key(&order.transaction_id) {
            return Err(RepositoryError::Database(format!(
                "order references missing transaction {}",
                order.transaction_id
            )));
        }

        let id = next_id(&mut state.next_order_id);
        let now = OffsetDateTime::now_utc();
        state.orders.insert(
            id,
            Order {
                id,
                widget_id: order.widget_id,
                transaction_id: order.transaction_id,
                customer_id: order.customer_id,
                quantity: order.quantity,
                amount: order.amount,
                status: order.status,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get_order_by_id(&self, id: i64) -> RepositoryResult<Order> {
        let state = self.state.read().await;
        state
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("order {}", id)))
    }

    async fn update_order_status(&self, id: i64, status: OrderStatus) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("order {}", id)))?;
        order.status = status;
        order.updated_at = OffsetDateTime::now_utc();
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
        let state = self.state.read().await;

        let mut matching: Vec<OrderSummary> = state
            .orders
            .values()
            .filter_map(|order| {
                let widget = state.widgets.get(&order.widget_id)?;
                if widget.is_recurring != recurring {
                    return None;
                }
                let customer = state.customers.get(&order.customer_id)?;
                let transaction = state.transactions.get(&order.transaction_id)?;
                Some(OrderSummary {
                    id: order.id,
                    widget_id: widget.id,
                    widget_name: widget.name.clone(),
                    customer_id: customer.id,
                    first_name: customer.first_name.clone(),
                    last_name: customer.last_name.clone(),
                    email: customer.email.clone(),
                    transaction_id: transaction.id,
                    payment_intent: transaction.payment_intent.clone(),
                    currency: transaction.currency.clone(),
                    quantity: order.quantity,
                    amount: order.amount,
                    status: order.status,
                    created_at: order.created_at,
                })
            })
            .collect();

        // newest first; ids break ties between rows created in the same instant
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let skip = page_offset(page, page_size)
            .and_then(|offset| usize::try_from(offset).ok())
            .unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .collect();

        Ok(Page::new(items, page, page_size, total))
    }

    async fn get_user_by_id(&self, id: i64) -> RepositoryResult<User> {
        let state = self.state.read().await;
        state
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))
    }

    async fn list_users(&self) -> RepositoryResult<Vec<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().cloned().collect())
    }
}

#[async_trait]
impl InvoiceOutbox for InMemoryRepository {
    async fn record_pending_invoice(
        &self,
        order_id: i64,
        payload: serde_json::Value,
        max_attempts: i32,
    ) -> RepositoryResult<i64> {
        let mut state = self.state.write().await;
        let id = next_id(&mut state.next_invoice_id);
        let now = OffsetDateTime::now_utc();
        state.invoices.insert(
            id,
            InvoiceOutboxEntry {
                id,
                order_id,
                payload,
                status: InvoiceDeliveryStatus::Pending.as_str().to_string(),
                attempts: 0,
                max_attempts,
                last_error: None,
                created_at: now,
                last_attempt_at: Some(now),
            },
        );
        Ok(id)
    }

    async fn mark_invoice_sent(&self, id: i64, attempts_made: i32) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        let entry = state
            .invoices
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("invoice {}", id)))?;
        entry.status = InvoiceDeliveryStatus::Sent.as_str().to_string();
        entry.attempts += attempts_made;
        entry.last_error = None;
        Ok(())
    }

    async fn mark_invoice_failed(
        &self,
        id: i64,
        attempts_made: i32,
        error: &str,
    ) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        let entry = state
            .invoices
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("invoice {}", id)))?;
        entry.status = InvoiceDeliveryStatus::Failed.as_str().to_string();
        entry.attempts += attempts_made;
        entry.last_error = Some(error.to_string());
        entry.last_attempt_at = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    async fn mark_invoice_rejected(
        &self,
        id: i64,
        attempts_made: i32,
        error: &str,
    ) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        let entry = state
            .invoices
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("invoice {}", id)))?;
        entry.status = InvoiceDeliveryStatus::Rejected.as_str().to_string();
        entry.attempts += attempts_made;
        entry.last_error = Some(error.to_string());
        entry.last_attempt_at = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    async fn claim_retryable_invoices(
        &self,
        limit: i64,
        retry_after_secs: i64,
    ) -> RepositoryResult<Vec<InvoiceOutboxEntry>> {
        let mut state = self.state.write().await;
        let now = OffsetDateTime::now_utc();
        let cutoff = now - Duration::seconds(retry_after_secs);

        let mut claimed = Vec::new();
        for entry in state.invoices.values_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            let retryable = match entry.status.as_str() {
                "pending" | "processing" => true,
                "failed" => entry.attempts < entry.max_attempts,
                _ => false,
            };
            let due = match entry.last_attempt_at {
                Some(at) => at <= cutoff,
                None => true,
            };
            if retryable && due {
                entry.status = InvoiceDeliveryStatus::Processing.as_str().to_string();
                entry.last_attempt_at = Some(now);
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn purge_sent_invoices(&self, _retention_days: i32) -> RepositoryResult<u64> {
        let mut state = self.state.write().await;
        let before = state.invoices.len();
        state
            .invoices
            .retain(|_, entry| entry.status != InvoiceDeliveryStatus::Sent.as_str());
        Ok((before - state.invoices.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::repository::PersistStage;
    use crate::types::{OrderDraft, TransactionStatus};

    fn widget(id: i64, recurring: bool) -> Widget {
        let now = OffsetDateTime::now_utc();
        Widget {
            id,
            name: format!("Widget {}", id),
            description: "A very nice widget".to_string(),
            inventory_level: 10,
            price: 1000,
            is_recurring: recurring,
            plan_id: recurring.then(|| "price_bronze".to_string()),
            image: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_transaction(amount: i64) -> NewTransaction {
        NewTransaction {
            amount,
            currency: "eur".to_string(),
            last_four: "4242".to_string(),
            expiry_month: 12,
            expiry_year: 2030,
            payment_intent: "pi_123".to_string(),
            payment_method: "pm_123".to_string(),
            bank_return_code: "ch_123".to_string(),
            status: TransactionStatus::Succeeded,
        }
    }

    fn new_customer() -> NewCustomer {
        NewCustomer {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_persist_checkout_assigns_ids_in_order() {
        let repo = InMemoryRepository::new();
        repo.insert_widget(widget(1, false)).await;

        let ids = repo
            .persist_checkout(
                new_customer(),
                new_transaction(1000),
                OrderDraft {
                    widget_id: 1,
                    quantity: 1,
                    amount: 1000,
                },
            )
            .await
            .unwrap();

        assert_eq!((ids.customer_id, ids.transaction_id, ids.order_id), (1, 1, 1));

        let order = repo.get_order_by_id(ids.order_id).await.unwrap();
        assert_eq!(order.customer_id, 1);
        assert_eq!(order.transaction_id, 1);
        assert_eq!(order.status, OrderStatus::Cleared);
    }

    #[tokio::test]
    async fn test_insert_order_rejects_dangling_references() {
        let repo = InMemoryRepository::new();
        let err = repo
            .insert_order(NewOrder {
                widget_id: 1,
                transaction_id: 5,
                customer_id: 5,
                quantity: 1,
                amount: 100,
                status: OrderStatus::Cleared,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Database(_)));
    }

    #[tokio::test]
    async fn test_update_order_status() {
        let repo = InMemoryRepository::new();
        let ids = repo
            .persist_checkout(
                new_customer(),
                new_transaction(500),
                OrderDraft {
                    widget_id: 1,
                    quantity: 1,
                    amount: 500,
                },
            )
            .await
            .unwrap();

        repo.update_order_status(ids.order_id, OrderStatus::Refunded)
            .await
            .unwrap();
        let order = repo.get_order_by_id(ids.order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Refunded);

        assert!(repo
            .update_order_status(99, OrderStatus::Refunded)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_missing_widget_is_not_found() {
        let repo = InMemoryRepository::new();
        assert!(repo.get_widget(3).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_orders_paginates_by_recurrence() {
        let repo = InMemoryRepository::new();
        repo.insert_widget(widget(1, false)).await;
        repo.insert_widget(widget(2, true)).await;

        for widget_id in [1, 1, 1, 2] {
            repo.persist_checkout(
                new_customer(),
                new_transaction(100),
                OrderDraft {
                    widget_id,
                    quantity: 1,
                    amount: 100,
                },
            )
            .await
            .unwrap();
        }

        let sales = repo.list_orders(false, 1, 2).await.unwrap();
        assert_eq!(sales.total, 3);
        assert_eq!(sales.last_page, 2);
        assert_eq!(sales.items.len(), 2);
        assert_eq!(sales.items[0].id, 3);

        let second = repo.list_orders(false, 2, 2).await.unwrap();
        assert_eq!(second.items.len(), 1);

        let subscriptions = repo.list_orders(true, 1, 10).await.unwrap();
        assert_eq!(subscriptions.total, 1);
        assert_eq!(subscriptions.items[0].widget_name, "Widget 2");
    }

    #[tokio::test]
    async fn test_list_orders_huge_page_is_empty() {
        let repo = InMemoryRepository::new();
        repo.insert_widget(widget(1, false)).await;
        repo.persist_checkout(
            new_customer(),
            new_transaction(100),
            OrderDraft {
                widget_id: 1,
                quantity: 1,
                amount: 100,
            },
        )
        .await
        .unwrap();

        let page = repo.list_orders(false, i64::MAX, 100).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_invoice_outbox_lifecycle() {
        let repo = InMemoryRepository::new();
        let id = repo
            .record_pending_invoice(1, serde_json::json!({"id": 1}), 5)
            .await
            .unwrap();

        // Freshly recorded rows are not claimable until the retry delay passes
        assert!(repo.claim_retryable_invoices(10, 300).await.unwrap().is_empty());

        repo.mark_invoice_failed(id, 3, "connection refused")
            .await
            .unwrap();
        let claimed = repo.claim_retryable_invoices(10, 0).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 3);
        assert_eq!(claimed[0].status, "processing");

        repo.mark_invoice_sent(id, 1).await.unwrap();
        assert!(repo.claim_retryable_invoices(10, 0).await.unwrap().is_empty());
        assert_eq!(repo.purge_sent_invoices(0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_invoice_is_not_claimed() {
        let repo = InMemoryRepository::new();
        let id = repo
            .record_pending_invoice(1, serde_json::json!({}), 2)
            .await
            .unwrap();
        repo.mark_invoice_failed(id, 2, "timeout").await.unwrap();
        assert!(repo.claim_retryable_invoices(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_invoice_is_not_claimed() {
        let repo = InMemoryRepository::new();
        let id = repo
            .record_pending_invoice(1, serde_json::json!({}), 5)
            .await
            .unwrap();
        repo.mark_invoice_rejected(id, 1, "422: bad invoice")
            .await
            .unwrap();

        assert!(repo.claim_retryable_invoices(10, 0).await.unwrap().is_empty());
        let row = repo.invoices().await.remove(0);
        assert_eq!(row.status, "rejected");
        assert_eq!(row.attempts, 1);
        assert_eq!(repo.purge_sent_invoices(0).await.unwrap(), 0);
    }

    #[test]
    fn test_persist_stage_names() {
        assert_eq!(PersistStage::Customer.to_string(), "customer");
        assert_eq!(PersistStage::Transaction.to_string(), "transaction");
        assert_eq!(PersistStage::Order.to_string(), "order");
    }
}
