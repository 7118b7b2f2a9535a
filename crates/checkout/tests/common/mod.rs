//! Test doubles shared by the checkout integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use widgetstore_checkout::{
    CardDetails, CheckoutFlow, CheckoutInput, CheckoutOrchestrator, GatewayCredential,
    GatewayError, GatewayResult, InvoiceClient, InvoiceConfig, InvoiceDispatcher, InvoiceError,
    InvoiceRequest, PaymentGateway, PaymentIntent, Subscription, SubscriptionRequest,
};
use widgetstore_shared::{
    InMemoryRepository, NewCustomer, NewOrder, NewTransaction, Order, OrderStatus, OrderSummary,
    Page, Repository, RepositoryError, RepositoryResult, User, Widget,
};

// ============================================================================
// Recording repository
// ============================================================================

/// In-memory repository that records every call and can be told to fail
/// specific operations. Uses the trait's default `persist_checkout`, so the
/// individual inserts are observable.
#[derive(Clone, Default)]
pub struct RecordingRepository {
    pub store: InMemoryRepository,
    calls: Arc<Mutex<Vec<&'static str>>>,
    failing: Arc<Mutex<HashSet<&'static str>>>,
    timing_out: Arc<Mutex<HashSet<&'static str>>>,
}

impl RecordingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    /// Makes `operation` fail as if the store stopped answering
    pub fn time_out_on(&self, operation: &'static str) {
        self.timing_out.lock().unwrap().insert(operation);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str) -> RepositoryResult<()> {
        self.calls.lock().unwrap().push(operation);
        if self.timing_out.lock().unwrap().contains(operation) {
            return Err(RepositoryError::Timeout(3000));
        }
        if self.failing.lock().unwrap().contains(operation) {
            return Err(RepositoryError::Database(format!(
                "{} failed: connection reset",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for RecordingRepository {
    async fn get_widget(&self, id: i64) -> RepositoryResult<Widget> {
        self.record("get_widget")?;
        self.store.get_widget(id).await
    }

    async fn insert_customer(&self, customer: NewCustomer) -> RepositoryResult<i64> {
        self.record("insert_customer")?;
        self.store.insert_customer(customer).await
    }

    async fn insert_transaction(&self, transaction: NewTransaction) -> RepositoryResult<i64> {
        self.record("insert_transaction")?;
        self.store.insert_transaction(transaction).await
    }

    async fn insert_order(&self, order: NewOrder) -> RepositoryResult<i64> {
        self.record("insert_order")?;
        self.store.insert_order(order).await
    }

    async fn get_order_by_id(&self, id: i64) -> RepositoryResult<Order> {
        self.record("get_order_by_id")?;
        self.store.get_order_by_id(id).await
    }

    async fn update_order_status(&self, id: i64, status: OrderStatus) -> RepositoryResult<()> {
        self.record("update_order_status")?;
        self.store.update_order_status(id, status).await
    }

    async fn list_orders(
        &self,
        recurring: bool,
        page: i64,
        page_size: i64,
    ) -> RepositoryResult<Page<OrderSummary>> {
        self.record("list_orders")?;
        self.store.list_orders(recurring, page, page_size).await
    }

    async fn get_user_by_id(&self, id: i64) -> RepositoryResult<User> {
        self.record("get_user_by_id")?;
        self.store.get_user_by_id(id).await
    }

    async fn list_users(&self) -> RepositoryResult<Vec<User>> {
        self.record("list_users")?;
        self.store.list_users().await
    }
}

// ============================================================================
// Stub gateway
// ============================================================================

/// Gateway double. Confirms everything unless a failure code is configured.
#[derive(Clone, Default)]
pub struct StubGateway {
    calls: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<Option<(&'static str, Option<String>)>>>,
    intent_status: Arc<Mutex<Option<String>>>,
    intent_amount: Arc<Mutex<Option<(i64, String)>>>,
}

impl StubGateway {
    pub fn confirming() -> Self {
        Self::default()
    }

    /// Makes `operation` fail with the given gateway code
    pub fn failing(operation: &'static str, code: Option<&str>) -> Self {
        let gateway = Self::default();
        *gateway.failing.lock().unwrap() = Some((operation, code.map(str::to_string)));
        gateway
    }

    pub fn with_intent_status(self, status: &str) -> Self {
        *self.intent_status.lock().unwrap() = Some(status.to_string());
        self
    }

    /// Amount and currency reported by retrieved intents (default 5000 eur)
    pub fn with_intent_amount(self, amount: i64, currency: &str) -> Self {
        *self.intent_amount.lock().unwrap() = Some((amount, currency.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, credential: &GatewayCredential) -> GatewayResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", operation, credential.secret()));
        match &*self.failing.lock().unwrap() {
            Some((failing, code)) if *failing == operation => Err(GatewayError::new(
                code.clone(),
                format!("{} rejected by gateway", operation),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_payment_intent(
        &self,
        credential: &GatewayCredential,
        currency: &str,
        amount: i64,
    ) -> GatewayResult<PaymentIntent> {
        self.record("create_payment_intent", credential)?;
        Ok(PaymentIntent {
            id: "pi_new".to_string(),
            amount,
            currency: currency.to_string(),
            status: "requires_payment_method".to_string(),
            client_secret: Some("pi_new_secret_abc".to_string()),
            payment_method_id: None,
            latest_charge_id: None,
        })
    }

    async fn retrieve_payment_intent(
        &self,
        credential: &GatewayCredential,
        id: &str,
    ) -> GatewayResult<PaymentIntent> {
        self.record("retrieve_payment_intent", credential)?;
        let status = self
            .intent_status
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "succeeded".to_string());
        let (amount, currency) = self
            .intent_amount
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| (5000, "eur".to_string()));
        Ok(PaymentIntent {
            id: id.to_string(),
            amount,
            currency,
            status,
            client_secret: None,
            payment_method_id: Some("pm_card_visa".to_string()),
            latest_charge_id: Some("ch_123".to_string()),
        })
    }

    async fn get_payment_method(
        &self,
        credential: &GatewayCredential,
        _id: &str,
    ) -> GatewayResult<CardDetails> {
        self.record("get_payment_method", credential)?;
        Ok(CardDetails {
            last_four: "4242".to_string(),
            expiry_month: 12,
            expiry_year: 2030,
            brand: "visa".to_string(),
        })
    }

    async fn create_customer(
        &self,
        credential: &GatewayCredential,
        _payment_method_id: &str,
        _email: &str,
    ) -> GatewayResult<String> {
        self.record("create_customer", credential)?;
        Ok("cus_123".to_string())
    }

    async fn create_subscription(
        &self,
        credential: &GatewayCredential,
        request: SubscriptionRequest,
    ) -> GatewayResult<Subscription> {
        self.record("create_subscription", credential)?;
        Ok(Subscription {
            id: format!("sub_for_{}", request.plan_id),
            status: "active".to_string(),
        })
    }

    async fn refund(
        &self,
        credential: &GatewayCredential,
        _payment_intent_id: &str,
        _amount: i64,
    ) -> GatewayResult<String> {
        self.record("refund", credential)?;
        Ok("re_123".to_string())
    }

    async fn cancel_subscription(
        &self,
        credential: &GatewayCredential,
        _subscription_id: &str,
    ) -> GatewayResult<()> {
        self.record("cancel_subscription", credential)
    }
}

// ============================================================================
// Stub invoice client
// ============================================================================

#[derive(Clone, Default)]
pub struct StubInvoiceClient {
    requests: Arc<Mutex<Vec<InvoiceRequest>>>,
    failing: bool,
}

impl StubInvoiceClient {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<InvoiceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl InvoiceClient for StubInvoiceClient {
    async fn request_invoice(&self, request: &InvoiceRequest) -> Result<(), InvoiceError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing {
            return Err(InvoiceError::Status {
                status: 503,
                body: "invoice service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub const TEST_SECRET: &str = "sk_test_fixture";

pub fn credential() -> GatewayCredential {
    GatewayCredential::new(TEST_SECRET, "pk_test_fixture")
}

pub fn widget(id: i64, name: &str, recurring: bool) -> Widget {
    let now = OffsetDateTime::now_utc();
    Widget {
        id,
        name: name.to_string(),
        description: String::new(),
        inventory_level: 10,
        price: 5000,
        is_recurring: recurring,
        plan_id: recurring.then(|| "price_bronze".to_string()),
        image: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn one_off_input(amount: &str) -> CheckoutInput {
    CheckoutInput {
        flow: CheckoutFlow::OneOff,
        payment_intent: Some("pi_ok".to_string()),
        payment_method: None,
        currency: "eur".to_string(),
        amount: amount.to_string(),
        widget_id: "2".to_string(),
        first_name: "A".to_string(),
        last_name: "B".to_string(),
        email: "a@b.com".to_string(),
        plan_id: None,
        last_four: None,
        card_brand: None,
        expiry_month: None,
        expiry_year: None,
    }
}

pub fn subscription_input() -> CheckoutInput {
    CheckoutInput {
        flow: CheckoutFlow::Subscription,
        payment_intent: None,
        payment_method: Some("pm_card_visa".to_string()),
        currency: "eur".to_string(),
        amount: "2000".to_string(),
        widget_id: "3".to_string(),
        first_name: "A".to_string(),
        last_name: "B".to_string(),
        email: "a@b.com".to_string(),
        plan_id: None,
        last_four: Some("4242".to_string()),
        card_brand: Some("visa".to_string()),
        expiry_month: Some(11),
        expiry_year: Some(2031),
    }
}

/// Everything a test needs to drive and inspect the orchestrator
pub struct Harness {
    pub orchestrator: CheckoutOrchestrator,
    pub repository: RecordingRepository,
    pub gateway: StubGateway,
    pub invoices: StubInvoiceClient,
    pub outbox: InMemoryRepository,
}

impl Harness {
    pub async fn new(gateway: StubGateway, invoices: StubInvoiceClient) -> Self {
        let repository = RecordingRepository::new();
        repository
            .store
            .insert_widget(widget(2, "Custom Widget", false))
            .await;
        repository
            .store
            .insert_widget(widget(3, "Bronze Plan", true))
            .await;

        let outbox = InMemoryRepository::new();
        let dispatcher = InvoiceDispatcher::new(
            Arc::new(invoices.clone()),
            Arc::new(outbox.clone()),
            InvoiceConfig {
                max_attempts: 2,
                retry_base_delay: Duration::from_millis(1),
                retry_max_delay: Duration::from_millis(2),
                timeout: Duration::from_millis(500),
                ..InvoiceConfig::default()
            },
        );

        let orchestrator = CheckoutOrchestrator::new(
            Arc::new(repository.clone()),
            Arc::new(gateway.clone()),
            credential(),
            dispatcher,
        );

        Self {
            orchestrator,
            repository,
            gateway,
            invoices,
            outbox,
        }
    }

    pub async fn confirming() -> Self {
        Self::new(StubGateway::confirming(), StubInvoiceClient::succeeding()).await
    }
}
