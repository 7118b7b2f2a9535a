//! Checkout orchestration
//!
//! A checkout confirms payment with the gateway, then persists the customer,
//! transaction and order in that order, then requests an invoice. Each step
//! must succeed before the next starts. Nothing already committed is undone
//! on a later failure; the invoice step can only add a warning.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use widgetstore_shared::{
    CheckoutIds, NewCustomer, NewTransaction, OrderDraft, PersistStage, Repository,
    TransactionStatus, Widget,
};

use crate::error::{CheckoutError, FailureKind, OrchestratorResult};
use crate::gateway::{GatewayCredential, GatewayError, PaymentGateway, SubscriptionRequest};
use crate::invoice::{InvoiceDispatcher, InvoiceRequest};

/// Every checkout buys a single unit
const ORDER_QUANTITY: i32 = 1;

/// Success message returned to the storefront
const CHECKOUT_SUCCEEDED: &str = "Transaction successful";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutFlow {
    OneOff,
    Subscription,
}

/// Payment authorization submitted by the storefront
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutInput {
    pub flow: CheckoutFlow,
    /// Confirmed payment intent (one-off flow)
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Payment method to subscribe with (subscription flow)
    #[serde(default)]
    pub payment_method: Option<String>,
    pub currency: String,
    /// Whole minor units as ASCII digits, e.g. "5000"
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

/// What the customer bought and how it was paid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub order_id: i64,
    pub customer_id: i64,
    pub transaction_id: i64,
    pub widget_id: i64,
    pub product: String,
    pub amount: i64,
    pub currency: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Payment intent id, or subscription id for subscriptions
    pub payment_intent: String,
    pub payment_method: String,
    pub last_four: String,
    pub card_brand: String,
    pub expiry_month: i32,
    pub expiry_year: i32,
    pub bank_return_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutOutcome {
    pub ids: CheckoutIds,
    pub receipt: Receipt,
    /// Non-fatal problems, e.g. an invoice that could not be requested
    pub warnings: Vec<String>,
}

/// Uniform checkout result handed back to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    pub user_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_reason: Option<FailureKind>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

impl CheckoutResult {
    pub fn succeeded(outcome: CheckoutOutcome) -> Self {
        Self {
            success: true,
            order_id: Some(outcome.ids.order_id),
            user_message: CHECKOUT_SUCCEEDED.to_string(),
            machine_reason: None,
            warnings: outcome.warnings,
            receipt: Some(outcome.receipt),
        }
    }

    pub fn failed(err: &CheckoutError) -> Self {
        Self {
            success: false,
            order_id: None,
            user_message: err.user_message(),
            machine_reason: Some(err.kind()),
            warnings: Vec::new(),
            receipt: None,
        }
    }
}

/// Parses an amount of whole minor units. Only ASCII digits are accepted, so
/// signs, decimal points and whitespace are all rejected.
pub fn parse_amount(raw: &str) -> OrchestratorResult<i64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CheckoutError::InvalidInput(format!(
            "amount must be whole minor units, got {:?}",
            raw
        )));
    }
    raw.parse::<i64>()
        .map_err(|_| CheckoutError::InvalidInput(format!("amount {} is out of range", raw)))
}

fn parse_widget_id(raw: &str) -> OrchestratorResult<i64> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(CheckoutError::InvalidInput(format!(
            "widget id must be a positive integer, got {:?}",
            raw
        ))),
    }
}

pub(crate) fn required<'a>(field: &str, value: Option<&'a str>) -> OrchestratorResult<&'a str> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(CheckoutError::InvalidInput(format!("{} is required", field))),
    }
}

/// Input that passed validation
struct ValidatedCheckout<'a> {
    amount: i64,
    widget_id: i64,
    gateway_ref: &'a str,
}

/// Gateway-side result of a confirmed payment
pub(crate) struct ConfirmedPayment {
    pub(crate) payment_intent: String,
    pub(crate) payment_method: String,
    pub(crate) last_four: String,
    pub(crate) card_brand: String,
    pub(crate) expiry_month: i32,
    pub(crate) expiry_year: i32,
    pub(crate) bank_return_code: String,
}

/// Drives the checkout and reversal flows across gateway, store and invoicing
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    pub(crate) repository: Arc<dyn Repository>,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub(crate) credential: GatewayCredential,
    invoices: InvoiceDispatcher,
}

impl CheckoutOrchestrator {
    pub fn new(
        repository: Arc<dyn Repository>,
        gateway: Arc<dyn PaymentGateway>,
        credential: GatewayCredential,
        invoices: InvoiceDispatcher,
    ) -> Self {
        Self {
            repository,
            gateway,
            credential,
            invoices,
        }
    }

    pub fn credential(&self) -> &GatewayCredential {
        &self.credential
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Runs a checkout and folds any failure into a uniform result
    pub async fn execute_checkout(&self, input: CheckoutInput) -> CheckoutResult {
        match self.try_execute_checkout(&input).await {
            Ok(outcome) => CheckoutResult::succeeded(outcome),
            Err(err) => {
                match &err {
                    CheckoutError::PersistenceFailed { stage, source } => {
                        tracing::error!(
                            stage = %stage,
                            error = %source,
                            email = %input.email,
                            "Checkout failed after payment was taken"
                        );
                    }
                    CheckoutError::InvalidInput(_) => {
                        tracing::info!(error = %err, "Rejected checkout input");
                    }
                    _ => {
                        tracing::warn!(
                            reason = %err.kind(),
                            error = %err,
                            "Checkout failed"
                        );
                    }
                }
                CheckoutResult::failed(&err)
            }
        }
    }

    pub async fn try_execute_checkout(
        &self,
        input: &CheckoutInput,
    ) -> OrchestratorResult<CheckoutOutcome> {
        let validated = self.validate(input)?;
        let widget = self.load_widget(validated.widget_id).await?;

        let payment = match input.flow {
            CheckoutFlow::OneOff => {
                self.confirm_payment(validated.gateway_ref, validated.amount, &input.currency)
                    .await?
            }
            CheckoutFlow::Subscription => {
                self.subscribe(input, &widget, validated.gateway_ref)
                    .await?
            }
        };

        let customer = NewCustomer {
            first_name: input.first_name.clone(),
            last_name: input.last_name.clone(),
            email: input.email.clone(),
        };
        let transaction = NewTransaction {
            amount: validated.amount,
            currency: input.currency.clone(),
            last_four: payment.last_four.clone(),
            expiry_month: payment.expiry_month,
            expiry_year: payment.expiry_year,
            payment_intent: payment.payment_intent.clone(),
            payment_method: payment.payment_method.clone(),
            bank_return_code: payment.bank_return_code.clone(),
            status: TransactionStatus::Succeeded,
        };
        let order = OrderDraft {
            widget_id: widget.id,
            quantity: ORDER_QUANTITY,
            amount: validated.amount,
        };

        let ids = self
            .repository
            .persist_checkout(customer, transaction, order)
            .await
            .map_err(|e| CheckoutError::PersistenceFailed {
                stage: e.stage,
                source: e.source,
            })?;

        tracing::info!(
            order_id = %ids.order_id,
            transaction_id = %ids.transaction_id,
            widget_id = %widget.id,
            amount = validated.amount,
            "Checkout recorded"
        );

        let mut warnings = Vec::new();
        let invoice = InvoiceRequest {
            id: ids.order_id,
            quantity: ORDER_QUANTITY,
            amount: validated.amount,
            product: widget.name.clone(),
            first_name: input.first_name.clone(),
            last_name: input.last_name.clone(),
            email: input.email.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        if let Err(e) = self.invoices.dispatch(&invoice).await {
            tracing::warn!(
                order_id = %ids.order_id,
                error = %e,
                "Invoice could not be requested - checkout unaffected"
            );
            warnings.push(format!("Invoice could not be sent yet: {}", e));
        }

        Ok(CheckoutOutcome {
            ids,
            receipt: Receipt {
                order_id: ids.order_id,
                customer_id: ids.customer_id,
                transaction_id: ids.transaction_id,
                widget_id: widget.id,
                product: widget.name,
                amount: validated.amount,
                currency: input.currency.clone(),
                first_name: input.first_name.clone(),
                last_name: input.last_name.clone(),
                email: input.email.clone(),
                payment_intent: payment.payment_intent,
                payment_method: payment.payment_method,
                last_four: payment.last_four,
                card_brand: payment.card_brand,
                expiry_month: payment.expiry_month,
                expiry_year: payment.expiry_year,
                bank_return_code: payment.bank_return_code,
            },
            warnings,
        })
    }

    fn validate<'a>(&self, input: &'a CheckoutInput) -> OrchestratorResult<ValidatedCheckout<'a>> {
        let amount = parse_amount(&input.amount)?;
        let widget_id = parse_widget_id(&input.widget_id)?;
        required("currency", Some(input.currency.as_str()))?;
        let gateway_ref = match input.flow {
            CheckoutFlow::OneOff => required("payment_intent", input.payment_intent.as_deref())?,
            CheckoutFlow::Subscription => {
                required("payment_method", input.payment_method.as_deref())?
            }
        };

        Ok(ValidatedCheckout {
            amount,
            widget_id,
            gateway_ref,
        })
    }

    async fn load_widget(&self, widget_id: i64) -> OrchestratorResult<Widget> {
        self.repository
            .get_widget(widget_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    CheckoutError::InvalidInput(format!("unknown widget {}", widget_id))
                } else {
                    CheckoutError::PersistenceFailed {
                        stage: PersistStage::Widget,
                        source: e,
                    }
                }
            })
    }

    /// Checks a payment intent succeeded for exactly `amount` in `currency`
    /// and reads the card it was paid with
    pub(crate) async fn confirm_payment(
        &self,
        payment_intent: &str,
        amount: i64,
        currency: &str,
    ) -> OrchestratorResult<ConfirmedPayment> {
        let intent = self
            .gateway
            .retrieve_payment_intent(&self.credential, payment_intent)
            .await
            .map_err(confirmation_failed)?;

        if !intent.is_succeeded() {
            return Err(confirmation_failed(GatewayError::uncoded(format!(
                "payment intent {} has status {}",
                intent.id, intent.status
            ))));
        }

        // The charge must be for what is being recorded
        if intent.amount != amount || !intent.currency.eq_ignore_ascii_case(currency.trim()) {
            return Err(confirmation_failed(GatewayError::uncoded(format!(
                "payment intent {} is for {} {}, checkout is for {} {}",
                intent.id, intent.amount, intent.currency, amount, currency
            ))));
        }

        let payment_method = intent.payment_method_id.clone().ok_or_else(|| {
            confirmation_failed(GatewayError::uncoded(format!(
                "payment intent {} has no payment method",
                intent.id
            )))
        })?;

        let card = self
            .gateway
            .get_payment_method(&self.credential, &payment_method)
            .await
            .map_err(confirmation_failed)?;

        Ok(ConfirmedPayment {
            payment_intent: intent.id,
            payment_method,
            last_four: card.last_four,
            card_brand: card.brand,
            expiry_month: card.expiry_month,
            expiry_year: card.expiry_year,
            bank_return_code: intent.latest_charge_id.unwrap_or_default(),
        })
    }

    async fn subscribe(
        &self,
        input: &CheckoutInput,
        widget: &Widget,
        payment_method: &str,
    ) -> OrchestratorResult<ConfirmedPayment> {
        let plan_id = input
            .plan_id
            .as_deref()
            .map(str::trim)
            .filter(|plan| !plan.is_empty())
            .or(widget.plan_id.as_deref())
            .ok_or_else(|| {
                CheckoutError::InvalidInput(format!("widget {} has no plan", widget.id))
            })?
            .to_string();

        let last_four = input.last_four.clone().unwrap_or_default();
        let card_brand = input.card_brand.clone().unwrap_or_default();

        let customer_id = self
            .gateway
            .create_customer(&self.credential, payment_method, &input.email)
            .await
            .map_err(setup_failed)?;

        let subscription = self
            .gateway
            .create_subscription(
                &self.credential,
                SubscriptionRequest {
                    customer_id,
                    plan_id,
                    email: input.email.clone(),
                    last_four: last_four.clone(),
                    card_type: card_brand.clone(),
                },
            )
            .await
            .map_err(setup_failed)?;

        Ok(ConfirmedPayment {
            payment_intent: subscription.id,
            payment_method: payment_method.to_string(),
            last_four,
            card_brand,
            expiry_month: input.expiry_month.unwrap_or_default(),
            expiry_year: input.expiry_year.unwrap_or_default(),
            bank_return_code: String::new(),
        })
    }
}

fn confirmation_failed(err: GatewayError) -> CheckoutError {
    tracing::warn!(code = ?err.code, error = %err.message, "Payment confirmation failed");
    CheckoutError::GatewayConfirmationFailed { reason: err.reason }
}

fn setup_failed(err: GatewayError) -> CheckoutError {
    tracing::warn!(code = ?err.code, error = %err.message, "Subscription setup failed");
    CheckoutError::SubscriptionSetupFailed { reason: err.reason }
}
