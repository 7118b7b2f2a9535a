//! Stripe-backed payment gateway

use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{Client, Expandable};

use crate::error::{CheckoutError, OrchestratorResult};
use crate::gateway::{
    CardDetails, GatewayCredential, GatewayError, GatewayResult, PaymentGateway, PaymentIntent,
    Subscription, SubscriptionRequest,
};

/// Configuration for the Stripe gateway
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe publishable key, handed to the browser
    pub publishable_key: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> OrchestratorResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| CheckoutError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            publishable_key: std::env::var("STRIPE_PUBLISHABLE_KEY").map_err(|_| {
                CheckoutError::Config("STRIPE_PUBLISHABLE_KEY not set".to_string())
            })?,
        })
    }

    pub fn credential(&self) -> GatewayCredential {
        GatewayCredential::new(&self.secret_key, &self.publishable_key)
    }
}

impl From<stripe::StripeError> for GatewayError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(request_error) => {
                // ErrorCode serializes to the gateway's snake_case wire code
                let code = request_error
                    .code
                    .as_ref()
                    .and_then(|code| serde_json::to_value(code).ok())
                    .and_then(|value| value.as_str().map(str::to_owned));
                let message = request_error.message.clone().unwrap_or_else(|| {
                    format!("gateway returned HTTP {}", request_error.http_status)
                });
                GatewayError::new(code, message)
            }
            other => GatewayError::uncoded(other.to_string()),
        }
    }
}

fn parse_id<T>(kind: &str, raw: &str) -> GatewayResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| GatewayError::uncoded(format!("invalid {} id {:?}: {}", kind, raw, e)))
}

fn parse_currency(raw: &str) -> GatewayResult<stripe::Currency> {
    serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
        .map_err(|_| GatewayError::uncoded(format!("unsupported currency {:?}", raw)))
}

fn map_intent(intent: stripe::PaymentIntent) -> PaymentIntent {
    PaymentIntent {
        id: intent.id.to_string(),
        amount: intent.amount,
        currency: intent.currency.to_string(),
        status: intent.status.to_string(),
        client_secret: intent.client_secret,
        payment_method_id: intent.payment_method.map(|pm| match pm {
            Expandable::Id(id) => id.to_string(),
            Expandable::Object(pm) => pm.id.to_string(),
        }),
        latest_charge_id: intent.latest_charge.map(|charge| match charge {
            Expandable::Id(id) => id.to_string(),
            Expandable::Object(charge) => charge.id.to_string(),
        }),
    }
}

/// [`PaymentGateway`] over the Stripe API.
///
/// Holds no key of its own: a client is built from the caller's credential
/// for every request.
#[derive(Debug, Clone, Default)]
pub struct StripeGateway;

impl StripeGateway {
    pub fn new() -> Self {
        Self
    }

    fn client(&self, credential: &GatewayCredential) -> Client {
        Client::new(credential.secret())
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_intent(
        &self,
        credential: &GatewayCredential,
        currency: &str,
        amount: i64,
    ) -> GatewayResult<PaymentIntent> {
        let client = self.client(credential);
        let mut params = stripe::CreatePaymentIntent::new(amount, parse_currency(currency)?);
        params.payment_method_types = Some(vec!["card".to_owned()]);

        let intent = stripe::PaymentIntent::create(&client, params).await?;

        tracing::info!(
            payment_intent = %intent.id,
            amount = amount,
            currency = %currency,
            "Created payment intent"
        );

        Ok(map_intent(intent))
    }

    async fn retrieve_payment_intent(
        &self,
        credential: &GatewayCredential,
        id: &str,
    ) -> GatewayResult<PaymentIntent> {
        let client = self.client(credential);
        let pi_id: stripe::PaymentIntentId = parse_id("payment intent", id)?;

        let intent = stripe::PaymentIntent::retrieve(&client, &pi_id, &[]).await?;
        Ok(map_intent(intent))
    }

    async fn get_payment_method(
        &self,
        credential: &GatewayCredential,
        id: &str,
    ) -> GatewayResult<CardDetails> {
        let client = self.client(credential);
        let pm_id: stripe::PaymentMethodId = parse_id("payment method", id)?;

        let method = stripe::PaymentMethod::retrieve(&client, &pm_id, &[]).await?;
        let card = method
            .card
            .ok_or_else(|| GatewayError::uncoded(format!("payment method {} has no card", id)))?;

        Ok(CardDetails {
            last_four: card.last4,
            expiry_month: i32::try_from(card.exp_month).unwrap_or_default(),
            expiry_year: i32::try_from(card.exp_year).unwrap_or_default(),
            brand: card.brand.to_string(),
        })
    }

    async fn create_customer(
        &self,
        credential: &GatewayCredential,
        payment_method_id: &str,
        email: &str,
    ) -> GatewayResult<String> {
        let client = self.client(credential);
        let pm_id: stripe::PaymentMethodId = parse_id("payment method", payment_method_id)?;

        let mut params = stripe::CreateCustomer::new();
        params.email = Some(email);
        params.payment_method = Some(pm_id);
        params.invoice_settings = Some(stripe::CustomerInvoiceSettings {
            default_payment_method: Some(payment_method_id.to_string()),
            ..Default::default()
        });

        let customer = stripe::Customer::create(&client, params).await?;

        tracing::info!(customer_id = %customer.id, "Created gateway customer");

        Ok(customer.id.to_string())
    }

    async fn create_subscription(
        &self,
        credential: &GatewayCredential,
        request: SubscriptionRequest,
    ) -> GatewayResult<Subscription> {
        let client = self.client(credential);
        let customer_id: stripe::CustomerId = parse_id("customer", &request.customer_id)?;

        let mut metadata = HashMap::new();
        metadata.insert("last_four".to_string(), request.last_four.clone());
        metadata.insert("card_type".to_string(), request.card_type.clone());

        let mut params = stripe::CreateSubscription::new(customer_id);
        params.items = Some(vec![stripe::CreateSubscriptionItems {
            plan: Some(request.plan_id.clone()),
            ..Default::default()
        }]);
        params.metadata = Some(metadata);
        params.expand = &["latest_invoice.payment_intent"];

        let subscription = stripe::Subscription::create(&client, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            plan_id = %request.plan_id,
            "Created subscription"
        );

        Ok(Subscription {
            id: subscription.id.to_string(),
            status: subscription.status.to_string(),
        })
    }

    async fn refund(
        &self,
        credential: &GatewayCredential,
        payment_intent_id: &str,
        amount: i64,
    ) -> GatewayResult<String> {
        let client = self.client(credential);

        let mut params = stripe::CreateRefund::new();
        params.payment_intent = Some(parse_id("payment intent", payment_intent_id)?);
        params.amount = Some(amount);

        let refund = stripe::Refund::create(&client, params).await?;

        tracing::info!(
            refund_id = %refund.id,
            payment_intent = %payment_intent_id,
            amount = amount,
            "Refunded charge"
        );

        Ok(refund.id.to_string())
    }

    async fn cancel_subscription(
        &self,
        credential: &GatewayCredential,
        subscription_id: &str,
    ) -> GatewayResult<()> {
        let client = self.client(credential);
        let sub_id: stripe::SubscriptionId = parse_id("subscription", subscription_id)?;

        stripe::Subscription::cancel(&client, &sub_id, stripe::CancelSubscription::default())
            .await?;

        tracing::info!(subscription_id = %subscription_id, "Cancelled subscription");

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_currency() {
        assert!(parse_currency("eur").is_ok());
        assert!(parse_currency("USD").is_ok());
    }

    #[test]
    fn test_parse_id_rejects_wrong_prefix() {
        let err = parse_id::<stripe::PaymentIntentId>("payment intent", "sub_123").unwrap_err();
        assert!(err.message.contains("invalid payment intent id"));
        assert_eq!(err.code, None);
    }

    #[test]
    fn test_timeout_maps_to_generic_reason() {
        let err: GatewayError = stripe::StripeError::Timeout.into();
        assert_eq!(err.code, None);
        assert_eq!(err.reason, crate::decline::GENERIC_DECLINE);
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("STRIPE_SECRET_KEY", "sk_test_abc");
        std::env::set_var("STRIPE_PUBLISHABLE_KEY", "pk_test_abc");

        let config = StripeConfig::from_env().unwrap();
        let credential = config.credential();
        assert_eq!(credential.secret(), "sk_test_abc");
        assert_eq!(credential.publishable(), "pk_test_abc");

        std::env::remove_var("STRIPE_PUBLISHABLE_KEY");
        assert!(matches!(
            StripeConfig::from_env(),
            Err(CheckoutError::Config(_))
        ));
        std::env::remove_var("STRIPE_SECRET_KEY");
    }
}
