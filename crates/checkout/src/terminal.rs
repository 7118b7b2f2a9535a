//! Virtual terminal payments
//!
//! An operator charges a card from the back office. The payment is confirmed
//! with the gateway exactly like a storefront checkout, but only the
//! transaction is recorded: there is no customer, order or invoice.

use serde::{Deserialize, Serialize};
use widgetstore_shared::{NewTransaction, PersistStage, TransactionStatus};

use crate::checkout::{required, CheckoutOrchestrator};
use crate::error::{CheckoutError, FailureKind, OrchestratorResult};

/// Payment confirmed in the browser from the virtual terminal page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalPayment {
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub payment_intent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalReceipt {
    pub transaction_id: i64,
    pub amount: i64,
    pub currency: String,
    pub payment_intent: String,
    pub payment_method: String,
    pub last_four: String,
    pub card_brand: String,
    pub expiry_month: i32,
    pub expiry_year: i32,
    pub bank_return_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalResult {
    pub success: bool,
    pub user_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_reason: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<TerminalReceipt>,
}

impl CheckoutOrchestrator {
    /// Records a virtual terminal payment and folds any failure into a uniform result
    pub async fn record_terminal_payment(&self, payment: TerminalPayment) -> TerminalResult {
        match self.try_record_terminal_payment(&payment).await {
            Ok(receipt) => TerminalResult {
                success: true,
                user_message: "Payment recorded".to_string(),
                machine_reason: None,
                receipt: Some(receipt),
            },
            Err(err) => {
                if let CheckoutError::PersistenceFailed { source, .. } = &err {
                    tracing::error!(
                        payment_intent = %payment.payment_intent,
                        amount = payment.amount,
                        error = %source,
                        "Terminal payment taken but not recorded"
                    );
                } else {
                    tracing::warn!(
                        reason = %err.kind(),
                        error = %err,
                        "Terminal payment rejected"
                    );
                }
                TerminalResult {
                    success: false,
                    user_message: err.user_message(),
                    machine_reason: Some(err.kind()),
                    receipt: None,
                }
            }
        }
    }

    pub async fn try_record_terminal_payment(
        &self,
        payment: &TerminalPayment,
    ) -> OrchestratorResult<TerminalReceipt> {
        if payment.amount <= 0 {
            return Err(CheckoutError::InvalidInput(format!(
                "amount must be positive, got {}",
                payment.amount
            )));
        }
        let currency = required("currency", Some(payment.currency.as_str()))?;
        let payment_intent = required("payment_intent", Some(payment.payment_intent.as_str()))?;

        let confirmed = self
            .confirm_payment(payment_intent, payment.amount, currency)
            .await?;

        let transaction_id = self
            .repository
            .insert_transaction(NewTransaction {
                amount: payment.amount,
                currency: currency.to_string(),
                last_four: confirmed.last_four.clone(),
                expiry_month: confirmed.expiry_month,
                expiry_year: confirmed.expiry_year,
                payment_intent: confirmed.payment_intent.clone(),
                payment_method: confirmed.payment_method.clone(),
                bank_return_code: confirmed.bank_return_code.clone(),
                status: TransactionStatus::Succeeded,
            })
            .await
            .map_err(|e| CheckoutError::PersistenceFailed {
                stage: PersistStage::Transaction,
                source: e,
            })?;

        tracing::info!(
            transaction_id = %transaction_id,
            payment_intent = %confirmed.payment_intent,
            amount = payment.amount,
            "Terminal payment recorded"
        );

        Ok(TerminalReceipt {
            transaction_id,
            amount: payment.amount,
            currency: currency.to_string(),
            payment_intent: confirmed.payment_intent,
            payment_method: confirmed.payment_method,
            last_four: confirmed.last_four,
            card_brand: confirmed.card_brand,
            expiry_month: confirmed.expiry_month,
            expiry_year: confirmed.expiry_year,
            bank_return_code: confirmed.bank_return_code,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_accepts_terminal_form_fields() {
        // The terminal page also posts name, email and card fields; they are not stored
        let payment: TerminalPayment = serde_json::from_value(serde_json::json!({
            "amount": 1250,
            "currency": "eur",
            "payment_intent": "pi_123",
            "payment_method": "pm_123",
            "first_name": "A",
            "email": "a@b.com"
        }))
        .unwrap();

        assert_eq!(payment.amount, 1250);
        assert_eq!(payment.payment_intent, "pi_123");
    }
}
