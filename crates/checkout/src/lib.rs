//! Widget store checkout core
//!
//! Confirms payments with the card gateway, records customers, transactions
//! and orders, requests invoices, reverses charges, and records back-office
//! terminal payments.

pub mod checkout;
pub mod client;
pub mod decline;
pub mod error;
pub mod gateway;
pub mod invoice;
pub mod reversal;
pub mod terminal;

pub use checkout::{
    parse_amount, CheckoutFlow, CheckoutInput, CheckoutOrchestrator, CheckoutOutcome,
    CheckoutResult, Receipt,
};
pub use client::{StripeConfig, StripeGateway};
pub use decline::{decline_reason, GENERIC_DECLINE};
pub use error::{CheckoutError, FailureKind, OrchestratorResult, GENERIC_FAILURE};
pub use gateway::{
    CardDetails, GatewayCredential, GatewayError, GatewayResult, PaymentGateway, PaymentIntent,
    Subscription, SubscriptionRequest,
};
pub use invoice::{
    HttpInvoiceClient, InvoiceClient, InvoiceConfig, InvoiceDispatcher, InvoiceError,
    InvoiceRequest,
};
pub use reversal::{ReversalKind, ReversalRequest, ReversalResult};
pub use terminal::{TerminalPayment, TerminalReceipt, TerminalResult};
