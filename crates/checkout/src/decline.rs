//! Gateway error code to customer-facing message mapping

/// Shown for declines without a recognised code
pub const GENERIC_DECLINE: &str = "Your card has been declined";

/// Known gateway error codes and the message shown to the card holder
pub const DECLINE_REASONS: &[(&str, &str)] = &[
    ("card_declined", "Your card has been declined"),
    ("expired_card", "Your card is expired"),
    ("incorrect_cvc", "Incorrect CVC code"),
    ("incorrect_zip", "Incorrect ZIP/postal code"),
    (
        "amount_too_large",
        "The amount is too large to charge to your card",
    ),
    (
        "amount_too_small",
        "The amount is too small to charge to your card",
    ),
    ("balance_insufficient", "Insufficient balance"),
    ("postal_code_invalid", "Incorrect postal code"),
];

/// Message for a gateway error code. Unknown or missing codes get [`GENERIC_DECLINE`].
pub fn decline_reason(code: Option<&str>) -> &'static str {
    code.and_then(|code| {
        DECLINE_REASONS
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, reason)| *reason)
    })
    .unwrap_or(GENERIC_DECLINE)
}
