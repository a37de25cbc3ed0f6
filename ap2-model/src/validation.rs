//! Pure, network-free structural checks shared by every validator that
//! touches the mandate chain (§3 "Chain binding invariants").
//!
//! These are the checks that don't require a DID resolver, a credential
//! store, or a nonce ledger — just the mandates themselves. The Payment
//! Processor's full chain validator (`ap2-payment-processor`) composes these
//! with the cryptographic and downstream checks from §4.9.

use crate::error::{Error, Result};
use crate::mandate::{CartMandate, IntentMandate, PaymentMandate};
use chrono::{DateTime, Utc};

/// Parse an ISO-8601 timestamp, failing with `SchemaInvalid` on malformed input.
pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::SchemaInvalid(format!("bad timestamp {s:?}: {e}")))
}

/// `cart_mandate.contents.payment_request.details.id ==
/// payment_mandate.payment_mandate_contents.payment_details_id`, and the two
/// `PaymentItem` totals (currency + value) agree.
pub fn check_reference_integrity(cart: &CartMandate, payment: &PaymentMandate) -> Result<()> {
    let cart_details_id = &cart.contents.payment_request.details.id;
    let payment_details_id = &payment.payment_mandate_contents.payment_details_id;
    if cart_details_id != payment_details_id {
        return Err(Error::ReferenceMismatch(format!(
            "cart details id {cart_details_id} != payment details id {payment_details_id}"
        )));
    }

    let cart_total = &cart.contents.payment_request.details.total;
    let payment_total = &payment.payment_mandate_contents.payment_details_total;
    if cart_total.amount.currency != payment_total.amount.currency
        || cart_total.amount.value != payment_total.amount.value
    {
        return Err(Error::ReferenceMismatch(format!(
            "cart total {:?} != payment total {:?}",
            cart_total.amount, payment_total.amount
        )));
    }
    Ok(())
}

/// `cart_mandate.contents.cart_expiry > now`.
pub fn check_cart_not_expired(cart: &CartMandate) -> Result<()> {
    let expiry = parse_rfc3339(&cart.contents.cart_expiry)?;
    if expiry <= Utc::now() {
        return Err(Error::MandateExpired(format!(
            "cart {} expired at {}",
            cart.contents.id, cart.contents.cart_expiry
        )));
    }
    Ok(())
}

/// `intent_mandate.intent_expiry > now`.
pub fn check_intent_not_expired(intent: &IntentMandate) -> Result<()> {
    let expiry = parse_rfc3339(&intent.intent_expiry)?;
    if expiry <= Utc::now() {
        return Err(Error::MandateExpired(format!(
            "intent {} expired at {}",
            intent.id, intent.intent_expiry
        )));
    }
    Ok(())
}

/// Parse a decimal `PaymentCurrencyAmount.value` as an `f64` for comparison
/// purposes only (never for hashing — the canonical-JSON hash always uses
/// the original decimal string).
fn parse_amount(value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|e| Error::SchemaInvalid(format!("amount {value:?} is not numeric: {e}")))
}

/// Total currency on the cart must not exceed the IntentMandate's declared
/// maximum, when one was declared, and currencies must match.
pub fn check_amount_within_intent(cart: &CartMandate, intent: &IntentMandate) -> Result<()> {
    let Some(max) = &intent.max_amount else {
        return Ok(());
    };
    let total = &cart.contents.payment_request.details.total.amount;
    if total.currency != max.currency {
        return Err(Error::SchemaInvalid(format!(
            "cart currency {} does not match intent max_amount currency {}",
            total.currency, max.currency
        )));
    }
    if parse_amount(&total.value)? > parse_amount(&max.value)? {
        return Err(Error::AmountExceedsIntent);
    }
    Ok(())
}

/// The merchant DID asserted in `merchant_authorization.iss` must be in the
/// IntentMandate's `merchants` allow-list, when one was declared.
pub fn check_merchant_allowed(merchant_did: &str, intent: &IntentMandate) -> Result<()> {
    let Some(allow_list) = &intent.merchants else {
        return Ok(());
    };
    if !allow_list.iter().any(|m| m == merchant_did) {
        return Err(Error::MerchantNotAllowed(merchant_did.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_request::*;

    fn intent_with_max(value: &str) -> IntentMandate {
        IntentMandate {
            id: "intent_1".into(),
            natural_language_description: "red high-top basketball shoes".into(),
            intent_expiry: "2999-01-01T00:00:00Z".into(),
            user_cart_confirmation_required: true,
            merchants: None,
            skus: None,
            requires_refundability: None,
            max_amount: Some(PaymentCurrencyAmount {
                currency: "JPY".into(),
                value: value.into(),
            }),
        }
    }

    fn cart_with_total(value: &str) -> CartMandate {
        CartMandate {
            contents: crate::mandate::CartContents {
                id: "cart_1".into(),
                user_cart_confirmation_required: true,
                payment_request: PaymentRequest {
                    method_data: vec![],
                    details: PaymentDetailsInit {
                        id: "details_1".into(),
                        display_items: vec![],
                        shipping_options: None,
                        total: PaymentItem {
                            label: "Total".into(),
                            amount: PaymentCurrencyAmount {
                                currency: "JPY".into(),
                                value: value.into(),
                            },
                            sku: None,
                            quantity: None,
                            pending: None,
                            refund_period: None,
                        },
                        modifiers: None,
                    },
                    options: None,
                    shipping_address: None,
                },
                cart_expiry: "2999-01-01T00:00:00Z".into(),
                merchant_name: "Acme".into(),
            },
            merchant_authorization: None,
        }
    }

    #[test]
    fn amount_within_intent_passes() {
        let intent = intent_with_max("50000");
        let cart = cart_with_total("8068");
        assert!(check_amount_within_intent(&cart, &intent).is_ok());
    }

    #[test]
    fn amount_exceeding_intent_fails() {
        let intent = intent_with_max("5000");
        let cart = cart_with_total("8068");
        assert!(matches!(
            check_amount_within_intent(&cart, &intent),
            Err(Error::AmountExceedsIntent)
        ));
    }

    #[test]
    fn merchant_allow_list_enforced() {
        let mut intent = intent_with_max("50000");
        intent.merchants = Some(vec!["did:ap2:merchant:acme".into()]);
        assert!(check_merchant_allowed("did:ap2:merchant:acme", &intent).is_ok());
        assert!(check_merchant_allowed("did:ap2:merchant:evil", &intent).is_err());
    }
}
