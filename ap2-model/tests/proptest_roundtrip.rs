//! Property test for the `merchant_authorization` sign/verify round trip
//! (§8's "Test tooling": `ap2-model` uses `proptest` alongside `ap2-crypto`
//! for this same class of law, over arbitrary cart contents this time
//! rather than arbitrary bytes).

use ap2_model::auth::{build_merchant_authorization, cart_hash, verify_merchant_authorization};
use ap2_model::mandate::CartContents;
use ap2_model::payment_request::{PaymentCurrencyAmount, PaymentDetailsInit, PaymentItem, PaymentRequest};
use ap2_crypto::keys::{Algorithm, KeyPair};
use proptest::prelude::*;

fn cart_with(cart_id: String, details_id: String, currency: String, value: String) -> CartContents {
    CartContents {
        id: cart_id,
        user_cart_confirmation_required: true,
        payment_request: PaymentRequest {
            method_data: vec![],
            details: PaymentDetailsInit {
                id: details_id,
                display_items: vec![],
                shipping_options: None,
                total: PaymentItem {
                    label: "Total".into(),
                    amount: PaymentCurrencyAmount { currency, value },
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
        merchant_name: "Acme Shoes".into(),
    }
}

proptest! {
    /// Any cart signed with `build_merchant_authorization` verifies against
    /// its own `cart_hash`, regardless of the cart's id, details id, or total.
    #[test]
    fn merchant_authorization_round_trips_over_arbitrary_carts(
        cart_id in "[a-z_]{1,12}",
        details_id in "[a-z_]{1,12}",
        value in "[1-9][0-9]{0,6}",
    ) {
        let key = KeyPair::generate(Algorithm::EcdsaP256);
        let cart = cart_with(cart_id, details_id, "JPY".to_string(), value);
        let token = build_merchant_authorization(
            &cart,
            "did:ap2:merchant:acme",
            "did:ap2:processor:main",
            &key,
        )
        .unwrap();

        let expected_hash = cart_hash(&cart).unwrap();
        let public_key_hex = hex::encode(key.public_key_bytes());
        let payload = verify_merchant_authorization(&token, &expected_hash, "did:ap2:processor:main", |_kid| {
            Ok(public_key_hex.clone())
        })
        .unwrap();
        prop_assert_eq!(payload.cart_hash, expected_hash);
    }

    /// Changing the cart total after signing always changes `cart_hash`,
    /// which is what lets the Payment Processor detect tampering.
    #[test]
    fn cart_hash_changes_whenever_the_total_does(
        cart_id in "[a-z_]{1,12}",
        details_id in "[a-z_]{1,12}",
        original in "[1-9][0-9]{0,6}",
        mutated in "[1-9][0-9]{0,6}",
    ) {
        prop_assume!(original != mutated);
        let cart = cart_with(cart_id.clone(), details_id.clone(), "JPY".to_string(), original);
        let mut tampered = cart.clone();
        tampered.payment_request.details.total.amount.value = mutated;
        prop_assert_ne!(cart_hash(&cart).unwrap(), cart_hash(&tampered).unwrap());
    }
}
