//! Domain logic for `POST /sign/cart` (§4.5).

use crate::error::{Error, Result};
use crate::storage::Storage;
use ap2_crypto::keys::KeyPair;
use ap2_model::auth::build_merchant_authorization;
use ap2_model::mandate::{CartContents, CartMandate};
use ap2_model::validation::parse_rfc3339;
use chrono::Utc;

/// §4.5 step 1: structural validation that doesn't touch inventory.
pub fn validate_cart_contents(contents: &CartContents) -> Result<()> {
    let currency = &contents.payment_request.details.total.amount.currency;

    let total_value: f64 = contents
        .payment_request
        .details
        .total
        .amount
        .value
        .parse()
        .map_err(|_| Error::InvalidCart("total amount is not numeric".to_string()))?;
    if total_value <= 0.0 {
        return Err(Error::InvalidCart("total amount must be positive".to_string()));
    }

    for item in &contents.payment_request.details.display_items {
        if item.amount.currency != *currency {
            return Err(Error::InvalidCart(format!(
                "currency mismatch: total is {currency}, line item {} is {}",
                item.label, item.amount.currency
            )));
        }
        let value: f64 = item
            .amount
            .value
            .parse()
            .map_err(|_| Error::InvalidCart(format!("line item {} amount is not numeric", item.label)))?;
        if !value.is_finite() {
            return Err(Error::InvalidCart(format!("line item {} amount is not finite", item.label)));
        }
        if let Some(quantity) = item.quantity {
            if item.sku.is_some() && quantity == 0 {
                return Err(Error::InvalidCart(format!("line item {} has zero quantity", item.label)));
            }
        }
    }

    let expiry = parse_rfc3339(&contents.cart_expiry).map_err(|e| Error::InvalidCart(e.to_string()))?;
    if expiry <= Utc::now() {
        return Err(Error::InvalidCart("cart_expiry is not in the future".to_string()));
    }

    if let Some(address) = &contents.payment_request.shipping_address {
        if address.recipient.trim().is_empty()
            || address.address_line.is_empty()
            || address.city.trim().is_empty()
            || address.postal_code.trim().is_empty()
            || address.country.trim().is_empty()
        {
            return Err(Error::InvalidCart("shipping address is incomplete".to_string()));
        }
    }

    Ok(())
}

/// The sku/quantity pairs a cart's line items reserve from inventory.
fn reservable_items(contents: &CartContents) -> Vec<(String, i64)> {
    contents
        .payment_request
        .details
        .display_items
        .iter()
        .filter_map(|item| {
            let sku = item.sku.clone()?;
            let quantity = item.quantity.unwrap_or(1) as i64;
            Some((sku, quantity))
        })
        .collect()
}

/// Full §4.5 procedure: validate, reserve inventory, sign, persist. On any
/// failure after a successful reservation, the reservation is released
/// before the error is returned.
pub async fn sign_cart(
    storage: &Storage,
    contents: CartContents,
    merchant_did: &str,
    payment_processor_did: &str,
    merchant_key: &KeyPair,
) -> Result<(CartMandate, String)> {
    validate_cart_contents(&contents)?;

    let expiry = parse_rfc3339(&contents.cart_expiry).map_err(|e| Error::InvalidCart(e.to_string()))?;
    let items = reservable_items(&contents);
    if !items.is_empty() {
        let skus: Vec<String> = items.iter().map(|(sku, _)| sku.clone()).collect();
        let missing = storage.missing_skus(skus).await?;
        if !missing.is_empty() {
            return Err(Error::InvalidCart(format!("unknown sku(s): {}", missing.join(", "))));
        }
        storage.reserve_cart(&contents.id, items, expiry).await?;
    }

    let authorization = match build_merchant_authorization(&contents, merchant_did, payment_processor_did, merchant_key) {
        Ok(auth) => auth,
        Err(e) => {
            storage.release_cart(&contents.id).await.ok();
            return Err(e.into());
        }
    };

    let cart_mandate = CartMandate {
        contents: contents.clone(),
        merchant_authorization: Some(authorization.clone()),
    };

    let cart_json = serde_json::to_string(&cart_mandate)?;
    if let Err(e) = storage.record_signed_cart(&contents.id, &cart_json, &authorization).await {
        storage.release_cart(&contents.id).await.ok();
        return Err(e);
    }

    Ok((cart_mandate, authorization))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_crypto::keys::Algorithm;
    use ap2_model::payment_request::*;

    fn base_contents() -> CartContents {
        CartContents {
            id: "cart_1".into(),
            user_cart_confirmation_required: true,
            payment_request: PaymentRequest {
                method_data: vec![],
                details: PaymentDetailsInit {
                    id: "details_1".into(),
                    display_items: vec![PaymentItem {
                        label: "Shoes".into(),
                        amount: PaymentCurrencyAmount {
                            currency: "JPY".into(),
                            value: "8068".into(),
                        },
                        sku: Some("sku-shoes".into()),
                        quantity: Some(1),
                        pending: None,
                        refund_period: None,
                    }],
                    shipping_options: None,
                    total: PaymentItem {
                        label: "Total".into(),
                        amount: PaymentCurrencyAmount {
                            currency: "JPY".into(),
                            value: "8068".into(),
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
            cart_expiry: (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
            merchant_name: "Acme Shoes".into(),
        }
    }

    #[test]
    fn validation_rejects_expired_cart() {
        let mut contents = base_contents();
        contents.cart_expiry = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        assert!(matches!(validate_cart_contents(&contents), Err(Error::InvalidCart(_))));
    }

    #[test]
    fn validation_rejects_currency_mismatch() {
        let mut contents = base_contents();
        contents.payment_request.details.display_items[0].amount.currency = "USD".into();
        assert!(matches!(validate_cart_contents(&contents), Err(Error::InvalidCart(_))));
    }

    #[tokio::test]
    async fn sign_cart_reserves_inventory_and_signs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.db").to_str().unwrap()).await.unwrap();
        storage.set_inventory("sku-shoes", 5).await.unwrap();

        let key = KeyPair::generate(Algorithm::EcdsaP256);
        let (mandate, authorization) = sign_cart(
            &storage,
            base_contents(),
            "did:ap2:merchant:acme",
            "did:ap2:processor:core",
            &key,
        )
        .await
        .unwrap();

        assert_eq!(mandate.merchant_authorization.as_deref(), Some(authorization.as_str()));
    }

    #[tokio::test]
    async fn sign_cart_rejects_an_unknown_sku_as_invalid_not_out_of_stock() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.db").to_str().unwrap()).await.unwrap();
        // Deliberately no set_inventory call: "sku-shoes" has no row at all.

        let key = KeyPair::generate(Algorithm::EcdsaP256);
        let result = sign_cart(
            &storage,
            base_contents(),
            "did:ap2:merchant:acme",
            "did:ap2:processor:core",
            &key,
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidCart(_))));
    }

    #[tokio::test]
    async fn sign_cart_fails_and_releases_on_insufficient_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.db").to_str().unwrap()).await.unwrap();
        storage.set_inventory("sku-shoes", 0).await.unwrap();

        let key = KeyPair::generate(Algorithm::EcdsaP256);
        let result = sign_cart(
            &storage,
            base_contents(),
            "did:ap2:merchant:acme",
            "did:ap2:processor:core",
            &key,
        )
        .await;
        assert!(matches!(result, Err(Error::InsufficientInventory(_))));
    }
}
