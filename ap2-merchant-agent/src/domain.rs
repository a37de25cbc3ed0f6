//! Domain logic for the Merchant Agent's two A2A behaviours (§4.6): building
//! cart candidates from an `IntentMandate`, and relaying a `PaymentMandate`
//! on to the Payment Processor.

use crate::error::{Error, Result};
use crate::storage::{AuditEntry, Direction, Storage};
use ap2_crypto::keys::KeyPair;
use ap2_model::mandate::{CartContents, CartMandate, IntentMandate};
use ap2_model::payment_request::{
    PaymentCurrencyAmount, PaymentDetailsInit, PaymentItem, PaymentMethodData, PaymentRequest,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One item the merchant's catalogue can offer, as `ProductSource.search`
/// would return it. The exact search/ranking heuristic is out of scope; this
/// demonstrates the contract with a small in-memory catalogue.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub sku: String,
    pub name: String,
    pub unit_price: PaymentCurrencyAmount,
}

/// The constraints an `IntentMandate` places on the product search.
pub struct SearchConstraints<'a> {
    pub description: &'a str,
    pub max_amount: Option<&'a PaymentCurrencyAmount>,
    pub skus: Option<&'a [String]>,
}

/// Abstract product search, as the design calls out:
/// `ProductSource.search(constraints) -> [Item]`.
pub trait ProductSource: Send + Sync {
    fn search(&self, constraints: &SearchConstraints) -> Vec<CatalogItem>;
}

/// A fixed, in-process catalogue. Real deployments would back this with the
/// merchant's actual product index; nothing downstream cares which.
pub struct StaticCatalog {
    items: Vec<CatalogItem>,
}

impl StaticCatalog {
    pub fn demo() -> Self {
        Self {
            items: vec![
                CatalogItem {
                    sku: "shoes-hightop-budget".into(),
                    name: "Court Classic High-Top".into(),
                    unit_price: PaymentCurrencyAmount { currency: "JPY".into(), value: "3200".into() },
                },
                CatalogItem {
                    sku: "shoes-hightop-standard".into(),
                    name: "Red High-Top Basketball Shoes".into(),
                    unit_price: PaymentCurrencyAmount { currency: "JPY".into(), value: "6880".into() },
                },
                CatalogItem {
                    sku: "shoes-hightop-premium".into(),
                    name: "Pro Red High-Top Basketball Shoes".into(),
                    unit_price: PaymentCurrencyAmount { currency: "JPY".into(), value: "14800".into() },
                },
            ],
        }
    }
}

impl ProductSource for StaticCatalog {
    fn search(&self, constraints: &SearchConstraints) -> Vec<CatalogItem> {
        let words: Vec<String> = constraints
            .description
            .to_ascii_lowercase()
            .split_whitespace()
            .map(|w| w.to_string())
            .collect();

        self.items
            .iter()
            .filter(|item| {
                if let Some(skus) = constraints.skus {
                    if !skus.is_empty() && !skus.contains(&item.sku) {
                        return false;
                    }
                }
                if words.is_empty() {
                    return true;
                }
                let name_lower = item.name.to_ascii_lowercase();
                words.iter().any(|w| name_lower.contains(w.as_str()))
            })
            .cloned()
            .collect()
    }
}

const TAX_RATE: f64 = 0.10;
const SHIPPING_LABEL: &str = "Shipping";
const SHIPPING_VALUE: f64 = 500.0;

fn format_amount(value: f64) -> String {
    if (value.fract()).abs() < f64::EPSILON {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

fn parse_amount(value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|e| Error::Model(ap2_model::Error::SchemaInvalid(format!("amount {value:?} is not numeric: {e}"))))
}

/// One candidate cart, labelled for the Artifact wrapper ("budget",
/// "standard", "premium").
pub struct CartCandidate {
    pub label: &'static str,
    pub contents: CartContents,
}

/// Build up to three candidate carts (budget / standard / premium) from
/// whatever the catalogue returns for the intent's constraints, dropping any
/// tier whose total would exceed `intent.max_amount`.
pub fn build_cart_candidates(
    intent: &IntentMandate,
    merchant_name: &str,
    catalog: &dyn ProductSource,
) -> Result<Vec<CartCandidate>> {
    let constraints = SearchConstraints {
        description: &intent.natural_language_description,
        max_amount: intent.max_amount.as_ref(),
        skus: intent.skus.as_deref(),
    };

    let mut items = catalog.search(&constraints);
    if items.is_empty() {
        return Err(Error::NoCandidates);
    }
    items.sort_by(|a, b| {
        parse_amount(&a.unit_price.value)
            .unwrap_or(f64::MAX)
            .partial_cmp(&parse_amount(&b.unit_price.value).unwrap_or(f64::MAX))
            .unwrap()
    });

    let tiers: &[(&str, usize)] = match items.len() {
        1 => &[("standard", 0)],
        2 => &[("budget", 0), ("premium", 1)],
        _ => &[("budget", 0), ("standard", 1), ("premium", 2)],
    };
    let last = items.len() - 1;

    let mut candidates = Vec::new();
    for &(label, idx) in tiers {
        let idx = idx.min(last);
        let item = &items[idx];
        let currency = item.unit_price.currency.clone();
        let subtotal = parse_amount(&item.unit_price.value)?;
        let tax = (subtotal * TAX_RATE).round();
        let shipping = SHIPPING_VALUE;
        let total = subtotal + tax + shipping;

        if let Some(max) = constraints.max_amount {
            if max.currency != currency {
                continue;
            }
            if total > parse_amount(&max.value)? {
                continue;
            }
        }

        let cart_id = format!("cart_{}_{}", item.sku, Uuid::new_v4());
        let details_id = format!("details_{cart_id}");

        let contents = CartContents {
            id: cart_id,
            user_cart_confirmation_required: intent.user_cart_confirmation_required,
            payment_request: PaymentRequest {
                method_data: vec![PaymentMethodData { supported_methods: "basic-card".into(), data: None }],
                details: PaymentDetailsInit {
                    id: details_id,
                    display_items: vec![
                        PaymentItem {
                            label: item.name.clone(),
                            amount: PaymentCurrencyAmount { currency: currency.clone(), value: format_amount(subtotal) },
                            sku: Some(item.sku.clone()),
                            quantity: Some(1),
                            pending: None,
                            refund_period: None,
                        },
                        PaymentItem {
                            label: "Sales tax".into(),
                            amount: PaymentCurrencyAmount { currency: currency.clone(), value: format_amount(tax) },
                            sku: None,
                            quantity: None,
                            pending: None,
                            refund_period: Some(0),
                        },
                        PaymentItem {
                            label: SHIPPING_LABEL.into(),
                            amount: PaymentCurrencyAmount { currency: currency.clone(), value: format_amount(shipping) },
                            sku: None,
                            quantity: None,
                            pending: None,
                            refund_period: Some(0),
                        },
                    ],
                    shipping_options: None,
                    total: PaymentItem {
                        label: "Total".into(),
                        amount: PaymentCurrencyAmount { currency, value: format_amount(total) },
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
            merchant_name: merchant_name.to_string(),
        };

        candidates.push(CartCandidate { label, contents });
    }

    if candidates.is_empty() {
        return Err(Error::NoCandidates);
    }
    Ok(candidates)
}

#[derive(Serialize)]
struct SignCartRequest {
    cart_mandate: CartMandate,
}

#[derive(Deserialize)]
struct SignCartResponse {
    signed_cart_mandate: CartMandate,
    #[allow(dead_code)]
    merchant_authorization: String,
}

/// `POST <merchant_url>/sign/cart` for one candidate, returning the signed
/// `CartMandate` the Merchant handed back.
pub async fn sign_candidate(
    http_client: &reqwest::Client,
    merchant_url: &str,
    contents: CartContents,
) -> Result<CartMandate> {
    let request = SignCartRequest {
        cart_mandate: CartMandate { contents, merchant_authorization: None },
    };
    let response = http_client
        .post(format!("{merchant_url}/sign/cart"))
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::MerchantRequestFailed(body));
    }
    let parsed: SignCartResponse = response.json().await?;
    Ok(parsed.signed_cart_mandate)
}

/// Wire shape of one nested Artifact inside the `ap2.responses.CartCandidates`
/// response (§4.2 "Reply shape").
#[derive(Serialize)]
pub struct CartCandidateArtifact {
    #[serde(rename = "artifactId")]
    pub artifact_id: String,
    pub name: String,
    pub data_type_key: &'static str,
    pub data: CartMandate,
}

/// Sign and address a fresh outbound envelope carrying `payload` unchanged,
/// POST it to `target_url/a2a/message`, and return the raw JSON body the
/// recipient handed back (services reply with the unwrapped value, not
/// another signed envelope — see `ap2_envelope::Received`).
pub async fn relay_envelope(
    storage: &Storage,
    http_client: &reqwest::Client,
    target_url: &str,
    sender_did: &str,
    recipient_did: &str,
    data_type: ap2_envelope::envelope::DataPartType,
    data_id: impl Into<String>,
    payload: Value,
    signing_key: &KeyPair,
    signing_kid: &str,
) -> Result<Value> {
    let envelope = ap2_envelope::send_envelope(sender_did, recipient_did, data_type, data_id, payload, signing_key, signing_kid)?;

    let response = http_client
        .post(format!("{target_url}/a2a/message"))
        .json(&envelope)
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            audit(storage, outbound_audit_entry(
                &envelope.header.message_id, sender_did, recipient_did, data_type.as_str(),
                format!("send failed: {e}"),
            )).await;
            return Err(e.into());
        }
    };

    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        audit(storage, outbound_audit_entry(
            &envelope.header.message_id, sender_did, recipient_did, data_type.as_str(),
            format!("rejected: {body}"),
        )).await;
        return Err(Error::ProcessorRequestFailed(body));
    }
    let body: Value = response.json().await?;
    if let Some(message) = body.get("error_kind") {
        audit(storage, outbound_audit_entry(
            &envelope.header.message_id, sender_did, recipient_did, data_type.as_str(),
            format!("rejected: {message}"),
        )).await;
        return Err(Error::ProcessorRequestFailed(format!("{message}: {body}")));
    }

    audit(storage, outbound_audit_entry(
        &envelope.header.message_id, sender_did, recipient_did, data_type.as_str(),
        "relayed and accepted".to_string(),
    )).await;
    Ok(body)
}

/// Best-effort audit write; logs and swallows storage failures rather than
/// failing the relay over a missed audit row.
pub async fn audit(storage: &Storage, entry: AuditEntry) {
    if let Err(e) = storage.record_audit_entry(entry).await {
        tracing::warn!(error = %e, "failed to record audit entry");
    }
}

pub fn inbound_audit_entry(message_id: &str, sender: &str, recipient: &str, data_type: &str, summary: String) -> AuditEntry {
    AuditEntry {
        message_id: message_id.to_string(),
        sender: sender.to_string(),
        recipient: recipient.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        data_type: data_type.to_string(),
        direction: Direction::Inbound,
        summary,
    }
}

pub fn outbound_audit_entry(message_id: &str, sender: &str, recipient: &str, data_type: &str, summary: String) -> AuditEntry {
    AuditEntry {
        message_id: message_id.to_string(),
        sender: sender.to_string(),
        recipient: recipient.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        data_type: data_type.to_string(),
        direction: Direction::Outbound,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_model::payment_request::PaymentCurrencyAmount;

    fn intent(description: &str, max_value: Option<&str>) -> IntentMandate {
        IntentMandate {
            id: "intent_1".into(),
            natural_language_description: description.into(),
            intent_expiry: (Utc::now() + chrono::Duration::hours(24)).to_rfc3339(),
            user_cart_confirmation_required: true,
            merchants: None,
            skus: None,
            requires_refundability: None,
            max_amount: max_value.map(|v| PaymentCurrencyAmount { currency: "JPY".into(), value: v.into() }),
        }
    }

    #[test]
    fn builds_three_tiers_for_a_matching_description() {
        let intent = intent("red high-top basketball shoes", Some("50000"));
        let catalog = StaticCatalog::demo();
        let candidates = build_cart_candidates(&intent, "Acme Shoes", &catalog).unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].label, "budget");
        assert_eq!(candidates[1].label, "standard");
        assert_eq!(candidates[2].label, "premium");
    }

    #[test]
    fn standard_tier_total_matches_the_worked_example() {
        let intent = intent("red high-top basketball shoes", Some("50000"));
        let catalog = StaticCatalog::demo();
        let candidates = build_cart_candidates(&intent, "Acme Shoes", &catalog).unwrap();
        let standard = candidates.iter().find(|c| c.label == "standard").unwrap();
        assert_eq!(standard.contents.payment_request.details.total.amount.value, "8068");
    }

    #[test]
    fn tiers_exceeding_max_amount_are_dropped() {
        let intent = intent("red high-top basketball shoes", Some("8068"));
        let catalog = StaticCatalog::demo();
        let candidates = build_cart_candidates(&intent, "Acme Shoes", &catalog).unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.label != "premium"));
    }

    #[test]
    fn no_matching_items_is_an_error() {
        let intent = intent("vintage vinyl records", None);
        let catalog = StaticCatalog::demo();
        assert!(matches!(build_cart_candidates(&intent, "Acme Shoes", &catalog), Err(Error::NoCandidates)));
    }
}
