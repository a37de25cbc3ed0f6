//! The purchase orchestration state machine and the HTTP choreography that
//! drives it (§4.10).
//!
//! The Shopping Agent is not an A2A server: it only ever initiates outbound
//! envelopes to the Merchant Agent and plain REST calls to the Credential
//! Provider, on behalf of a single purchase session.

use crate::authenticator::Authenticator;
use crate::error::{Error, Result};
use crate::risk::{compute_risk_score, RiskAssessment, RiskInputs};
use ap2_crypto::keys::KeyPair;
use ap2_envelope::did::DidResolver;
use ap2_envelope::envelope::DataPartType;
use ap2_model::auth::{build_user_authorization, verify_merchant_authorization};
use ap2_model::mandate::{CartMandate, IntentMandate, PaymentMandate, PaymentMandateContents};
use ap2_model::payment_request::PaymentResponse;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// Orchestration state (§4.10). The CLI drives one purchase from `Initial`
/// straight through to `PaymentSettled` or an early error; nothing here
/// loops or waits on a second invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PurchaseState {
    Initial,
    IntentCollected,
    IntentConfirmed,
    CartOptionsReceived,
    CartSelected,
    CartConfirmed,
    PaymentMethodChosen,
    StepUpCompleted,
    PaymentMandateSigned,
    PaymentSettled,
}

pub struct PurchaseRequest {
    pub natural_language_description: String,
    pub max_amount: Option<ap2_model::payment_request::PaymentCurrencyAmount>,
    pub payment_method_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOutcome {
    pub final_state: PurchaseState,
    pub transaction_id: String,
    pub status: String,
    pub receipt_url: String,
    pub amount: String,
    pub risk_assessment: RiskAssessment,
}

/// Everything a purchase needs that outlives a single HTTP call.
pub struct ShoppingAgentContext<'a> {
    pub self_did: &'a str,
    pub user_id: &'a str,
    pub signing_key: &'a KeyPair,
    pub merchant_agent_did: &'a str,
    pub merchant_agent_url: &'a str,
    pub merchant_did: &'a str,
    pub payment_processor_did: &'a str,
    pub credential_provider_url: &'a str,
    pub webauthn_origin: &'a str,
    pub resolver: &'a dyn DidResolver,
    pub http_client: &'a reqwest::Client,
}

fn random_challenge() -> Vec<u8> {
    let mut buf = vec![0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

fn rp_id_from_origin(origin: &str) -> String {
    origin
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .to_string()
}

/// Run a full purchase end to end: §4.10's entire state sequence, in one
/// call. Returns the final `PaymentResult` plus the advisory risk
/// assessment computed just before the `PaymentMandate` was sent.
pub async fn run_purchase(ctx: &ShoppingAgentContext<'_>, request: PurchaseRequest) -> Result<PurchaseOutcome> {
    let mut authenticator = Authenticator::new();
    let rp_id = rp_id_from_origin(ctx.webauthn_origin);

    // Initial -> IntentCollected: build the IntentMandate.
    let intent = IntentMandate {
        id: format!("intent_{}", Uuid::new_v4().simple()),
        natural_language_description: request.natural_language_description,
        intent_expiry: (Utc::now() + Duration::hours(24)).to_rfc3339(),
        user_cart_confirmation_required: true,
        merchants: None,
        skus: None,
        requires_refundability: None,
        max_amount: request.max_amount,
    };
    info!(intent_id = %intent.id, "intent collected");

    // IntentCollected -> IntentConfirmed: a local WebAuthn assertion stands
    // in for the human confirming intent; it never leaves this process, so
    // it is not verified against any server-side passkey record.
    let intent_challenge = random_challenge();
    let _intent_assertion = authenticator.assert(&intent_challenge, &rp_id, ctx.webauthn_origin, "webauthn.get");
    info!("intent confirmed by local authenticator");

    // IntentConfirmed -> CartOptionsReceived: send the IntentMandate to the
    // Merchant Agent and collect its CartCandidates artifact.
    let candidates = send_intent(ctx, &intent).await?;
    if candidates.is_empty() {
        return Err(Error::NoCandidates);
    }
    info!(count = candidates.len(), "received cart candidates");

    // CartOptionsReceived -> CartSelected: presenting candidates to an
    // external chooser is out of scope; this core picks deterministically,
    // preferring the candidate labelled "standard" and otherwise the
    // cheapest one that fits the intent's ceiling.
    let chosen = choose_cart(&candidates)?.cart.clone();

    // CartSelected -> CartConfirmed: defensively re-verify the chosen cart's
    // `merchant_authorization` rather than trusting the Merchant Agent's
    // relay at face value (§9 Open Question — optional defense in depth).
    confirm_cart(ctx, &chosen).await?;
    info!(cart_id = %chosen.contents.id, "cart confirmed");

    // PaymentMethodChosen: fetch methods, tokenize, and walk step-up if the
    // chosen method demands it.
    let method = fetch_payment_method(ctx, &request.payment_method_id).await?;
    let pm_token = tokenize_payment_method(ctx, &request.payment_method_id).await?;

    let (pm_token, step_up_completed) = if method.requires_step_up {
        let token = complete_step_up(ctx, &intent, pm_token).await?;
        (token, true)
    } else {
        (pm_token, false)
    };
    info!(method = %request.payment_method_id, step_up_completed, "payment method ready");

    // Build the PaymentMandateContents and get the second WebAuthn assertion,
    // binding cart_hash + payment_hash in its KB-JWT transaction_data.
    let payment_mandate_id = format!("pm_{}", Uuid::new_v4().simple());
    let payment_response = PaymentResponse {
        method_name: method.method_type.clone(),
        details: json!({ "token": pm_token, "step_up_completed": step_up_completed }),
        shipping_address: None,
        shipping_option: None,
        payer_name: None,
        payer_email: None,
    };
    let payment_mandate_contents = PaymentMandateContents {
        payment_mandate_id: payment_mandate_id.clone(),
        payment_details_id: chosen.contents.payment_request.details.id.clone(),
        payment_details_total: chosen.contents.payment_request.details.total.clone(),
        payment_response,
        merchant_agent: ctx.merchant_agent_did.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    };

    let payment_nonce = random_challenge();
    let payment_assertion = authenticator.assert(&payment_nonce, &rp_id, ctx.webauthn_origin, "webauthn.get");

    let user_authorization = build_user_authorization(
        ctx.user_id,
        authenticator.public_jwk(),
        ctx.payment_processor_did,
        &B64.encode(&payment_nonce),
        &chosen.contents,
        &payment_mandate_contents,
        &authenticator.raw_id,
        &payment_assertion,
    )?;

    let payment_mandate = PaymentMandate {
        payment_mandate_contents: payment_mandate_contents.clone(),
        user_authorization: Some(user_authorization),
    };
    info!(payment_mandate_id = %payment_mandate_id, "payment mandate signed");

    // Advisory risk assessment, computed just before the mandate ships.
    let risk_assessment = compute_risk_score(&RiskInputs {
        cart_total: &chosen.contents.payment_request.details.total.amount,
        intent: &intent,
        cart: &chosen.contents,
        payment_method_brand: &method.brand,
        requires_step_up: method.requires_step_up,
        has_shipping_address: chosen.contents.payment_request.shipping_address.is_some(),
        now: Utc::now(),
    });

    // PaymentMandateSigned -> PaymentSettled: send to the Merchant Agent,
    // which relays to the Payment Processor and returns its PaymentResult.
    let result = send_payment_mandate(ctx, &payment_mandate, &chosen, &intent, &risk_assessment).await?;

    Ok(PurchaseOutcome {
        final_state: PurchaseState::PaymentSettled,
        transaction_id: result["transaction_id"].as_str().unwrap_or_default().to_string(),
        status: result["status"].as_str().unwrap_or_default().to_string(),
        receipt_url: result["receipt_url"].as_str().unwrap_or_default().to_string(),
        amount: result["amount"].as_str().unwrap_or_default().to_string(),
        risk_assessment,
    })
}

/// A cart candidate paired with the merchant-assigned label ("budget",
/// "standard", "premium") it arrived with, so selection can honor it.
struct LabeledCart {
    label: String,
    cart: CartMandate,
}

async fn send_intent(ctx: &ShoppingAgentContext<'_>, intent: &IntentMandate) -> Result<Vec<LabeledCart>> {
    let kid = format!("{}#key-1", ctx.self_did);
    let payload = serde_json::to_value(intent)?;
    let envelope = ap2_envelope::send_envelope(
        ctx.self_did,
        ctx.merchant_agent_did,
        DataPartType::IntentMandate,
        intent.id.clone(),
        payload,
        ctx.signing_key,
        &kid,
    )?;

    let response: Value = post_envelope(ctx, ctx.merchant_agent_url, &envelope).await?;
    if let Some(kind) = response.get("error_kind").and_then(Value::as_str) {
        return Err(Error::MerchantAgentRejected(format!(
            "{kind}: {}",
            response.get("message").and_then(Value::as_str).unwrap_or_default()
        )));
    }

    let candidates = response
        .get("artifact_data")
        .and_then(|d| d.get("candidates"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    candidates
        .into_iter()
        .map(|artifact| {
            let label = artifact.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let cart = serde_json::from_value::<CartMandate>(artifact.get("data").cloned().unwrap_or(Value::Null))
                .map_err(Error::Json)?;
            Ok(LabeledCart { label, cart })
        })
        .collect()
}

fn choose_cart(candidates: &[LabeledCart]) -> Result<&LabeledCart> {
    if let Some(standard) = candidates.iter().find(|c| c.label == "standard") {
        return Ok(standard);
    }
    candidates
        .iter()
        .min_by(|a, b| {
            let va: f64 = a.cart.contents.payment_request.details.total.amount.value.parse().unwrap_or(f64::MAX);
            let vb: f64 = b.cart.contents.payment_request.details.total.amount.value.parse().unwrap_or(f64::MAX);
            va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or(Error::NoCandidates)
}

async fn confirm_cart(ctx: &ShoppingAgentContext<'_>, cart: &CartMandate) -> Result<()> {
    let token = cart
        .merchant_authorization
        .as_deref()
        .ok_or_else(|| Error::CartTampered("cart arrived without merchant_authorization".to_string()))?;

    let expected_cart_hash = ap2_model::auth::cart_hash(&cart.contents)?;
    let kid = ap2_crypto::jws::parse_compact(token)?
        .header
        .get("kid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::CartTampered("merchant_authorization has no kid".to_string()))?;
    let public_key_hex = ctx.resolver.resolve_public_key(&kid).await?;

    verify_merchant_authorization(token, &expected_cart_hash, ctx.payment_processor_did, |_| Ok(public_key_hex.clone()))
        .map_err(|e| Error::CartTampered(e.to_string()))?;
    Ok(())
}

pub struct PaymentMethodSummary {
    pub method_type: String,
    pub brand: String,
    pub requires_step_up: bool,
}

async fn fetch_payment_method(ctx: &ShoppingAgentContext<'_>, payment_method_id: &str) -> Result<PaymentMethodSummary> {
    let url = format!("{}/payment-methods?user_id={}", ctx.credential_provider_url, ctx.user_id);
    let methods: Vec<Value> = ctx.http_client.get(&url).send().await?.json().await?;
    let found = methods
        .into_iter()
        .find(|m| m.get("id").and_then(Value::as_str) == Some(payment_method_id))
        .ok_or_else(|| Error::CredentialProviderFailed(format!("unknown payment method {payment_method_id}")))?;
    Ok(PaymentMethodSummary {
        method_type: found.get("type").and_then(Value::as_str).unwrap_or("card").to_string(),
        brand: found.get("brand").and_then(Value::as_str).unwrap_or_default().to_string(),
        requires_step_up: found.get("requires_step_up").and_then(Value::as_bool).unwrap_or(false),
    })
}

async fn tokenize_payment_method(ctx: &ShoppingAgentContext<'_>, payment_method_id: &str) -> Result<String> {
    let url = format!("{}/payment-methods/tokenize", ctx.credential_provider_url);
    let response: Value = ctx
        .http_client
        .post(&url)
        .json(&json!({ "user_id": ctx.user_id, "payment_method_id": payment_method_id }))
        .send()
        .await?
        .json()
        .await?;
    response
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::CredentialProviderFailed("tokenize response had no token".to_string()))
}

/// Initiate step-up, simulate the out-of-band completion (the human-facing
/// UI is out of scope), and exchange the completed session for a
/// step-up-verified token.
async fn complete_step_up(ctx: &ShoppingAgentContext<'_>, intent: &IntentMandate, _pm_token: String) -> Result<String> {
    let initiate_url = format!("{}/payment-methods/initiate-step-up", ctx.credential_provider_url);
    let initiated: Value = ctx
        .http_client
        .post(&initiate_url)
        .json(&json!({ "user_id": ctx.user_id, "payment_mandate_id": intent.id }))
        .send()
        .await?
        .json()
        .await?;
    let session_id = initiated
        .get("session_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::StepUpIncomplete("initiate-step-up returned no session_id".to_string()))?;

    let complete_url = format!("{}/step-up/{session_id}/complete", ctx.credential_provider_url);
    ctx.http_client.post(&complete_url).send().await?;

    let verify_url = format!("{}/payment-methods/verify-step-up", ctx.credential_provider_url);
    let verified: Value = ctx
        .http_client
        .post(&verify_url)
        .json(&json!({ "session_id": session_id }))
        .send()
        .await?
        .json()
        .await?;
    if !verified.get("verified").and_then(Value::as_bool).unwrap_or(false) {
        return Err(Error::StepUpIncomplete("verify-step-up reported verified=false".to_string()));
    }
    verified
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::StepUpIncomplete("verify-step-up returned no token".to_string()))
}

async fn send_payment_mandate(
    ctx: &ShoppingAgentContext<'_>,
    payment_mandate: &PaymentMandate,
    cart_mandate: &CartMandate,
    intent: &IntentMandate,
    risk_assessment: &RiskAssessment,
) -> Result<Value> {
    let kid = format!("{}#key-1", ctx.self_did);
    let payload = json!({
        "payment_mandate": payment_mandate,
        "cart_mandate": cart_mandate,
        "intent_mandate": intent,
        "risk_assessment": risk_assessment,
    });
    let envelope = ap2_envelope::send_envelope(
        ctx.self_did,
        ctx.merchant_agent_did,
        DataPartType::PaymentMandate,
        payment_mandate.payment_mandate_contents.payment_mandate_id.clone(),
        payload,
        ctx.signing_key,
        &kid,
    )?;

    let response: Value = post_envelope(ctx, ctx.merchant_agent_url, &envelope).await?;
    if let Some(kind) = response.get("error_kind").and_then(Value::as_str) {
        return Err(Error::MerchantAgentRejected(format!(
            "{kind}: {}",
            response.get("message").and_then(Value::as_str).unwrap_or_default()
        )));
    }
    Ok(response)
}

async fn post_envelope(ctx: &ShoppingAgentContext<'_>, base_url: &str, envelope: &ap2_envelope::envelope::Envelope) -> Result<Value> {
    let url = format!("{}/a2a/message", base_url.trim_end_matches('/'));
    let response = ctx.http_client.post(&url).json(envelope).send().await?;
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_model::payment_request::{PaymentCurrencyAmount, PaymentDetailsInit, PaymentItem, PaymentRequest};

    fn labeled_cart(label: &str, total: &str) -> LabeledCart {
        let cart = CartMandate {
            contents: ap2_model::mandate::CartContents {
                id: format!("cart_{label}"),
                user_cart_confirmation_required: true,
                payment_request: PaymentRequest {
                    method_data: vec![],
                    details: PaymentDetailsInit {
                        id: format!("details_{label}"),
                        display_items: vec![],
                        shipping_options: None,
                        total: PaymentItem {
                            label: "Total".into(),
                            amount: PaymentCurrencyAmount { currency: "JPY".into(), value: total.into() },
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
            },
            merchant_authorization: None,
        };
        LabeledCart { label: label.to_string(), cart }
    }

    #[test]
    fn choose_cart_prefers_the_candidate_labelled_standard() {
        let candidates = vec![labeled_cart("budget", "1000"), labeled_cart("standard", "5000"), labeled_cart("premium", "9000")];
        let chosen = choose_cart(&candidates).unwrap();
        assert_eq!(chosen.label, "standard");
    }

    #[test]
    fn choose_cart_falls_back_to_cheapest_without_a_standard_candidate() {
        let candidates = vec![labeled_cart("budget", "1000"), labeled_cart("premium", "9000")];
        let chosen = choose_cart(&candidates).unwrap();
        assert_eq!(chosen.label, "budget");
    }

    #[test]
    fn choose_cart_rejects_an_empty_candidate_list() {
        let candidates: Vec<LabeledCart> = vec![];
        assert!(matches!(choose_cart(&candidates), Err(Error::NoCandidates)));
    }
}
