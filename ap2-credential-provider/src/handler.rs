//! Request handlers for the Credential Provider HTTP server.

use crate::domain;
use crate::error::Error;
use crate::storage::Storage;
use ap2_crypto::webauthn::WebAuthnAssertion;
use ap2_envelope::did::DidResolver;
use ap2_envelope::dispatch::Router;
use ap2_envelope::envelope::Envelope;
use ap2_envelope::Received;
use ap2_model::did::DidDocument;
use ap2_store::{ChallengeStore, CredentialTokenStore, NonceLedger, PaymentMethodTokenStore, StepUpSessionStore};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info};
use warp::{reply::json, Reply};

#[derive(Clone)]
pub struct State {
    pub storage: Storage,
    pub did: String,
    pub rp_id: String,
    pub allowed_origins: Vec<String>,
    pub payment_network_client: reqwest::Client,
    pub payment_network_url: String,
    pub did_document: DidDocument,
    pub nonce_ledger: Arc<NonceLedger>,
    pub resolver: Arc<dyn DidResolver>,
    pub router: Arc<Router>,
    pub challenges: Arc<ChallengeStore>,
    pub pm_tokens: Arc<PaymentMethodTokenStore>,
    pub step_up_sessions: Arc<StepUpSessionStore>,
    pub credential_tokens: Arc<CredentialTokenStore>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn handle_health() -> std::result::Result<impl Reply, Infallible> {
    Ok(json(&HealthResponse { status: "ok" }))
}

pub async fn handle_did_document(state: State) -> std::result::Result<impl Reply, Infallible> {
    Ok(json(&state.did_document))
}

#[derive(Deserialize)]
pub struct RegisterPasskeyRequest {
    user_id: String,
    credential_id: String,
    attestation_object: String,
    #[serde(default)]
    transports: Vec<String>,
}

pub async fn handle_register_passkey(
    request: RegisterPasskeyRequest,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    match domain::register_passkey(
        &state.storage,
        request.user_id,
        request.credential_id.clone(),
        &request.attestation_object,
        request.transports,
    )
    .await
    {
        Ok(()) => {
            info!(credential_id = %request.credential_id, "passkey registered");
            Ok(json(&json!({ "registered": true })))
        }
        Err(e) => {
            error!(error = %e, "register/passkey failed");
            Err(warp::reject::custom(e))
        }
    }
}

#[derive(Serialize)]
struct PaymentMethodView {
    id: String,
    #[serde(rename = "type")]
    method_type: String,
    brand: String,
    last4: String,
    requires_step_up: bool,
}

#[derive(Deserialize)]
pub struct ListPaymentMethodsQuery {
    user_id: String,
}

pub async fn handle_list_payment_methods(
    query: ListPaymentMethodsQuery,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    match domain::list_payment_methods(&state.storage, &query.user_id).await {
        Ok(methods) => Ok(json(
            &methods
                .into_iter()
                .map(|m| PaymentMethodView {
                    id: m.id,
                    method_type: m.method_type,
                    brand: m.brand,
                    last4: m.last4,
                    requires_step_up: m.requires_step_up,
                })
                .collect::<Vec<_>>(),
        )),
        Err(e) => Err(warp::reject::custom(e)),
    }
}

#[derive(Deserialize)]
pub struct TokenizeRequest {
    user_id: String,
    payment_method_id: String,
}

#[derive(Serialize)]
struct TokenizeResponse {
    token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

pub async fn handle_tokenize_payment_method(
    request: TokenizeRequest,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    match domain::tokenize_payment_method(&state.storage, &state.pm_tokens, &request.user_id, &request.payment_method_id).await {
        Ok(result) => Ok(json(&TokenizeResponse {
            token: result.token,
            expires_at: result.expires_at,
        })),
        Err(e) => {
            error!(error = %e, "payment-methods/tokenize failed");
            Err(warp::reject::custom(e))
        }
    }
}

#[derive(Deserialize)]
pub struct InitiateStepUpRequest {
    user_id: String,
    payment_mandate_id: String,
}

#[derive(Serialize)]
struct InitiateStepUpResponse {
    session_id: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

pub async fn handle_initiate_step_up(
    request: InitiateStepUpRequest,
    state: State,
) -> std::result::Result<impl Reply, Infallible> {
    let session = domain::initiate_step_up(
        &state.step_up_sessions,
        &state.challenges,
        &request.user_id,
        &request.payment_mandate_id,
        &state.rp_id,
    );
    Ok(json(&InitiateStepUpResponse {
        session_id: session.session_id,
        expires_at: session.expires_at,
    }))
}

pub async fn handle_get_step_up(_session_id: String) -> std::result::Result<impl Reply, Infallible> {
    // Human-facing step-up UI is out of scope; this returns a placeholder
    // so a caller polling the endpoint sees a stable shape.
    Ok(json(&json!({ "status": "pending" })))
}

pub async fn handle_complete_step_up(
    session_id: String,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    match domain::complete_step_up(&state.step_up_sessions, &state.credential_tokens, &session_id) {
        Ok(completion) => Ok(json(&json!({ "status": completion.status, "token": completion.token }))),
        Err(e) => Err(warp::reject::custom(e)),
    }
}

#[derive(Deserialize)]
pub struct VerifyStepUpRequest {
    session_id: String,
}

pub async fn handle_verify_step_up(
    request: VerifyStepUpRequest,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    match domain::verify_step_up(&state.step_up_sessions, &state.credential_tokens, &request.session_id) {
        Ok(result) => Ok(json(&json!({
            "verified": result.verified,
            "payment_method_id": result.payment_method_id,
            "token": result.token,
        }))),
        Err(e) => Err(warp::reject::custom(e)),
    }
}

#[derive(Deserialize)]
pub struct VerifyAttestationRequest {
    credential_id: String,
    client_data_json: String,
    authenticator_data: String,
    signature: String,
    challenge: String,
    #[serde(default)]
    payment_method_token: Option<String>,
}

#[derive(Serialize)]
struct VerifyAttestationResponse {
    verified: bool,
    token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_token: Option<String>,
    /// The registered passkey owner, so a caller that only knows the
    /// `credential_id` can learn whose identity this assertion actually
    /// authenticates instead of trusting a self-asserted subject claim.
    user_id: String,
    /// Hex-encoded registered COSE public key the assertion was verified
    /// against.
    public_key_cose: String,
}

pub async fn handle_verify_attestation(
    request: VerifyAttestationRequest,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    let decode = |field: &str| -> Result<Vec<u8>, warp::Rejection> {
        B64.decode(field)
            .map_err(|_| warp::reject::custom(Error::WebAuthn(ap2_crypto::Error::WebAuthnInvalid("malformed base64url field".into()))))
    };

    let assertion = WebAuthnAssertion {
        client_data_json: decode(&request.client_data_json)?,
        authenticator_data: decode(&request.authenticator_data)?,
        signature: decode(&request.signature)?,
    };
    let challenge = decode(&request.challenge)?;

    let result = match domain::verify_attestation(
        &state.storage,
        &state.credential_tokens,
        &request.credential_id,
        &assertion,
        &challenge,
        &state.rp_id,
        &state.allowed_origins,
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "verify/attestation failed");
            return Err(warp::reject::custom(e));
        }
    };

    let agent_token = match request.payment_method_token {
        Some(pm_token) => match request_agent_token(&state, &pm_token).await {
            Ok(token) => Some(token),
            Err(e) => {
                error!(error = %e, "payment network tokenize call failed");
                None
            }
        },
        None => None,
    };

    Ok(json(&VerifyAttestationResponse {
        verified: result.verified,
        token: result.token,
        agent_token,
        user_id: result.user_id,
        public_key_cose: hex::encode(result.public_key_cose),
    }))
}

/// Exchange a payment-method token for an `agent_token` from the Payment
/// Network, as described in §4.7's handoff into §4.8.
async fn request_agent_token(state: &State, pm_token: &str) -> Result<String, Error> {
    let url = format!("{}/network/tokenize", state.payment_network_url);
    let body = json!({
        "payment_mandate": {},
        "attestation": {},
        "payment_method_token": pm_token,
        "transaction_context": {},
    });

    let mut last_err = None;
    for attempt in 0..3 {
        match state.payment_network_client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                let value: serde_json::Value = resp.json().await?;
                if let Some(token) = value.get("agent_token").and_then(serde_json::Value::as_str) {
                    return Ok(token.to_string());
                }
                last_err = Some(Error::Network(resp.error_for_status().unwrap_err()));
                break;
            }
            Ok(resp) => {
                last_err = Some(Error::Network(resp.error_for_status().unwrap_err()));
            }
            Err(e) => {
                last_err = Some(Error::Network(e));
            }
        }
        if attempt < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(100 * (attempt + 1) as u64)).await;
        }
    }
    Err(last_err.unwrap_or(Error::UnknownToken))
}

#[derive(Deserialize)]
pub struct VerifyCredentialRequest {
    token: String,
    payer_id: String,
}

#[derive(Serialize)]
struct VerifyCredentialResponse {
    verified: bool,
    credential_info: serde_json::Value,
}

pub async fn handle_verify_credential(
    request: VerifyCredentialRequest,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    match domain::verify_credential(&state.storage, &state.credential_tokens, &request.token, &request.payer_id).await {
        Ok((verified, info)) => Ok(json(&VerifyCredentialResponse {
            verified,
            credential_info: json!({
                "payment_method_id": info.payment_method_id,
                "holder_name": info.holder_name,
                "type": info.method_type,
                "brand": info.brand,
                "last4": info.last4,
            }),
        })),
        Err(e) => Err(warp::reject::custom(e)),
    }
}

#[derive(Deserialize)]
pub struct ReceiptRequest {
    transaction_id: String,
    payer_id: String,
    receipt_url: String,
    amount: String,
    timestamp: String,
}

pub async fn handle_receipt(
    request: ReceiptRequest,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    match domain::record_receipt(
        &state.storage,
        &request.transaction_id,
        &request.payer_id,
        &request.receipt_url,
        &request.amount,
        &request.timestamp,
    )
    .await
    {
        Ok(()) => Ok(json(&json!({ "recorded": true }))),
        Err(e) => Err(warp::reject::custom(e)),
    }
}

pub async fn handle_a2a_message(
    envelope: Envelope,
    state: State,
) -> std::result::Result<impl Reply, Infallible> {
    let result = ap2_envelope::receive_envelope(
        &envelope,
        &state.did,
        &state.nonce_ledger,
        state.resolver.as_ref(),
        &state.router,
    )
    .await;

    match result {
        Ok(Received::Value(value)) => Ok(json(&value)),
        Ok(Received::Artifact(artifact)) => Ok(json(&artifact)),
        Err(e) => {
            error!(error = %e, "a2a/message rejected");
            Ok(json(&json!({ "error_kind": "A2ARejected", "message": e.to_string() })))
        }
    }
}
