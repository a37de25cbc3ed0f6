//! Request handlers for the Payment Network HTTP server.

use crate::domain::{self, TokenizeRequest};
use crate::storage::Storage;
use ap2_envelope::did::DidResolver;
use ap2_envelope::dispatch::Router;
use ap2_envelope::envelope::Envelope;
use ap2_envelope::Received;
use ap2_model::did::DidDocument;
use ap2_store::NonceLedger;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info};
use warp::{reply::json, Reply};

#[derive(Clone)]
pub struct State {
    pub storage: Storage,
    pub did: String,
    pub network_name: String,
    pub did_document: DidDocument,
    pub nonce_ledger: Arc<NonceLedger>,
    pub resolver: Arc<dyn DidResolver>,
    pub router: Arc<Router>,
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
struct NetworkTokenizeRequest {
    #[serde(default)]
    payment_mandate: Value,
    #[serde(default)]
    attestation: Value,
    payment_method_token: String,
    #[serde(default)]
    transaction_context: Value,
}

#[derive(Serialize)]
struct NetworkTokenizeResponse {
    agent_token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
    network_name: String,
    token_type: &'static str,
}

/// The transaction context and/or mandate carry `payer_id`/`amount` out of
/// band (§4.8 doesn't pin their exact location); fall back between the two
/// so a caller supplying either shape is accepted.
fn extract_payer_and_amount(request: &NetworkTokenizeRequest) -> (String, String) {
    let payer_id = request
        .transaction_context
        .get("payer_id")
        .and_then(Value::as_str)
        .or_else(|| request.payment_mandate.get("payer_id").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string();
    let amount = request
        .transaction_context
        .get("amount")
        .and_then(Value::as_str)
        .or_else(|| {
            request
                .payment_mandate
                .get("payment_mandate_contents")
                .and_then(|c| c.get("payment_details_total"))
                .and_then(|t| t.get("amount"))
                .and_then(|a| a.get("value"))
                .and_then(Value::as_str)
        })
        .unwrap_or("0")
        .to_string();
    (payer_id, amount)
}

pub async fn handle_tokenize(
    request: NetworkTokenizeRequest,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    let (payer_id, amount) = extract_payer_and_amount(&request);
    let payment_mandate_id = request
        .payment_mandate
        .get("payment_mandate_contents")
        .and_then(|c| c.get("payment_mandate_id"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    match domain::tokenize(
        &state.storage,
        &state.network_name,
        TokenizeRequest {
            pm_token: request.payment_method_token,
            payment_mandate_id,
            payer_id,
            amount,
        },
    )
    .await
    {
        Ok(response) => {
            info!(agent_token = %response.agent_token, "agent token minted");
            Ok(json(&NetworkTokenizeResponse {
                agent_token: response.agent_token,
                expires_at: response.expires_at,
                network_name: response.network_name,
                token_type: response.token_type,
            }))
        }
        Err(e) => {
            error!(error = %e, "network/tokenize failed");
            Err(warp::reject::custom(e))
        }
    }
}

#[derive(Deserialize)]
struct VerifyTokenRequest {
    agent_token: String,
}

pub async fn handle_verify_token(
    request: VerifyTokenRequest,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    match domain::verify_token(&state.storage, &request.agent_token).await {
        Ok(verified) => Ok(json(&json!({ "verified": verified }))),
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
