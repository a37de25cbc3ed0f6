//! Request handlers for the Merchant HTTP server.

use crate::domain;
use crate::error::{Error, Result};
use crate::storage::Storage;
use ap2_crypto::keys::KeyPair;
use ap2_envelope::did::DidResolver;
use ap2_envelope::dispatch::Router;
use ap2_envelope::envelope::Envelope;
use ap2_envelope::Received;
use ap2_model::did::DidDocument;
use ap2_model::mandate::{CartContents, CartMandate};
use ap2_store::NonceLedger;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info};
use warp::{reply::json, Reply};

/// Shared handler state, cloned cheaply per-request by warp's filter graph.
#[derive(Clone)]
pub struct State {
    pub storage: Storage,
    pub merchant_key: Arc<KeyPair>,
    pub did: String,
    pub payment_processor_did: String,
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
struct SignCartRequest {
    cart_mandate: CartMandate,
}

#[derive(Serialize)]
struct SignCartResponse {
    signed_cart_mandate: CartMandate,
    merchant_authorization: String,
}

pub async fn handle_sign_cart(
    request: SignCartRequest,
    state: State,
) -> std::result::Result<impl Reply, warp::Rejection> {
    match sign_cart(request.cart_mandate.contents, &state).await {
        Ok((cart_mandate, authorization)) => {
            info!(cart_id = %cart_mandate.contents.id, "cart signed");
            Ok(json(&SignCartResponse {
                signed_cart_mandate: cart_mandate,
                merchant_authorization: authorization,
            }))
        }
        Err(e) => {
            error!(error = %e, "sign/cart failed");
            Err(warp::reject::custom(e))
        }
    }
}

async fn sign_cart(contents: CartContents, state: &State) -> Result<(CartMandate, String)> {
    domain::sign_cart(
        &state.storage,
        contents,
        &state.did,
        &state.payment_processor_did,
        &state.merchant_key,
    )
    .await
}

/// Uniform `POST /a2a/message` endpoint (§6). The Merchant registers no
/// handlers of its own — it is invoked over plain HTTP, not A2A — but still
/// exposes the endpoint so a caller sees the same surface on every service.
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

#[cfg(test)]
mod tests {
    use super::*;
    use warp::hyper::body::to_bytes;

    #[tokio::test]
    async fn health_check_reports_ok() {
        let response = handle_health().await.unwrap();
        let bytes = to_bytes(response.into_response().into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
    }
}
