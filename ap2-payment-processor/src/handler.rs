//! Request handlers for the Payment Processor HTTP server, and the
//! `PaymentMandate` `Handler` registered on the A2A router (§4.9).

use crate::domain::{self, ChainValidationRequest, ProcessorContext};
use crate::passkey::PasskeyVerifier;
use crate::storage::Storage;
use ap2_crypto::keys::KeyPair;
use ap2_envelope::did::DidResolver;
use ap2_envelope::dispatch::{Handler, Reply as HandlerReply, Router};
use ap2_envelope::envelope::Envelope;
use ap2_envelope::Received;
use ap2_model::did::DidDocument;
use ap2_store::NonceLedger;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info};
use warp::{reply::json, Reply};

/// Shared handler state, cloned cheaply per-request by warp's filter graph.
#[derive(Clone)]
pub struct State {
    pub storage: Storage,
    pub processor_key: Arc<KeyPair>,
    pub did: String,
    pub did_document: DidDocument,
    pub nonce_ledger: Arc<NonceLedger>,
    pub jti_ledger: Arc<NonceLedger>,
    pub passkey_verifier: Arc<dyn PasskeyVerifier>,
    pub resolver: Arc<dyn DidResolver>,
    pub router: Arc<Router>,
    pub credential_provider_client: reqwest::Client,
    pub credential_provider_url: String,
    pub rp_id: String,
    pub allowed_origins: Vec<String>,
    pub public_base_url: String,
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

pub async fn handle_a2a_message(envelope: Envelope, state: State) -> std::result::Result<impl Reply, Infallible> {
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

/// The `Handler` registered for `ap2.mandates.PaymentMandate`: runs the full
/// chain-validation and authorize/capture/receipt pipeline and returns an
/// `ap2.responses.PaymentResult` payload.
pub struct PaymentMandateHandler {
    pub storage: Storage,
    pub self_did: String,
    pub resolver: Arc<dyn DidResolver>,
    pub jti_ledger: Arc<NonceLedger>,
    pub passkey_verifier: Arc<dyn PasskeyVerifier>,
    pub rp_id: String,
    pub allowed_origins: Vec<String>,
    pub credential_provider_client: reqwest::Client,
    pub credential_provider_url: String,
    pub public_base_url: String,
}

#[async_trait]
impl Handler for PaymentMandateHandler {
    async fn handle(&self, payload: Value) -> ap2_envelope::Result<HandlerReply> {
        let request: ChainValidationRequest =
            serde_json::from_value(payload).map_err(ap2_envelope::Error::Encoding)?;

        let ctx = ProcessorContext {
            self_did: &self.self_did,
            resolver: self.resolver.as_ref(),
            jti_ledger: &self.jti_ledger,
            passkey_verifier: self.passkey_verifier.as_ref(),
            rp_id: &self.rp_id,
            allowed_origins: &self.allowed_origins,
            storage: &self.storage,
            credential_provider_client: &self.credential_provider_client,
            credential_provider_url: &self.credential_provider_url,
            public_base_url: &self.public_base_url,
        };

        match domain::process_payment_mandate(&ctx, request).await {
            Ok(result) => {
                info!(transaction_id = %result.transaction_id, "payment mandate captured");
                Ok(HandlerReply::Value(serde_json::to_value(result).expect("PaymentResult always serialises")))
            }
            Err(e) => {
                error!(error = %e, "payment mandate validation failed");
                Err(ap2_envelope::Error::HandlerFailed(e.to_string()))
            }
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
