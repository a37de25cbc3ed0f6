//! Request handlers for the Merchant Agent HTTP server, and the
//! `IntentMandate`/`PaymentMandate` `Handler`s registered on the A2A router.

use crate::domain::{self, ProductSource};
use crate::storage::{AuditEntry, Direction, Storage};
use ap2_crypto::keys::KeyPair;
use ap2_envelope::did::DidResolver;
use ap2_envelope::dispatch::{Handler, Reply as HandlerReply, Router};
use ap2_envelope::envelope::{DataPartType, Envelope};
use ap2_envelope::Received;
use ap2_model::did::DidDocument;
use ap2_model::mandate::IntentMandate;
use ap2_store::NonceLedger;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;
use warp::{reply::json, Reply};

/// Shared handler state, cloned cheaply per-request by warp's filter graph.
#[derive(Clone)]
pub struct State {
    pub storage: Storage,
    pub did: String,
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

/// Uniform `POST /a2a/message` endpoint (§6). Records the audit entry the
/// design requires for every inbound envelope before dispatching, whatever
/// the outcome; the matching outbound entry (if the handler relays a fresh
/// envelope onward) is written by `domain::relay_envelope`.
pub async fn handle_a2a_message(envelope: Envelope, state: State) -> std::result::Result<impl Reply, Infallible> {
    let data_type = envelope.data_part.ty.as_str();
    let message_id = envelope.header.message_id.clone();
    let sender = envelope.header.sender.clone();
    let recipient = envelope.header.recipient.clone();
    let timestamp = envelope.header.timestamp.clone();

    let result = ap2_envelope::receive_envelope(
        &envelope, &state.did, &state.nonce_ledger, state.resolver.as_ref(), &state.router,
    ).await;

    let summary = match &result {
        Ok(_) => format!("accepted {data_type}"),
        Err(e) => format!("rejected {data_type}: {e}"),
    };
    domain::audit(
        &state.storage,
        AuditEntry { message_id, sender, recipient, timestamp, data_type: data_type.to_string(), direction: Direction::Inbound, summary },
    ).await;

    match result {
        Ok(Received::Value(value)) => Ok(json(&value)),
        Ok(Received::Artifact(artifact)) => Ok(json(&artifact)),
        Err(e) => {
            error!(error = %e, "a2a/message rejected");
            Ok(json(&json!({ "error_kind": "A2ARejected", "message": e.to_string() })))
        }
    }
}

/// The `Handler` registered for `ap2.mandates.IntentMandate`: searches the
/// catalogue, builds up to three candidate carts, has the Merchant sign
/// each, and returns them as an `ap2.responses.CartCandidates` artifact.
pub struct IntentMandateHandler {
    pub merchant_url: String,
    pub merchant_name: String,
    pub http_client: reqwest::Client,
    pub catalog: Arc<dyn ProductSource>,
}

#[async_trait]
impl Handler for IntentMandateHandler {
    async fn handle(&self, payload: Value) -> ap2_envelope::Result<HandlerReply> {
        let intent: IntentMandate = serde_json::from_value(payload).map_err(ap2_envelope::Error::Encoding)?;

        let candidates = domain::build_cart_candidates(&intent, &self.merchant_name, self.catalog.as_ref())
            .map_err(|e| ap2_envelope::Error::HandlerFailed(e.to_string()))?;

        let mut artifacts = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let signed = domain::sign_candidate(&self.http_client, &self.merchant_url, candidate.contents)
                .await
                .map_err(|e| ap2_envelope::Error::HandlerFailed(e.to_string()))?;
            artifacts.push(domain::CartCandidateArtifact {
                artifact_id: Uuid::new_v4().to_string(),
                name: candidate.label.to_string(),
                data_type_key: "ap2.mandates.CartMandate",
                data: signed,
            });
        }

        info!(intent_id = %intent.id, candidates = artifacts.len(), "returned cart candidates");
        let artifact_data = json!({ "candidates": artifacts });
        Ok(HandlerReply::Artifact {
            artifact_name: "cart_candidates".to_string(),
            data_type_key: DataPartType::CartCandidates,
            artifact_data,
        })
    }
}

/// The `Handler` registered for `ap2.mandates.PaymentMandate`: forwards the
/// payload unchanged to the Payment Processor, signed afresh as this agent,
/// and returns the processor's `ap2.responses.PaymentResult` unchanged.
pub struct PaymentMandateHandler {
    pub storage: Storage,
    pub self_did: String,
    pub agent_key: Arc<KeyPair>,
    pub payment_processor_did: String,
    pub payment_processor_url: String,
    pub http_client: reqwest::Client,
}

#[async_trait]
impl Handler for PaymentMandateHandler {
    async fn handle(&self, payload: Value) -> ap2_envelope::Result<HandlerReply> {
        let data_id = payload
            .get("payment_mandate_contents")
            .and_then(|c| c.get("payment_mandate_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let kid = format!("{}#key-1", self.self_did);

        let result = domain::relay_envelope(
            &self.storage,
            &self.http_client,
            &self.payment_processor_url,
            &self.self_did,
            &self.payment_processor_did,
            DataPartType::PaymentMandate,
            data_id,
            payload,
            &self.agent_key,
            &kid,
        )
        .await
        .map_err(|e| ap2_envelope::Error::HandlerFailed(e.to_string()))?;

        info!("relayed payment mandate to payment processor");
        Ok(HandlerReply::Value(result))
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
