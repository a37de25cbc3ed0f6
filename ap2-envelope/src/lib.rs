//! The A2A envelope handler: construction, the ordered inbound validation
//! pipeline, DID resolution and typed dispatch (§4.2, §4.3).
//!
//! This crate knows nothing about HTTP; each service crate's `server.rs`
//! deserialises the request body into an [`Envelope`], calls
//! [`receive_envelope`], and turns the result into a response. That keeps
//! the validation pipeline itself testable without standing up a socket.

pub mod dispatch;
pub mod did;
pub mod envelope;
pub mod error;

pub use error::{Error, Result};

use ap2_crypto::keys::KeyPair;
use ap2_store::NonceLedger;
use chrono::Duration as ChronoDuration;
use dispatch::{Reply, Router};
use envelope::{build_envelope, check_allowed_algorithm, check_kid_matches_sender, check_timestamp_window, verify_envelope_signature, DataPartType, Envelope};
use serde_json::Value;

/// The acceptance window for `|now - header.timestamp|` (§4.2 step 3, §3).
pub const TIMESTAMP_WINDOW: ChronoDuration = ChronoDuration::seconds(300);

/// Outcome of successfully processing an inbound envelope.
pub enum Received {
    /// The handler returned a plain value; here it is, unwrapped, ready for
    /// the caller to sign into a response envelope with
    /// [`build_envelope`] if one is needed.
    Value(Value),
    /// The handler returned a collection, already shaped as an Artifact
    /// response.
    Artifact(dispatch::ArtifactResponse),
}

/// Run the full ordered validation pipeline from §4.2 "Receive" against an
/// inbound envelope, then dispatch to the matching handler.
///
/// Checks execute in the exact order the design calls out, and the first
/// failure returns without mutating the nonce ledger beyond what that same
/// check performs (the nonce check-and-record only fires once every earlier
/// check has passed, and it is itself the one piece of state this function
/// mutates).
pub async fn receive_envelope(
    envelope: &Envelope,
    own_did: &str,
    nonce_ledger: &NonceLedger,
    resolver: &dyn did::DidResolver,
    router: &Router,
) -> Result<Received> {
    // Step 1: proof algorithm allow-list.
    check_allowed_algorithm(&envelope.header.proof.algorithm)?;

    // Step 2: kid is a DID URL whose DID equals header.sender.
    check_kid_matches_sender(&envelope.header)?;

    let _ = own_did; // recipient routing is the HTTP layer's job; kept for future audit logging.

    // Step 3: timestamp window.
    check_timestamp_window(&envelope.header.timestamp, TIMESTAMP_WINDOW)?;

    // Step 4: atomic nonce check-and-record. This MUST happen before the
    // (potentially slow) DID resolution and signature check below, so a
    // flood of replayed envelopes is rejected before doing any further work.
    if !nonce_ledger.check_and_record(&envelope.header.nonce) {
        return Err(Error::ReplayDetected);
    }

    // Step 5: resolve the signer's public key.
    let public_key_hex = resolver.resolve_public_key(&envelope.header.proof.kid).await?;

    // Step 6: verify the detached signature.
    verify_envelope_signature(envelope, &public_key_hex)?;

    // Step 7: dispatch on dataPart.type.
    let reply = router
        .dispatch(envelope.data_part.ty, envelope.data_part.payload.clone())
        .await?;

    match reply {
        Reply::Value(value) => Ok(Received::Value(value)),
        artifact @ Reply::Artifact { .. } => {
            let artifact_response: Option<dispatch::ArtifactResponse> = artifact.into();
            Ok(Received::Artifact(artifact_response.expect("Reply::Artifact always converts")))
        }
    }
}

/// Sign and wrap `payload` as an outbound envelope addressed to `recipient_did`.
pub fn send_envelope(
    sender_did: &str,
    recipient_did: &str,
    data_type: DataPartType,
    data_id: impl Into<String>,
    payload: Value,
    signing_key: &KeyPair,
    signing_kid: &str,
) -> Result<Envelope> {
    build_envelope(sender_did, recipient_did, data_type, data_id, payload, signing_key, signing_kid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_crypto::keys::Algorithm;
    use ap2_model::did::DidDocument;
    use async_trait::async_trait;
    use did::StaticDidResolver;
    use dispatch::Handler;
    use serde_json::json;
    use std::sync::Arc;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn handle(&self, payload: Value) -> Result<Reply> {
            Ok(Reply::Value(payload))
        }
    }

    fn wired() -> (KeyPair, StaticDidResolver, Router) {
        let key = KeyPair::generate(Algorithm::EcdsaP256);
        let doc = DidDocument::single_key("did:ap2:merchant:acme", &key);
        let resolver = StaticDidResolver::new().with_document(doc);
        let router = Router::new().register(DataPartType::CartMandate, Arc::new(EchoHandler));
        (key, resolver, router)
    }

    #[tokio::test]
    async fn honest_message_with_fresh_nonce_is_admitted() {
        let (key, resolver, router) = wired();
        let ledger = NonceLedger::new();
        let envelope = send_envelope(
            "did:ap2:merchant:acme",
            "did:ap2:processor:core",
            DataPartType::CartMandate,
            "cart_1",
            json!({"hello": "world"}),
            &key,
            "did:ap2:merchant:acme#key-1",
        )
        .unwrap();

        let result = receive_envelope(&envelope, "did:ap2:processor:core", &ledger, &resolver, &router).await;
        assert!(matches!(result, Ok(Received::Value(_))));
    }

    #[tokio::test]
    async fn replayed_message_is_rejected() {
        let (key, resolver, router) = wired();
        let ledger = NonceLedger::new();
        let envelope = send_envelope(
            "did:ap2:merchant:acme",
            "did:ap2:processor:core",
            DataPartType::CartMandate,
            "cart_1",
            json!({"hello": "world"}),
            &key,
            "did:ap2:merchant:acme#key-1",
        )
        .unwrap();

        assert!(receive_envelope(&envelope, "did:ap2:processor:core", &ledger, &resolver, &router)
            .await
            .is_ok());
        let replay = receive_envelope(&envelope, "did:ap2:processor:core", &ledger, &resolver, &router).await;
        assert!(matches!(replay, Err(Error::ReplayDetected)));
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let (key, resolver, router) = wired();
        let ledger = NonceLedger::new();
        let mut envelope = send_envelope(
            "did:ap2:merchant:acme",
            "did:ap2:processor:core",
            DataPartType::CartMandate,
            "cart_1",
            json!({"amount": "100"}),
            &key,
            "did:ap2:merchant:acme#key-1",
        )
        .unwrap();
        envelope.data_part.payload = json!({"amount": "999"});

        let result = receive_envelope(&envelope, "did:ap2:processor:core", &ledger, &resolver, &router).await;
        assert!(matches!(result, Err(Error::SignatureInvalid)));
    }

    #[tokio::test]
    async fn unknown_data_type_is_rejected() {
        let (key, resolver, _router) = wired();
        let router = Router::new(); // nothing registered
        let ledger = NonceLedger::new();
        let envelope = send_envelope(
            "did:ap2:merchant:acme",
            "did:ap2:processor:core",
            DataPartType::PaymentMandate,
            "pm_1",
            json!({}),
            &key,
            "did:ap2:merchant:acme#key-1",
        )
        .unwrap();

        let result = receive_envelope(&envelope, "did:ap2:processor:core", &ledger, &resolver, &router).await;
        assert!(matches!(result, Err(Error::NoHandler(_))));
    }
}
