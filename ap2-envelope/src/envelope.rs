//! The A2A envelope wire format (§4.2, §6) and its detached-signature helpers.

use crate::error::{Error, Result};
use ap2_crypto::canonical::canonical_json;
use ap2_crypto::keys::{verify_detached, KeyPair, Proof};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The closed set of `dataPart.type` strings AP2 defines (§6). Unknown
/// strings are rejected at the dispatch boundary rather than silently
/// accepted, per §4.2 step 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataPartType {
    #[serde(rename = "ap2.mandates.IntentMandate")]
    IntentMandate,
    #[serde(rename = "ap2.mandates.CartMandate")]
    CartMandate,
    #[serde(rename = "ap2.mandates.PaymentMandate")]
    PaymentMandate,
    #[serde(rename = "ap2.requests.ProductSearch")]
    ProductSearch,
    #[serde(rename = "ap2.requests.CartRequest")]
    CartRequest,
    #[serde(rename = "ap2.requests.CartSelection")]
    CartSelection,
    #[serde(rename = "ap2.responses.ProductList")]
    ProductList,
    #[serde(rename = "ap2.responses.CartCandidates")]
    CartCandidates,
    #[serde(rename = "ap2.responses.PaymentResult")]
    PaymentResult,
    #[serde(rename = "ap2.responses.SignatureResponse")]
    SignatureResponse,
}

impl DataPartType {
    /// The canonical wire string, matching the `#[serde(rename = ...)]` above.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataPartType::IntentMandate => "ap2.mandates.IntentMandate",
            DataPartType::CartMandate => "ap2.mandates.CartMandate",
            DataPartType::PaymentMandate => "ap2.mandates.PaymentMandate",
            DataPartType::ProductSearch => "ap2.requests.ProductSearch",
            DataPartType::CartRequest => "ap2.requests.CartRequest",
            DataPartType::CartSelection => "ap2.requests.CartSelection",
            DataPartType::ProductList => "ap2.responses.ProductList",
            DataPartType::CartCandidates => "ap2.responses.CartCandidates",
            DataPartType::PaymentResult => "ap2.responses.PaymentResult",
            DataPartType::SignatureResponse => "ap2.responses.SignatureResponse",
        }
    }
}

/// `dataPart` of an envelope: a typed, identified payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPart {
    #[serde(rename = "type")]
    pub ty: DataPartType,
    pub id: String,
    pub payload: Value,
}

/// `header` of an envelope, carrying routing, replay-defence and proof data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub message_id: String,
    pub sender: String,
    pub recipient: String,
    pub timestamp: String,
    pub nonce: String,
    pub schema_version: String,
    pub proof: Proof,
}

/// A full A2A envelope: signed header plus typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Header,
    #[serde(rename = "dataPart")]
    pub data_part: DataPart,
}

const SCHEMA_VERSION: &str = "0.2";

/// Split a fully-qualified `kid` (`did:...#key-N`) into `(did, fragment)`,
/// rejecting anything without a `#`.
fn split_kid(kid: &str) -> Result<(&str, &str)> {
    kid.split_once('#')
        .ok_or_else(|| Error::MalformedKid(kid.to_string()))
}

/// Render the bytes that get signed/verified: the full envelope with
/// `proof.signatureValue` blanked out, canonicalised per RFC 8785. The
/// signed span therefore covers every other header field (including
/// `nonce`/`timestamp`) and the entire `dataPart`, as §4.2 step 2 requires.
fn signing_bytes(envelope: &Envelope) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(envelope)?;
    value["header"]["proof"]["signatureValue"] = Value::String(String::new());
    Ok(canonical_json(&value)?)
}

/// Construct and sign a fresh outbound envelope (§4.2 "Send").
pub fn build_envelope(
    sender_did: &str,
    recipient_did: &str,
    data_type: DataPartType,
    data_id: impl Into<String>,
    payload: Value,
    signing_key: &KeyPair,
    signing_kid: &str,
) -> Result<Envelope> {
    let mut nonce_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    // Placeholder proof; `sign_detached` below fills in the real fields bar
    // `signatureValue`, which is computed last and spliced back in.
    let placeholder_proof = Proof {
        algorithm: signing_key.algorithm().jose_alg().to_string(),
        signature_value: String::new(),
        public_key: hex::encode(signing_key.public_key_bytes()),
        kid: signing_kid.to_string(),
        created: Utc::now().to_rfc3339(),
        proof_purpose: "authentication".to_string(),
    };

    let mut envelope = Envelope {
        header: Header {
            message_id: Uuid::new_v4().to_string(),
            sender: sender_did.to_string(),
            recipient: recipient_did.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            nonce: hex::encode(nonce_bytes),
            schema_version: SCHEMA_VERSION.to_string(),
            proof: placeholder_proof,
        },
        data_part: DataPart {
            ty: data_type,
            id: data_id.into(),
            payload,
        },
    };

    let bytes = signing_bytes(&envelope)?;
    let proof = signing_key.sign_detached(&bytes, signing_kid)?;
    envelope.header.proof = proof;
    Ok(envelope)
}

/// Verify the detached signature over `envelope` against `public_key_hex`,
/// the key resolved for `envelope.header.proof.kid` (§4.2 step 6).
pub fn verify_envelope_signature(envelope: &Envelope, public_key_hex: &str) -> Result<()> {
    let bytes = signing_bytes(envelope)?;
    verify_detached(&bytes, &envelope.header.proof, public_key_hex).map_err(|_| Error::SignatureInvalid)
}

/// §4.2 step 1: the proof algorithm must be one of the allow-listed names.
pub fn check_allowed_algorithm(proof_algorithm: &str) -> Result<()> {
    let normalized = proof_algorithm.to_ascii_uppercase();
    match normalized.as_str() {
        "ECDSA" | "ES256" | "ED25519" | "EDDSA" => Ok(()),
        other => Err(Error::UnsupportedAlgorithm(other.to_string())),
    }
}

/// §4.2 step 2: `proof.kid` must be a well-formed DID URL with a fragment,
/// and its DID part must equal `header.sender`.
pub fn check_kid_matches_sender(header: &Header) -> Result<()> {
    let (did, _fragment) = split_kid(&header.proof.kid)?;
    if did != header.sender {
        return Err(Error::SenderMismatch);
    }
    Ok(())
}

/// §4.2 step 3: `|now - timestamp| <= window`.
pub fn check_timestamp_window(timestamp: &str, window: chrono::Duration) -> Result<()> {
    let parsed = chrono::DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| Error::TimestampOutOfWindow(format!("unparseable timestamp {timestamp:?}: {e}")))?
        .with_timezone(&Utc);
    let delta = Utc::now().signed_duration_since(parsed);
    if delta.abs() > window {
        return Err(Error::TimestampOutOfWindow(format!(
            "timestamp {timestamp} is {delta} from now, outside +/-{window}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_crypto::keys::Algorithm;
    use serde_json::json;

    fn test_key() -> KeyPair {
        KeyPair::generate(Algorithm::EcdsaP256)
    }

    #[test]
    fn build_then_verify_round_trips() {
        let key = test_key();
        let kid = "did:ap2:merchant:acme#key-1";
        let envelope = build_envelope(
            "did:ap2:merchant:acme",
            "did:ap2:processor:core",
            DataPartType::CartMandate,
            "cart_1",
            json!({"hello": "world"}),
            &key,
            kid,
        )
        .unwrap();

        let public_key_hex = hex::encode(key.public_key_bytes());
        assert!(verify_envelope_signature(&envelope, &public_key_hex).is_ok());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let key = test_key();
        let kid = "did:ap2:merchant:acme#key-1";
        let mut envelope = build_envelope(
            "did:ap2:merchant:acme",
            "did:ap2:processor:core",
            DataPartType::CartMandate,
            "cart_1",
            json!({"amount": "100"}),
            &key,
            kid,
        )
        .unwrap();
        envelope.data_part.payload = json!({"amount": "999"});

        let public_key_hex = hex::encode(key.public_key_bytes());
        assert!(verify_envelope_signature(&envelope, &public_key_hex).is_err());
    }

    #[test]
    fn allowed_algorithm_is_case_insensitive() {
        assert!(check_allowed_algorithm("es256").is_ok());
        assert!(check_allowed_algorithm("ECDSA").is_ok());
        assert!(check_allowed_algorithm("ed25519").is_ok());
        assert!(check_allowed_algorithm("HS256").is_err());
    }

    #[test]
    fn kid_must_match_sender_did() {
        let header = Header {
            message_id: "m1".into(),
            sender: "did:ap2:merchant:acme".into(),
            recipient: "did:ap2:processor:core".into(),
            timestamp: Utc::now().to_rfc3339(),
            nonce: "ab".into(),
            schema_version: SCHEMA_VERSION.into(),
            proof: Proof {
                algorithm: "ES256".into(),
                signature_value: String::new(),
                public_key: String::new(),
                kid: "did:ap2:merchant:evil#key-1".into(),
                created: Utc::now().to_rfc3339(),
                proof_purpose: "authentication".into(),
            },
        };
        assert!(matches!(check_kid_matches_sender(&header), Err(Error::SenderMismatch)));
    }

    #[test]
    fn timestamp_window_rejects_stale_messages() {
        let stale = (Utc::now() - chrono::Duration::seconds(301)).to_rfc3339();
        assert!(check_timestamp_window(&stale, chrono::Duration::seconds(300)).is_err());
        let fresh = Utc::now().to_rfc3339();
        assert!(check_timestamp_window(&fresh, chrono::Duration::seconds(300)).is_ok());
    }
}
