//! WebAuthn/FIDO2 assertion verification (§4.1 `webauthn_verify`).

use crate::canonical::sha256_bytes;
use crate::cose::decode_cose_ec2_key;
use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey as P256VerifyingKey};
use serde::Deserialize;

/// The raw bytes produced by `navigator.credentials.get()`/`.create()`,
/// as relayed to the Credential Provider in `POST /verify/attestation`.
#[derive(Debug, Clone)]
pub struct WebAuthnAssertion {
    /// The authenticator's `clientDataJSON`, raw bytes.
    pub client_data_json: Vec<u8>,
    /// The authenticator's `authenticatorData`, raw bytes.
    pub authenticator_data: Vec<u8>,
    /// The raw ECDSA signature over `authenticatorData || SHA-256(clientDataJSON)`.
    pub signature: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    ty: String,
    challenge: String,
    origin: String,
}

const FLAG_USER_PRESENT: u8 = 0b0000_0001;
const FLAG_USER_VERIFIED: u8 = 0b0000_0100;

/// Outcome of a successful verification: the authenticator's new signature
/// counter, to be persisted so the next assertion's counter can be checked
/// for monotonic advance.
pub type NewCounter = u32;

/// Verify a WebAuthn assertion per §4.1 steps 1–5.
///
/// `expected_challenge` is the raw challenge bytes the caller minted (before
/// base64url-encoding); `allowed_origins` is the exact-match allow-list per
/// the spec's Open Question resolution (no substring/suffix matching).
#[allow(clippy::too_many_arguments)]
pub fn webauthn_verify(
    assertion: &WebAuthnAssertion,
    expected_challenge: &[u8],
    stored_public_key_cose: &[u8],
    stored_counter: u32,
    expected_rp_id: &str,
    allowed_origins: &[String],
) -> Result<NewCounter> {
    // Step 1: clientDataJSON
    let client_data: ClientData = serde_json::from_slice(&assertion.client_data_json)
        .map_err(|e| Error::WebAuthnInvalid(format!("malformed clientDataJSON: {e}")))?;

    if client_data.ty != "webauthn.get" && client_data.ty != "webauthn.create" {
        return Err(Error::WebAuthnInvalid(format!(
            "unexpected clientData type: {}",
            client_data.ty
        )));
    }

    let received_challenge = B64
        .decode(&client_data.challenge)
        .map_err(|e| Error::WebAuthnInvalid(format!("bad challenge encoding: {e}")))?;
    if received_challenge != expected_challenge {
        return Err(Error::WebAuthnInvalid("challenge mismatch".into()));
    }

    if !allowed_origins.iter().any(|o| o == &client_data.origin) {
        return Err(Error::WebAuthnInvalid(format!(
            "origin {} not in allow-list",
            client_data.origin
        )));
    }

    // Step 2: authenticatorData
    let auth_data = &assertion.authenticator_data;
    if auth_data.len() < 37 {
        return Err(Error::WebAuthnInvalid("authenticatorData too short".into()));
    }
    let rp_id_hash = &auth_data[0..32];
    let expected_rp_id_hash = sha256_bytes(expected_rp_id.as_bytes());
    if rp_id_hash != expected_rp_id_hash {
        return Err(Error::WebAuthnInvalid("rpIdHash mismatch".into()));
    }

    let flags = auth_data[32];
    if flags & FLAG_USER_PRESENT == 0 {
        return Err(Error::WebAuthnInvalid("user presence flag not set".into()));
    }
    if flags & FLAG_USER_VERIFIED == 0 {
        tracing::warn!("WebAuthn assertion lacks user verification flag for a payment flow");
    }

    // Step 3: counter monotonicity
    let received_counter = u32::from_be_bytes([auth_data[33], auth_data[34], auth_data[35], auth_data[36]]);
    if stored_counter > 0 && received_counter > 0 && received_counter <= stored_counter {
        return Err(Error::WebAuthnInvalid("counter_regression".into()));
    }

    // Step 4: decode COSE key and verify signature over authData || SHA-256(clientDataJSON)
    let cose_key = decode_cose_ec2_key(stored_public_key_cose)?;
    let verifying = P256VerifyingKey::from_sec1_bytes(&cose_key.sec1_point)
        .map_err(|e| Error::WebAuthnInvalid(format!("bad stored public key: {e}")))?;

    let client_data_hash = sha256_bytes(&assertion.client_data_json);
    let mut signed_data = Vec::with_capacity(auth_data.len() + 32);
    signed_data.extend_from_slice(auth_data);
    signed_data.extend_from_slice(&client_data_hash);

    let sig = P256Signature::from_der(&assertion.signature)
        .map_err(|e| Error::WebAuthnInvalid(format!("bad signature encoding: {e}")))?;
    verifying
        .verify(&signed_data, &sig)
        .map_err(|_| Error::WebAuthnInvalid("signature verification failed".into()))?;

    Ok(received_counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Algorithm, KeyPair};
    use ciborium::value::Value as CborValue;
    use ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;

    fn cose_bytes_for(signing: &SigningKey) -> Vec<u8> {
        let point = signing.verifying_key().to_encoded_point(false);
        let x = point.x().unwrap().to_vec();
        let y = point.y().unwrap().to_vec();
        let map = CborValue::Map(vec![
            (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
            (CborValue::Integer((-1).into()), CborValue::Integer(1.into())),
            (CborValue::Integer((-2).into()), CborValue::Bytes(x)),
            (CborValue::Integer((-3).into()), CborValue::Bytes(y)),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out).unwrap();
        out
    }

    fn build_auth_data(rp_id: &str, flags: u8, counter: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&sha256_bytes(rp_id.as_bytes()));
        out.push(flags);
        out.extend_from_slice(&counter.to_be_bytes());
        out
    }

    fn sign_assertion(
        signing: &SigningKey,
        rp_id: &str,
        challenge: &[u8],
        origin: &str,
        counter: u32,
    ) -> WebAuthnAssertion {
        let client_data = serde_json::json!({
            "type": "webauthn.get",
            "challenge": B64.encode(challenge),
            "origin": origin,
        });
        let client_data_json = serde_json::to_vec(&client_data).unwrap();
        let authenticator_data = build_auth_data(rp_id, FLAG_USER_PRESENT | FLAG_USER_VERIFIED, counter);

        let client_data_hash = sha256_bytes(&client_data_json);
        let mut signed = authenticator_data.clone();
        signed.extend_from_slice(&client_data_hash);
        let sig: P256Signature = signing.sign(&signed);

        WebAuthnAssertion {
            client_data_json,
            authenticator_data,
            signature: sig.to_der().as_bytes().to_vec(),
        }
    }

    #[test]
    fn valid_assertion_returns_new_counter() {
        let kp = KeyPair::generate(Algorithm::EcdsaP256);
        let signing = match &kp {
            KeyPair::EcdsaP256 { signing, .. } => signing.as_ref().clone(),
            _ => unreachable!(),
        };
        let cose = cose_bytes_for(&signing);
        let challenge = b"random-challenge-bytes";
        let assertion = sign_assertion(&signing, "example.com", challenge, "https://example.com", 5);

        let result = webauthn_verify(
            &assertion,
            challenge,
            &cose,
            0,
            "example.com",
            &["https://example.com".to_string()],
        )
        .unwrap();
        assert_eq!(result, 5);
    }

    #[test]
    fn counter_regression_is_rejected() {
        let kp = KeyPair::generate(Algorithm::EcdsaP256);
        let signing = match &kp {
            KeyPair::EcdsaP256 { signing, .. } => signing.as_ref().clone(),
            _ => unreachable!(),
        };
        let cose = cose_bytes_for(&signing);
        let challenge = b"another-challenge";
        let assertion = sign_assertion(&signing, "example.com", challenge, "https://example.com", 17);

        let result = webauthn_verify(
            &assertion,
            challenge,
            &cose,
            42,
            "example.com",
            &["https://example.com".to_string()],
        );
        assert!(matches!(result, Err(Error::WebAuthnInvalid(reason)) if reason == "counter_regression"));
    }

    #[test]
    fn origin_not_in_allow_list_is_rejected() {
        let kp = KeyPair::generate(Algorithm::EcdsaP256);
        let signing = match &kp {
            KeyPair::EcdsaP256 { signing, .. } => signing.as_ref().clone(),
            _ => unreachable!(),
        };
        let cose = cose_bytes_for(&signing);
        let challenge = b"challenge";
        let assertion = sign_assertion(&signing, "example.com", challenge, "https://evil.example", 1);

        let result = webauthn_verify(
            &assertion,
            challenge,
            &cose,
            0,
            "example.com",
            &["https://example.com".to_string()],
        );
        assert!(result.is_err());
    }
}
