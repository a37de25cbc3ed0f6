//! A simulated passkey authenticator standing in for the human-facing
//! WebAuthn ceremony (§4.10 "obtains a WebAuthn assertion", out of scope for
//! this core). It holds one ECDSA P-256 keypair and a monotonic signature
//! counter, and produces assertions shaped exactly like a real
//! authenticator's: the Payment Processor's `webauthn_verify` cannot tell
//! the difference.

use ap2_crypto::keys::{Algorithm, KeyPair};
use ap2_crypto::webauthn::WebAuthnAssertion;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

const FLAG_USER_PRESENT: u8 = 0b0000_0001;
const FLAG_USER_VERIFIED: u8 = 0b0000_0100;

#[derive(Serialize)]
struct ClientData<'a> {
    #[serde(rename = "type")]
    ty: &'a str,
    challenge: String,
    origin: &'a str,
}

/// A single simulated passkey, held for the lifetime of one purchase.
pub struct Authenticator {
    key: KeyPair,
    counter: u32,
    pub raw_id: String,
}

impl Authenticator {
    pub fn new() -> Self {
        Self {
            key: KeyPair::generate(Algorithm::EcdsaP256),
            counter: 0,
            raw_id: format!("authenticator_{}", uuid::Uuid::new_v4().simple()),
        }
    }

    /// The authenticator's public key as an EC P-256 JWK, for embedding in a
    /// `cnf.jwk` claim (§4.4) so a verifier never needs the authenticator
    /// itself to check a later assertion against it.
    pub fn public_jwk(&self) -> serde_json::Value {
        let point = self.key.public_key_bytes();
        let x = B64.encode(&point[1..33]);
        let y = B64.encode(&point[33..65]);
        serde_json::json!({"kty": "EC", "crv": "P-256", "x": x, "y": y})
    }

    /// Sign a fresh assertion over `challenge`, advancing the internal
    /// counter (§8 "WebAuthn counter monotonicity").
    pub fn assert(&mut self, challenge: &[u8], rp_id: &str, origin: &str, ceremony_type: &str) -> WebAuthnAssertion {
        self.counter += 1;

        let mut rp_id_hash = Sha256::new();
        rp_id_hash.update(rp_id.as_bytes());
        let rp_id_hash = rp_id_hash.finalize();

        let mut authenticator_data = Vec::with_capacity(37);
        authenticator_data.extend_from_slice(&rp_id_hash);
        authenticator_data.push(FLAG_USER_PRESENT | FLAG_USER_VERIFIED);
        authenticator_data.extend_from_slice(&self.counter.to_be_bytes());

        let client_data_json = serde_json::to_vec(&ClientData {
            ty: ceremony_type,
            challenge: B64.encode(challenge),
            origin,
        })
        .expect("ClientData always serialises");

        let mut client_data_hash = Sha256::new();
        client_data_hash.update(&client_data_json);
        let client_data_hash = client_data_hash.finalize();

        let mut signed_data = Vec::with_capacity(authenticator_data.len() + 32);
        signed_data.extend_from_slice(&authenticator_data);
        signed_data.extend_from_slice(&client_data_hash);

        let signature = match &self.key {
            KeyPair::EcdsaP256 { signing, .. } => sign_der(signing, &signed_data),
            KeyPair::Ed25519 { .. } => unreachable!("authenticator always generates an EcdsaP256 key"),
        };

        WebAuthnAssertion {
            client_data_json,
            authenticator_data,
            signature,
        }
    }
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new()
    }
}

fn sign_der(signing: &P256SigningKey, data: &[u8]) -> Vec<u8> {
    let sig: P256Signature = signing.sign(data);
    sig.to_der().as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_crypto::webauthn::webauthn_verify;
    use ap2_crypto::cose::decode_cose_ec2_key;

    fn jwk_to_cose(jwk: &serde_json::Value) -> Vec<u8> {
        use ciborium::value::Value as CborValue;
        let x = B64.decode(jwk["x"].as_str().unwrap()).unwrap();
        let y = B64.decode(jwk["y"].as_str().unwrap()).unwrap();
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

    #[test]
    fn assertion_verifies_against_its_own_public_key() {
        let mut auth = Authenticator::new();
        let cose = jwk_to_cose(&auth.public_jwk());
        decode_cose_ec2_key(&cose).unwrap();

        let challenge = b"challenge-bytes-123";
        let assertion = auth.assert(challenge, "shop.example", "https://shop.example", "webauthn.get");

        let new_counter = webauthn_verify(
            &assertion,
            challenge,
            &cose,
            0,
            "shop.example",
            &["https://shop.example".to_string()],
        )
        .unwrap();
        assert_eq!(new_counter, 1);
    }

    #[test]
    fn counter_advances_on_each_assertion() {
        let mut auth = Authenticator::new();
        let cose = jwk_to_cose(&auth.public_jwk());
        let challenge_a = b"challenge-a";
        let challenge_b = b"challenge-b";

        let first = auth.assert(challenge_a, "shop.example", "https://shop.example", "webauthn.get");
        let counter_a = webauthn_verify(&first, challenge_a, &cose, 0, "shop.example", &["https://shop.example".to_string()]).unwrap();

        let second = auth.assert(challenge_b, "shop.example", "https://shop.example", "webauthn.get");
        let counter_b = webauthn_verify(&second, challenge_b, &cose, counter_a, "shop.example", &["https://shop.example".to_string()]).unwrap();

        assert!(counter_b > counter_a);
    }
}
