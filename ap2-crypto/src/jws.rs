//! Compact JWS construction and verification (§4.1 `jws_compact_sign`/`_verify`).
//!
//! Used for `merchant_authorization` (ES256 only) and for the unsigned
//! JWT-shaped carriers inside `user_authorization` (§4.4), which this module
//! also renders/parses even though they are never passed to `jws_compact_verify`.

use crate::canonical::sha256_bytes;
use crate::error::{Error, Result};
use crate::keys::{Algorithm, KeyPair};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Sign `payload` under `header` with `key`, producing a compact JWS
/// (`<b64u(header)>.<b64u(payload)>.<b64u(sig)>`). Only `ES256` is supported
/// here — that is the only algorithm the spec's mandate artefacts ever use.
pub fn sign_compact<H: Serialize, P: Serialize>(header: &H, payload: &P, key: &KeyPair) -> Result<String> {
    let header_b64 = B64.encode(serde_json::to_vec(header)?);
    let payload_b64 = B64.encode(serde_json::to_vec(payload)?);
    let signing_input = format!("{header_b64}.{payload_b64}");

    let sig_bytes = match key {
        KeyPair::EcdsaP256 { signing, .. } => {
            // JOSE ES256 signs SHA-256(signing_input) and emits the fixed-size
            // r||s encoding, not the DER form used by `sign_detached`.
            let sig: P256Signature = signing.sign(signing_input.as_bytes());
            sig.to_bytes().to_vec()
        }
        KeyPair::Ed25519 { .. } => {
            return Err(Error::UnsupportedAlgorithm(
                "only ES256 is used for compact JWS in this core".into(),
            ))
        }
    };

    Ok(format!("{signing_input}.{}", B64.encode(sig_bytes)))
}

/// Parsed, but not yet verified, compact JWS.
pub struct UnverifiedJws {
    pub header: Value,
    pub payload: Value,
    header_b64: String,
    payload_b64: String,
    signature: Vec<u8>,
}

/// Split a compact JWS into its three parts and decode header/payload as JSON,
/// without checking the signature.
pub fn parse_compact(token: &str) -> Result<UnverifiedJws> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::MalformedToken(format!(
            "expected 3 dot-separated parts, got {}",
            parts.len()
        )));
    }
    let header_bytes = B64
        .decode(parts[0])
        .map_err(|e| Error::MalformedToken(e.to_string()))?;
    let payload_bytes = B64
        .decode(parts[1])
        .map_err(|e| Error::MalformedToken(e.to_string()))?;
    let signature = B64
        .decode(parts[2])
        .map_err(|e| Error::MalformedToken(e.to_string()))?;

    Ok(UnverifiedJws {
        header: serde_json::from_slice(&header_bytes)?,
        payload: serde_json::from_slice(&payload_bytes)?,
        header_b64: parts[0].to_string(),
        payload_b64: parts[1].to_string(),
        signature,
    })
}

/// Verify a compact JWS against `expected_alg` and a public key resolved from
/// the header's `kid` by `resolve`. Rejects `alg=none` and any algorithm not
/// equal to `expected_alg` — the spec requires a caller-specified whitelist,
/// and this core only ever whitelists one algorithm per call site.
pub fn verify_compact<F, P>(token: &str, expected_alg: &str, resolve: F) -> Result<P>
where
    F: FnOnce(&str) -> Result<String>,
    P: DeserializeOwned,
{
    let parsed = parse_compact(token)?;
    let alg = parsed
        .header
        .get("alg")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MalformedToken("missing alg".into()))?;
    if alg.eq_ignore_ascii_case("none") {
        return Err(Error::UnsupportedAlgorithm("alg=none is rejected".into()));
    }
    if !alg.eq_ignore_ascii_case(expected_alg) {
        return Err(Error::UnsupportedAlgorithm(format!(
            "expected {expected_alg}, got {alg}"
        )));
    }
    let kid = parsed
        .header
        .get("kid")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MalformedToken("missing kid".into()))?;
    let public_key_hex = resolve(kid)?;

    let algorithm = Algorithm::from_jose_alg(alg)?;
    let signing_input = format!("{}.{}", parsed.header_b64, parsed.payload_b64);
    match algorithm {
        Algorithm::EcdsaP256 => {
            let public_key =
                hex::decode(&public_key_hex).map_err(|e| Error::InvalidKey(e.to_string()))?;
            let verifying = P256VerifyingKey::from_sec1_bytes(&public_key)
                .map_err(|e| Error::InvalidKey(e.to_string()))?;
            let sig = P256Signature::from_slice(&parsed.signature)
                .map_err(|e| Error::MalformedToken(e.to_string()))?;
            verifying
                .verify(signing_input.as_bytes(), &sig)
                .map_err(|_| Error::SignatureInvalid)?;
        }
        Algorithm::Ed25519 => {
            return Err(Error::UnsupportedAlgorithm(
                "only ES256 is used for compact JWS in this core".into(),
            ))
        }
    }

    Ok(serde_json::from_value(parsed.payload)?)
}

/// SHA-256 of the raw bytes of a compact issuer-JWT pair (`<header>.<payload>`),
/// used as the KB-JWT's `sd_hash` per §4.4 Form A/B.
pub fn sd_hash(issuer_jwt: &str) -> String {
    hex::encode(sha256_bytes(issuer_jwt.as_bytes()))
}

/// Re-export so downstream crates don't need a direct `p256` dependency just
/// to reconstruct a signing key for tests.
pub fn p256_signing_key_from_bytes(bytes: &[u8]) -> Result<P256SigningKey> {
    P256SigningKey::from_slice(bytes).map_err(|e| Error::InvalidKey(e.to_string()))
}
