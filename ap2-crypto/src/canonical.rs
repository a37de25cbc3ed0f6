//! RFC 8785 JSON Canonicalisation Scheme (JCS) and SHA-256 hashing helpers.
//!
//! Every hash in the mandate chain (`cart_hash`, `payment_hash`, the KB-JWT
//! `sd_hash`) is computed over the canonical JSON encoding of a value, never
//! over whatever byte-for-byte serialization `serde_json` happens to produce.
//! We lean on `serde_jcs`, a vetted JCS implementation, rather than a
//! hand-rolled sort-keys-and-compact pass: the spec calls out that a
//! hand-rolled canonicalizer is known to diverge on non-ASCII code points and
//! floats.

use crate::error::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Encode `value` as RFC 8785 canonical JSON bytes.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let s = serde_jcs::to_string(value).map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(s.into_bytes())
}

/// SHA-256 of arbitrary bytes.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of arbitrary bytes, hex-encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_bytes(data))
}

/// SHA-256 of the canonical JSON encoding of `value`, hex-encoded.
///
/// This is the primitive behind `cart_hash` and `payment_hash`: both are
/// `SHA-256(canonical_json(contents))`.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String> {
    let bytes = canonical_json(value)?;
    Ok(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_is_irrelevant() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn canonical_json_is_deterministic() {
        let v = json!({"z": [1,2,3], "a": {"nested": true}, "s": "hello"});
        let first = canonical_json(&v).unwrap();
        let roundtrip: serde_json::Value =
            serde_json::from_str(&String::from_utf8(first.clone()).unwrap()).unwrap();
        let second = canonical_json(&roundtrip).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn hash_changes_on_single_byte_mutation() {
        let a = json!({"amount": "100.00", "currency": "JPY"});
        let b = json!({"amount": "100.01", "currency": "JPY"});
        assert_ne!(
            canonical_hash_hex(&a).unwrap(),
            canonical_hash_hex(&b).unwrap()
        );
    }
}
