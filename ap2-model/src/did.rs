//! DID document shapes (§3 "DID document", §6 "DID document location").
//!
//! DIDs in this core take the form `did:ap2:<kind>:<name>` (e.g.
//! `did:ap2:merchant:acme-shoes`); fragments (`#key-1`, `#key-2`) denote
//! individual verification methods, and a fully-qualified `kid` in a proof or
//! JWS is always `<did>#key-N`.

use serde::{Deserialize, Serialize};

/// A single verification method (public key) within a DID document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationMethod {
    /// Fully-qualified id, e.g. `did:ap2:merchant:acme-shoes#key-1`.
    pub id: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub controller: String,
    #[serde(flatten)]
    pub material: KeyMaterial,
}

/// The public key material backing a verification method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyMaterial {
    Jwk {
        #[serde(rename = "publicKeyJwk")]
        public_key_jwk: serde_json::Value,
    },
    Hex {
        /// Not part of the DID-core vocabulary, but the simplest
        /// representation for this demo core's ECDSA-P256/Ed25519 keys:
        /// the raw public key, hex-encoded.
        #[serde(rename = "publicKeyHex")]
        public_key_hex: String,
        /// `"EcdsaP256"` or `"Ed25519"`, matching `ap2_crypto::keys::Algorithm::jose_alg`.
        algorithm: String,
    },
}

/// A resolved DID document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    pub id: String,
    #[serde(rename = "verificationMethod")]
    pub verification_method: Vec<VerificationMethod>,
    pub authentication: Vec<String>,
}

impl DidDocument {
    /// Build a single-key DID document for the given DID and keypair, as
    /// every service publishes at startup under `/.well-known/did.json`.
    pub fn single_key(did: &str, keypair: &ap2_crypto::keys::KeyPair) -> Self {
        let kid = format!("{did}#key-1");
        Self {
            id: did.to_string(),
            verification_method: vec![VerificationMethod {
                id: kid.clone(),
                ty: match keypair.algorithm() {
                    ap2_crypto::keys::Algorithm::EcdsaP256 => "EcdsaSecp256r1VerificationKey2019".to_string(),
                    ap2_crypto::keys::Algorithm::Ed25519 => "Ed25519VerificationKey2020".to_string(),
                },
                controller: did.to_string(),
                material: KeyMaterial::Hex {
                    public_key_hex: hex::encode(keypair.public_key_bytes()),
                    algorithm: keypair.algorithm().jose_alg().to_string(),
                },
            }],
            authentication: vec![kid],
        }
    }

    /// Look up the public key (hex-encoded) for a fully-qualified `kid`.
    pub fn public_key_hex_for_kid(&self, kid: &str) -> Option<String> {
        self.verification_method.iter().find(|vm| vm.id == kid).and_then(|vm| match &vm.material {
            KeyMaterial::Hex { public_key_hex, .. } => Some(public_key_hex.clone()),
            KeyMaterial::Jwk { .. } => None,
        })
    }

    /// The bare DID this document resolves (without any `#fragment`).
    pub fn did(&self) -> &str {
        &self.id
    }
}

/// Split a `kid` of the form `did:...#key-N` into `(did, fragment)`.
pub fn split_kid(kid: &str) -> Option<(&str, &str)> {
    kid.split_once('#')
}
