//! Signing-key abstraction for the AP2 crypto substrate.
//!
//! Mirrors the trait split used throughout the reference federation's agent
//! key handling: a small `Algorithm` enum selects the curve, and a single
//! `KeyPair` enum carries either backend so callers never need to branch on
//! curve type themselves.

use crate::canonical::{canonical_json, sha256_bytes};
use crate::error::{Error, Result};
use chrono::Utc;
use ed25519_dalek::{Signer as _, SigningKey as Ed25519SigningKey, Verifier as _, VerifyingKey as Ed25519VerifyingKey};
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use serde::{Deserialize, Serialize};

/// Signature algorithms supported by the crypto substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// ECDSA over NIST P-256, JOSE alg `ES256`.
    EcdsaP256,
    /// Ed25519 per RFC 8032.
    Ed25519,
}

impl Algorithm {
    /// The JOSE/JWS algorithm identifier for this algorithm.
    pub fn jose_alg(&self) -> &'static str {
        match self {
            Algorithm::EcdsaP256 => "ES256",
            Algorithm::Ed25519 => "EdDSA",
        }
    }

    /// Parse a JOSE algorithm identifier, case-insensitively, accepting the
    /// bare curve names the A2A envelope's `proof.algorithm` field also uses.
    pub fn from_jose_alg(alg: &str) -> Result<Self> {
        match alg.to_ascii_uppercase().as_str() {
            "ES256" | "ECDSA" => Ok(Algorithm::EcdsaP256),
            "EDDSA" | "ED25519" => Ok(Algorithm::Ed25519),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// A keypair able to sign on behalf of a DID.
#[derive(Debug)]
pub enum KeyPair {
    /// NIST P-256 ECDSA keypair.
    EcdsaP256 {
        signing: Box<P256SigningKey>,
        verifying: P256VerifyingKey,
    },
    /// Ed25519 keypair.
    Ed25519 {
        signing: Box<Ed25519SigningKey>,
        verifying: Ed25519VerifyingKey,
    },
}

/// A detached cryptographic proof, as attached to A2A envelope headers and
/// mandate signature blocks (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    /// Signature algorithm used.
    pub algorithm: String,
    /// The signature value, hex-encoded.
    #[serde(rename = "signatureValue")]
    pub signature_value: String,
    /// The signer's public key, hex-encoded (SEC1 for P-256, raw for Ed25519).
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Fully-qualified key identifier, `did:...#key-N`.
    pub kid: String,
    /// RFC 3339 timestamp at signing time.
    pub created: String,
    /// Always `"authentication"` in this core.
    #[serde(rename = "proofPurpose")]
    pub proof_purpose: String,
}

impl KeyPair {
    /// Generate a fresh keypair for the requested algorithm.
    pub fn generate(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::EcdsaP256 => {
                let signing = P256SigningKey::random(&mut rand::rngs::OsRng);
                let verifying = *signing.verifying_key();
                KeyPair::EcdsaP256 {
                    signing: Box::new(signing),
                    verifying,
                }
            }
            Algorithm::Ed25519 => {
                let signing = Ed25519SigningKey::generate(&mut rand::rngs::OsRng);
                let verifying = signing.verifying_key();
                KeyPair::Ed25519 {
                    signing: Box::new(signing),
                    verifying,
                }
            }
        }
    }

    /// Reconstruct a P-256 keypair from a raw 32-byte scalar.
    pub fn from_p256_bytes(bytes: &[u8]) -> Result<Self> {
        let signing = P256SigningKey::from_slice(bytes)
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        let verifying = *signing.verifying_key();
        Ok(KeyPair::EcdsaP256 {
            signing: Box::new(signing),
            verifying,
        })
    }

    /// Reconstruct an Ed25519 keypair from a raw 32-byte seed.
    pub fn from_ed25519_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey("ed25519 seed must be 32 bytes".into()))?;
        let signing = Ed25519SigningKey::from_bytes(&arr);
        let verifying = signing.verifying_key();
        Ok(KeyPair::Ed25519 {
            signing: Box::new(signing),
            verifying,
        })
    }

    /// The algorithm this keypair uses.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            KeyPair::EcdsaP256 { .. } => Algorithm::EcdsaP256,
            KeyPair::Ed25519 { .. } => Algorithm::Ed25519,
        }
    }

    /// Raw private key bytes, suitable for `secure_storage_seal`.
    pub fn private_key_bytes(&self) -> Vec<u8> {
        match self {
            KeyPair::EcdsaP256 { signing, .. } => signing.to_bytes().to_vec(),
            KeyPair::Ed25519 { signing, .. } => signing.to_bytes().to_vec(),
        }
    }

    /// Public key bytes: SEC1 uncompressed point for P-256, raw 32 bytes for Ed25519.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        match self {
            KeyPair::EcdsaP256 { verifying, .. } => {
                verifying.to_encoded_point(false).as_bytes().to_vec()
            }
            KeyPair::Ed25519 { verifying, .. } => verifying.to_bytes().to_vec(),
        }
    }

    /// Sign `data` (per §4.1: ECDSA pre-hashes the canonical-JSON bytes with
    /// SHA-256 before signing; Ed25519 signs the raw bytes directly) and
    /// produce a detached `Proof` with the given `kid`.
    pub fn sign_detached(&self, data: &[u8], kid: &str) -> Result<Proof> {
        let signature_bytes = match self {
            KeyPair::EcdsaP256 { signing, .. } => {
                let digest = sha256_bytes(data);
                let sig: P256Signature = signing.sign(&digest);
                sig.to_der().as_bytes().to_vec()
            }
            KeyPair::Ed25519 { signing, .. } => signing.sign(data).to_bytes().to_vec(),
        };
        Ok(Proof {
            algorithm: self.algorithm().jose_alg().to_string(),
            signature_value: hex::encode(signature_bytes),
            public_key: hex::encode(self.public_key_bytes()),
            kid: kid.to_string(),
            created: Utc::now().to_rfc3339(),
            proof_purpose: "authentication".to_string(),
        })
    }

    /// Sign any serialisable value's canonical-JSON encoding, per §4.1 `sign`.
    pub fn sign_value<T: Serialize>(&self, value: &T, kid: &str) -> Result<Proof> {
        let bytes = canonical_json(value)?;
        self.sign_detached(&bytes, kid)
    }
}

/// Verify a detached proof produced by [`KeyPair::sign_detached`] / `sign_value`
/// against the raw bytes that were signed and a known public key.
pub fn verify_detached(data: &[u8], proof: &Proof, public_key_hex: &str) -> Result<()> {
    let algorithm = Algorithm::from_jose_alg(&proof.algorithm)?;
    let public_key = hex::decode(public_key_hex).map_err(|e| Error::InvalidKey(e.to_string()))?;
    let signature = hex::decode(&proof.signature_value)
        .map_err(|e| Error::MalformedToken(e.to_string()))?;

    match algorithm {
        Algorithm::EcdsaP256 => {
            let verifying = P256VerifyingKey::from_sec1_bytes(&public_key)
                .map_err(|e| Error::InvalidKey(e.to_string()))?;
            let sig = P256Signature::from_der(&signature)
                .map_err(|e| Error::MalformedToken(e.to_string()))?;
            let digest = sha256_bytes(data);
            verifying
                .verify(&digest, &sig)
                .map_err(|_| Error::SignatureInvalid)
        }
        Algorithm::Ed25519 => {
            let arr: [u8; 32] = public_key
                .try_into()
                .map_err(|_| Error::InvalidKey("ed25519 public key must be 32 bytes".into()))?;
            let verifying =
                Ed25519VerifyingKey::from_bytes(&arr).map_err(|e| Error::InvalidKey(e.to_string()))?;
            let sig_arr: [u8; 64] = signature
                .try_into()
                .map_err(|_| Error::MalformedToken("ed25519 signature must be 64 bytes".into()))?;
            let sig = ed25519_dalek::Signature::from_bytes(&sig_arr);
            verifying
                .verify(data, &sig)
                .map_err(|_| Error::SignatureInvalid)
        }
    }
}

/// Verify a proof over a serialisable value's canonical-JSON encoding.
pub fn verify_value<T: Serialize>(value: &T, proof: &Proof, public_key_hex: &str) -> Result<()> {
    let bytes = canonical_json(value)?;
    verify_detached(&bytes, proof, public_key_hex)
}
