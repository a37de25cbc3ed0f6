//! Cryptographic substrate for the AP2 payment-protocol core.
//!
//! This crate is the foundation every other AP2 crate builds on: key
//! generation and signing (ECDSA-P256 and Ed25519), RFC 8785 JSON
//! canonicalisation and hashing, AES-GCM-sealed at-rest key storage, compact
//! JWS sign/verify, and WebAuthn/FIDO2 assertion verification (including COSE
//! key decoding). Nothing in here knows about mandates, DIDs, or the A2A
//! envelope — those live in `ap2-model` and `ap2-envelope`.

pub mod canonical;
pub mod cose;
pub mod error;
pub mod jws;
pub mod keys;
pub mod seal;
pub mod webauthn;

pub use error::{Error, Result};
