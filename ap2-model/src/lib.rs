//! Mandate-chain data model for AP2: the three mandate structs, W3C Payment
//! Request sub-types, DID document shapes, and the authorization-artefact
//! builders/verifiers (`merchant_authorization`, `user_authorization`).
//!
//! This crate is deliberately network-free: resolving a DID, calling a
//! credential provider, or checking a nonce ledger are all the concern of
//! `ap2-envelope` and the individual service crates. What lives here is pure
//! data plus the structural/cryptographic checks that only need the
//! mandates themselves (see [`validation`]).

pub mod auth;
pub mod did;
pub mod error;
pub mod mandate;
pub mod payment_request;
pub mod validation;

pub use error::{Error, Result};
