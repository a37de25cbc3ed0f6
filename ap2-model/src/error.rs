//! Error types for the AP2 mandate data model.

use thiserror::Error;

/// Result alias used throughout `ap2-model`.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation and binding errors produced while building or checking
/// mandates and their authorization artefacts (§7: Validation, Cryptographic).
#[derive(Error, Debug)]
pub enum Error {
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("mandate expired: {0}")]
    MandateExpired(String),

    #[error("reference mismatch: {0}")]
    ReferenceMismatch(String),

    #[error("amount exceeds intent maximum")]
    AmountExceedsIntent,

    #[error("merchant not in intent allow-list: {0}")]
    MerchantNotAllowed(String),

    #[error("cart tampered: computed hash does not match signed cart_hash")]
    CartTampered,

    #[error("user authorization invalid: {0}")]
    UserAuthInvalid(String),

    #[error(transparent)]
    Crypto(#[from] ap2_crypto::Error),
}
