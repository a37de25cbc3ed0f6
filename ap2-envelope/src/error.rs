//! Error types for the A2A envelope handler.

use thiserror::Error;

/// Result alias used throughout `ap2-envelope`.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures the ordered validation pipeline in §4.2 can terminate with. Each
/// variant maps to the 400/401 the HTTP layer of a service crate returns.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported proof algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("malformed kid: {0}")]
    MalformedKid(String),

    #[error("proof kid DID does not match header.sender")]
    SenderMismatch,

    #[error("timestamp outside acceptance window: {0}")]
    TimestampOutOfWindow(String),

    #[error("replay detected: nonce already recorded")]
    ReplayDetected,

    #[error("DID resolution failed for {0}: {1}")]
    DidResolution(String, String),

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("unsupported data part type: {0}")]
    UnsupportedDataType(String),

    #[error("no handler registered for data part type: {0}")]
    NoHandler(String),

    #[error("handler failed: {0}")]
    HandlerFailed(String),

    #[error(transparent)]
    Crypto(#[from] ap2_crypto::Error),

    #[error(transparent)]
    Model(#[from] ap2_model::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
