//! Error types for the AP2 crypto substrate.

use thiserror::Error;

/// Result alias used throughout `ap2-crypto`.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced by the crypto substrate (§7 of the design: Cryptographic errors).
#[derive(Error, Debug)]
pub enum Error {
    /// A signature did not verify against the supplied data and key.
    #[error("signature invalid")]
    SignatureInvalid,

    /// A WebAuthn assertion failed verification, with the specific reason.
    #[error("webauthn assertion invalid: {0}")]
    WebAuthnInvalid(String),

    /// A sealed blob failed to authenticate (wrong passphrase or corrupted bytes).
    #[error("storage corrupt")]
    StorageCorrupt,

    /// The requested algorithm is not supported by this operation.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A JWS/JWE was structurally malformed.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// CBOR/COSE decoding failed.
    #[error("cbor decode error: {0}")]
    Cbor(String),

    /// Canonicalisation or JSON (de)serialisation failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Key material was malformed or of the wrong curve/length.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}
