//! Error handling for the Shopping Agent's purchase orchestration.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds the orchestration pipeline can produce. Unlike the server
/// crates there is no HTTP layer translating these into a response body —
/// the CLI prints `error_kind` and the message and exits non-zero.
#[derive(Error, Debug)]
pub enum Error {
    #[error("merchant agent returned no cart candidates")]
    NoCandidates,

    #[error("merchant agent rejected the envelope: {0}")]
    MerchantAgentRejected(String),

    #[error("merchant_authorization failed re-verification: {0}")]
    CartTampered(String),

    #[error("credential provider request failed: {0}")]
    CredentialProviderFailed(String),

    #[error("step-up required but did not complete: {0}")]
    StepUpIncomplete(String),

    #[error(transparent)]
    Model(#[from] ap2_model::Error),

    #[error(transparent)]
    Crypto(#[from] ap2_crypto::Error),

    #[error(transparent)]
    Envelope(#[from] ap2_envelope::Error),

    #[error("outbound request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Error::NoCandidates => "NoCandidates",
            Error::MerchantAgentRejected(_) => "MerchantAgentRejected",
            Error::CartTampered(_) => "CartTampered",
            Error::CredentialProviderFailed(_) => "CredentialProviderFailed",
            Error::StepUpIncomplete(_) => "StepUpIncomplete",
            Error::Model(_) => "SchemaInvalid",
            Error::Crypto(_) => "CryptoError",
            Error::Envelope(_) => "EnvelopeError",
            Error::Http(_) => "UpstreamUnavailable",
            Error::Json(_) => "EncodingError",
        }
    }
}
