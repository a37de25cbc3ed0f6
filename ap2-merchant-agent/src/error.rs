//! Error handling for the Merchant Agent service.

use thiserror::Error;
use warp::http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds the Merchant Agent's domain logic, its outbound HTTP calls and
/// its storage layer can produce. `status_code`/`error_kind` drive the
/// `{error_kind, message}` JSON body the HTTP layer renders for every
/// non-2xx response.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no catalogue items match the intent's constraints")]
    NoCandidates,

    #[error("merchant rejected sign/cart: {0}")]
    MerchantRequestFailed(String),

    #[error("payment processor rejected the relayed payment mandate: {0}")]
    ProcessorRequestFailed(String),

    #[error(transparent)]
    Model(#[from] ap2_model::Error),

    #[error(transparent)]
    Crypto(#[from] ap2_crypto::Error),

    #[error(transparent)]
    Envelope(#[from] ap2_envelope::Error),

    #[error("outbound request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoCandidates => StatusCode::UNPROCESSABLE_ENTITY,
            Error::MerchantRequestFailed(_) | Error::ProcessorRequestFailed(_) => StatusCode::BAD_GATEWAY,
            Error::Model(_) | Error::Crypto(_) | Error::Envelope(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) | Error::Pool(_) | Error::Migration(_) | Error::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Error::NoCandidates => "NoCandidates",
            Error::MerchantRequestFailed(_) => "MerchantRequestFailed",
            Error::ProcessorRequestFailed(_) => "ProcessorRequestFailed",
            Error::Model(_) => "SchemaInvalid",
            Error::Crypto(_) => "CryptoError",
            Error::Envelope(_) => "EnvelopeError",
            Error::Http(_) => "UpstreamUnavailable",
            Error::Json(_) => "EncodingError",
            Error::Database(_) | Error::Pool(_) | Error::Migration(_) | Error::Join(_) => "InternalError",
        }
    }
}

impl warp::reject::Reject for Error {}
