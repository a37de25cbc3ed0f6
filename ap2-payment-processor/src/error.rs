//! Error handling for the Payment Processor service.

use thiserror::Error;
use warp::http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds the chain-validation algorithm, Credential Provider call and
/// storage layer can produce. `status_code`/`error_kind` drive the
/// `{error_kind, message}` JSON body the HTTP layer renders.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ap2_model::Error),

    #[error(transparent)]
    Crypto(#[from] ap2_crypto::Error),

    #[error("merchant_authorization jti already seen")]
    ReplayedAuthorization,

    #[error("credential provider rejected the credential token")]
    CredentialInvalid,

    #[error("credential provider request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

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

    #[error(transparent)]
    Envelope(#[from] ap2_envelope::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(inner) => match inner {
                ap2_model::Error::AmountExceedsIntent => StatusCode::PAYMENT_REQUIRED,
                ap2_model::Error::MerchantNotAllowed(_) => StatusCode::FORBIDDEN,
                ap2_model::Error::CartTampered => StatusCode::CONFLICT,
                ap2_model::Error::UserAuthInvalid(_) => StatusCode::UNAUTHORIZED,
                ap2_model::Error::MandateExpired(_) => StatusCode::GONE,
                _ => StatusCode::BAD_REQUEST,
            },
            Error::Crypto(_) => StatusCode::UNAUTHORIZED,
            Error::ReplayedAuthorization => StatusCode::CONFLICT,
            Error::CredentialInvalid => StatusCode::FORBIDDEN,
            Error::UnknownTransaction(_) => StatusCode::NOT_FOUND,
            Error::Network(_) | Error::Database(_) | Error::Pool(_) | Error::Migration(_) | Error::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Envelope(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Error::Validation(inner) => match inner {
                ap2_model::Error::SchemaInvalid(_) => "SchemaInvalid",
                ap2_model::Error::MandateExpired(_) => "MandateExpired",
                ap2_model::Error::ReferenceMismatch(_) => "ReferenceMismatch",
                ap2_model::Error::AmountExceedsIntent => "AmountExceedsIntent",
                ap2_model::Error::MerchantNotAllowed(_) => "MerchantNotAllowed",
                ap2_model::Error::CartTampered => "CartTampered",
                ap2_model::Error::UserAuthInvalid(_) => "UserAuthInvalid",
                ap2_model::Error::Crypto(_) => "CryptoError",
            },
            Error::Crypto(_) => "CryptoError",
            Error::ReplayedAuthorization => "ReplayedAuthorization",
            Error::CredentialInvalid => "CredentialInvalid",
            Error::UnknownTransaction(_) => "UnknownTransaction",
            Error::Network(_) => "InternalError",
            Error::Database(_) | Error::Pool(_) | Error::Migration(_) | Error::Join(_) => "InternalError",
            Error::Json(_) => "EncodingError",
            Error::Envelope(_) => "A2ARejected",
        }
    }
}

impl warp::reject::Reject for Error {}
