//! Error handling for the Credential Provider service.

use thiserror::Error;
use warp::http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown payment method")]
    UnknownPaymentMethod,

    #[error("user does not own this payment method")]
    UserMismatch,

    #[error("unknown or expired step-up session")]
    UnknownSession,

    #[error("step-up session has not completed")]
    StepUpNotCompleted,

    #[error("unknown or expired credential token")]
    UnknownToken,

    #[error("invalid server configuration: {0}")]
    Config(String),

    #[error(transparent)]
    WebAuthn(#[from] ap2_crypto::Error),

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

    #[error("payment network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Envelope(#[from] ap2_envelope::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::UnknownPaymentMethod | Error::UnknownSession | Error::UnknownToken => StatusCode::NOT_FOUND,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UserMismatch => StatusCode::FORBIDDEN,
            Error::StepUpNotCompleted => StatusCode::CONFLICT,
            Error::WebAuthn(_) => StatusCode::UNAUTHORIZED,
            Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Database(_) | Error::Pool(_) | Error::Migration(_) | Error::Join(_) | Error::Network(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Envelope(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Error::UnknownPaymentMethod => "UnknownPaymentMethod",
            Error::UserMismatch => "UserMismatch",
            Error::UnknownSession => "UnknownSession",
            Error::StepUpNotCompleted => "StepUpNotCompleted",
            Error::UnknownToken => "UnknownToken",
            Error::Config(_) => "InternalError",
            Error::WebAuthn(_) => "UserAuthInvalid",
            Error::Json(_) => "EncodingError",
            Error::Database(_) | Error::Pool(_) | Error::Migration(_) | Error::Join(_) | Error::Network(_) => {
                "InternalError"
            }
            Error::Envelope(_) => "A2ARejected",
        }
    }
}

impl warp::reject::Reject for Error {}
