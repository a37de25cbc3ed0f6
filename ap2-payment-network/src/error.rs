//! Error handling for the Payment Network service.

use thiserror::Error;
use warp::http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed payment method token")]
    MalformedToken,

    #[error("agent token not found or expired")]
    TokenNotFound,

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
            Error::MalformedToken => StatusCode::BAD_REQUEST,
            Error::TokenNotFound => StatusCode::NOT_FOUND,
            Error::Database(_) | Error::Pool(_) | Error::Migration(_) | Error::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Envelope(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Error::MalformedToken => "MalformedToken",
            Error::TokenNotFound => "TokenNotFound",
            Error::Database(_) | Error::Pool(_) | Error::Migration(_) | Error::Join(_) => "InternalError",
            Error::Json(_) => "EncodingError",
            Error::Envelope(_) => "A2ARejected",
        }
    }
}

impl warp::reject::Reject for Error {}
