//! Error handling for the Merchant service.

use thiserror::Error;
use warp::http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds the Merchant's domain logic and storage layer can produce.
/// `status_code`/`error_kind` drive the `{error_kind, message}` JSON body
/// the HTTP layer renders for every non-2xx response.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid cart: {0}")]
    InvalidCart(String),

    #[error("insufficient inventory for sku {0}")]
    InsufficientInventory(String),

    #[error(transparent)]
    Model(#[from] ap2_model::Error),

    #[error(transparent)]
    Crypto(#[from] ap2_crypto::Error),

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
            Error::InvalidCart(_) => StatusCode::BAD_REQUEST,
            Error::InsufficientInventory(_) => StatusCode::CONFLICT,
            Error::Model(_) | Error::Crypto(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Database(_) | Error::Pool(_) | Error::Migration(_) | Error::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Error::InvalidCart(_) => "InvalidCart",
            Error::InsufficientInventory(_) => "InsufficientInventory",
            Error::Model(_) => "SchemaInvalid",
            Error::Crypto(_) => "CryptoError",
            Error::Json(_) => "EncodingError",
            Error::Database(_) | Error::Pool(_) | Error::Migration(_) | Error::Join(_) => "InternalError",
        }
    }
}

impl warp::reject::Reject for Error {}
