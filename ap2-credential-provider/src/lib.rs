//! Credential Provider: passkey registry, payment-method catalogue and
//! WebAuthn verification service.

pub mod config;
pub mod domain;
pub mod error;
pub mod handler;
pub mod server;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
