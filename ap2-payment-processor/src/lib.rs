//! The Payment Processor service (§4.9): validates the full mandate chain,
//! verifies the user's WebAuthn authorization, checks the credential with the
//! Credential Provider, and authorizes/captures the transaction.

pub mod config;
pub mod domain;
pub mod error;
pub mod handler;
pub mod passkey;
pub mod server;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
