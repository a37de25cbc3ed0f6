//! The Payment Network service (§4.8): stateless-facing issuer of
//! short-lived `agent_token`s backed by a durable record for verification.

pub mod config;
pub mod domain;
pub mod error;
pub mod handler;
pub mod server;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
