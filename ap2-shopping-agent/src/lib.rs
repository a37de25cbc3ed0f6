//! The Shopping Agent (§4.10): drives a single purchase on the user's
//! behalf through intent, cart selection, step-up and payment-mandate
//! authorization. Unlike the other five services this is not an A2A
//! server — it only ever initiates outbound calls.

pub mod authenticator;
pub mod config;
pub mod domain;
pub mod error;
pub mod risk;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
