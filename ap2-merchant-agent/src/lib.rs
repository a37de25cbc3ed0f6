//! The Merchant Agent service (§4.6): an A2A hub with no signing authority
//! over the mandates it relays. Solicits cart candidates from the Merchant
//! on an `IntentMandate`, and forwards a `PaymentMandate` to the Payment
//! Processor, re-signed as itself.

pub mod config;
pub mod domain;
pub mod error;
pub mod handler;
pub mod server;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
