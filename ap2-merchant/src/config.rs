//! Configuration for the Merchant service.

use std::env;
use std::time::Duration;

/// Runtime configuration for `ap2-merchant`, in the shape of the reference
/// `TapHttpConfig`: a plain struct with a `Default` plus env-driven
/// overrides, not a layered config-file system this core doesn't need.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub did: String,
    pub payment_processor_did: String,
    pub db_path: String,
    pub passphrase_env_var: String,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8101,
            did: "did:ap2:merchant:acme".to_string(),
            payment_processor_did: "did:ap2:processor:core".to_string(),
            db_path: "./ap2-merchant.db".to_string(),
            passphrase_env_var: "AP2_MERCHANT_PASSPHRASE".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Overlay environment variables onto the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = env::var("AP2_MERCHANT_HOST") {
            config.host = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_PORT") {
            if let Ok(port) = v.parse() {
                config.port = port;
            }
        }
        if let Ok(v) = env::var("AP2_MERCHANT_DID") {
            config.did = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_DID") {
            config.payment_processor_did = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_DB_PATH") {
            config.db_path = v;
        }
        config
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
