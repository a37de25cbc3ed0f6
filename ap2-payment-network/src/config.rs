//! Configuration for the Payment Network service.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub did: String,
    pub network_name: String,
    pub db_path: String,
    pub passphrase_env_var: String,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8103,
            did: "did:ap2:network:core".to_string(),
            network_name: "core-network".to_string(),
            db_path: "./ap2-payment-network.db".to_string(),
            passphrase_env_var: "AP2_PAYMENT_NETWORK_PASSPHRASE".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = env::var("AP2_PAYMENT_NETWORK_HOST") {
            config.host = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_NETWORK_PORT") {
            if let Ok(port) = v.parse() {
                config.port = port;
            }
        }
        if let Ok(v) = env::var("AP2_PAYMENT_NETWORK_DID") {
            config.did = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_NETWORK_NAME") {
            config.network_name = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_NETWORK_DB_PATH") {
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
