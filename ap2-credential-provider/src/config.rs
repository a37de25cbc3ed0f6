//! Configuration for the Credential Provider service.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub did: String,
    pub rp_id: String,
    pub allowed_origins: Vec<String>,
    pub payment_network_url: String,
    pub db_path: String,
    pub passphrase_env_var: String,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8102,
            did: "did:ap2:credential-provider:core".to_string(),
            rp_id: "shop.example".to_string(),
            allowed_origins: vec!["https://shop.example".to_string()],
            payment_network_url: "http://127.0.0.1:8103".to_string(),
            db_path: "./ap2-credential-provider.db".to_string(),
            passphrase_env_var: "AP2_CREDENTIAL_PROVIDER_PASSPHRASE".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = env::var("AP2_CREDENTIAL_PROVIDER_HOST") {
            config.host = v;
        }
        if let Ok(v) = env::var("AP2_CREDENTIAL_PROVIDER_PORT") {
            if let Ok(port) = v.parse() {
                config.port = port;
            }
        }
        if let Ok(v) = env::var("AP2_CREDENTIAL_PROVIDER_DID") {
            config.did = v;
        }
        if let Ok(v) = env::var("AP2_CREDENTIAL_PROVIDER_RP_ID") {
            config.rp_id = v;
        }
        if let Ok(v) = env::var("AP2_CREDENTIAL_PROVIDER_ORIGINS") {
            config.allowed_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("AP2_PAYMENT_NETWORK_URL") {
            config.payment_network_url = v;
        }
        if let Ok(v) = env::var("AP2_CREDENTIAL_PROVIDER_DB_PATH") {
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
