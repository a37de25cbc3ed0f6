//! Configuration for the Payment Processor service.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub did: String,
    pub credential_provider_url: String,
    pub merchant_agent_did: String,
    pub merchant_agent_url: String,
    pub db_path: String,
    pub passphrase_env_var: String,
    pub request_timeout_secs: u64,
    pub rp_id: String,
    pub allowed_origins: Vec<String>,
    pub public_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8104,
            did: "did:ap2:processor:core".to_string(),
            credential_provider_url: "http://127.0.0.1:8102".to_string(),
            merchant_agent_did: "did:ap2:merchant-agent:acme".to_string(),
            merchant_agent_url: "http://127.0.0.1:8105".to_string(),
            db_path: "./ap2-payment-processor.db".to_string(),
            passphrase_env_var: "AP2_PAYMENT_PROCESSOR_PASSPHRASE".to_string(),
            request_timeout_secs: 30,
            rp_id: "ap2.example".to_string(),
            allowed_origins: vec!["https://ap2.example".to_string()],
            public_base_url: "http://127.0.0.1:8104".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_HOST") {
            config.host = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_PORT") {
            if let Ok(port) = v.parse() {
                config.port = port;
            }
        }
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_DID") {
            config.did = v;
        }
        if let Ok(v) = env::var("AP2_CREDENTIAL_PROVIDER_URL") {
            config.credential_provider_url = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_AGENT_DID") {
            config.merchant_agent_did = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_AGENT_URL") {
            config.merchant_agent_url = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_DB_PATH") {
            config.db_path = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_RP_ID") {
            config.rp_id = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_ALLOWED_ORIGINS") {
            config.allowed_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_PUBLIC_BASE_URL") {
            config.public_base_url = v;
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
