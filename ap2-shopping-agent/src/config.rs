//! Configuration for the Shopping Agent CLI.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub did: String,
    pub user_id: String,
    pub merchant_agent_did: String,
    pub merchant_agent_url: String,
    pub merchant_did: String,
    pub merchant_url: String,
    pub payment_processor_did: String,
    pub credential_provider_url: String,
    pub webauthn_origin: String,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8110,
            did: "did:ap2:shopping-agent:alice-device".to_string(),
            user_id: "did:ap2:user:alice".to_string(),
            merchant_agent_did: "did:ap2:merchant-agent:acme".to_string(),
            merchant_agent_url: "http://127.0.0.1:8105".to_string(),
            merchant_did: "did:ap2:merchant:acme".to_string(),
            merchant_url: "http://127.0.0.1:8101".to_string(),
            payment_processor_did: "did:ap2:processor:core".to_string(),
            credential_provider_url: "http://127.0.0.1:8102".to_string(),
            webauthn_origin: "https://shop.example".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = env::var("AP2_SHOPPING_AGENT_HOST") {
            config.host = v;
        }
        if let Ok(v) = env::var("AP2_SHOPPING_AGENT_PORT") {
            if let Ok(port) = v.parse() {
                config.port = port;
            }
        }
        if let Ok(v) = env::var("AP2_SHOPPING_AGENT_DID") {
            config.did = v;
        }
        if let Ok(v) = env::var("AP2_SHOPPING_AGENT_USER_ID") {
            config.user_id = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_AGENT_DID") {
            config.merchant_agent_did = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_AGENT_URL") {
            config.merchant_agent_url = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_DID") {
            config.merchant_did = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_URL") {
            config.merchant_url = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_DID") {
            config.payment_processor_did = v;
        }
        if let Ok(v) = env::var("AP2_CREDENTIAL_PROVIDER_URL") {
            config.credential_provider_url = v;
        }
        if let Ok(v) = env::var("AP2_SHOPPING_AGENT_WEBAUTHN_ORIGIN") {
            config.webauthn_origin = v;
        }
        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
