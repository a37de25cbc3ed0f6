//! Configuration for the Merchant Agent service.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub did: String,
    pub merchant_did: String,
    pub merchant_url: String,
    pub merchant_name: String,
    pub payment_processor_did: String,
    pub payment_processor_url: String,
    pub shopping_agent_did: String,
    pub shopping_agent_url: String,
    pub db_path: String,
    pub passphrase_env_var: String,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8105,
            did: "did:ap2:merchant-agent:acme".to_string(),
            merchant_did: "did:ap2:merchant:acme".to_string(),
            merchant_url: "http://127.0.0.1:8101".to_string(),
            merchant_name: "Acme Shoes".to_string(),
            payment_processor_did: "did:ap2:processor:core".to_string(),
            payment_processor_url: "http://127.0.0.1:8104".to_string(),
            shopping_agent_did: "did:ap2:shopping-agent:alice-device".to_string(),
            shopping_agent_url: "http://127.0.0.1:8110".to_string(),
            db_path: "./ap2-merchant-agent.db".to_string(),
            passphrase_env_var: "AP2_MERCHANT_AGENT_PASSPHRASE".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = env::var("AP2_MERCHANT_AGENT_HOST") {
            config.host = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_AGENT_PORT") {
            if let Ok(port) = v.parse() {
                config.port = port;
            }
        }
        if let Ok(v) = env::var("AP2_MERCHANT_AGENT_DID") {
            config.did = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_DID") {
            config.merchant_did = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_URL") {
            config.merchant_url = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_NAME") {
            config.merchant_name = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_DID") {
            config.payment_processor_did = v;
        }
        if let Ok(v) = env::var("AP2_PAYMENT_PROCESSOR_URL") {
            config.payment_processor_url = v;
        }
        if let Ok(v) = env::var("AP2_SHOPPING_AGENT_DID") {
            config.shopping_agent_did = v;
        }
        if let Ok(v) = env::var("AP2_SHOPPING_AGENT_URL") {
            config.shopping_agent_url = v;
        }
        if let Ok(v) = env::var("AP2_MERCHANT_AGENT_DB_PATH") {
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
