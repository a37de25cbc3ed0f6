//! Binary executable for the Payment Processor HTTP server.

use ap2_crypto::keys::{Algorithm, KeyPair};
use ap2_crypto::seal::{secure_storage_open, secure_storage_seal};
use ap2_envelope::did::{CachingHttpResolver, DidResolver};
use ap2_envelope::dispatch::Router;
use ap2_envelope::envelope::DataPartType;
use ap2_model::did::DidDocument;
use ap2_payment_processor::handler::{PaymentMandateHandler, State};
use ap2_payment_processor::passkey::{CredentialProviderPasskeyVerifier, PasskeyVerifier};
use ap2_payment_processor::server::PaymentProcessorServer;
use ap2_payment_processor::storage::Storage;
use ap2_payment_processor::Config;
use ap2_store::NonceLedger;
use env_logger::Env;
use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::info;

struct Args {
    host: Option<String>,
    port: Option<u16>,
    verbose: bool,
}

impl Args {
    fn parse() -> Result<Self, Box<dyn Error>> {
        let mut args = pico_args::Arguments::from_env();
        if args.contains(["-h", "--help"]) {
            print_help();
            process::exit(0);
        }
        let result = Self {
            host: args.opt_value_from_str(["-h", "--host"])?,
            port: args.opt_value_from_str(["-p", "--port"])?,
            verbose: args.contains(["-v", "--verbose"]),
        };
        let remaining = args.finish();
        if !remaining.is_empty() {
            return Err(format!("unknown arguments: {remaining:?}").into());
        }
        Ok(result)
    }
}

fn print_help() {
    println!("ap2-payment-processor");
    println!();
    println!("USAGE:");
    println!("    ap2-payment-processor [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --host <HOST>    Host to bind to [default: 127.0.0.1]");
    println!("    -p, --port <PORT>    Port to listen on [default: 8104]");
    println!("    -v, --verbose        Enable verbose logging");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    AP2_PAYMENT_PROCESSOR_HOST, AP2_PAYMENT_PROCESSOR_PORT,");
    println!("    AP2_PAYMENT_PROCESSOR_DID, AP2_CREDENTIAL_PROVIDER_URL,");
    println!("    AP2_MERCHANT_AGENT_DID, AP2_MERCHANT_AGENT_URL,");
    println!("    AP2_PAYMENT_PROCESSOR_DB_PATH, AP2_PAYMENT_PROCESSOR_KEY_PATH,");
    println!("    AP2_PAYMENT_PROCESSOR_PASSPHRASE, AP2_PAYMENT_PROCESSOR_RP_ID,");
    println!("    AP2_PAYMENT_PROCESSOR_ALLOWED_ORIGINS, AP2_PAYMENT_PROCESSOR_PUBLIC_BASE_URL");
}

/// Load the processor's signing key from its sealed key file, generating and
/// sealing a fresh one on first run.
fn load_or_generate_key(key_path: &PathBuf, passphrase: &str) -> Result<KeyPair, Box<dyn Error>> {
    if key_path.exists() {
        let sealed = std::fs::read(key_path)?;
        let plaintext = secure_storage_open(&sealed, passphrase)?;
        Ok(KeyPair::from_p256_bytes(&plaintext)?)
    } else {
        let key = KeyPair::generate(Algorithm::EcdsaP256);
        let sealed = secure_storage_seal(&key.private_key_bytes(), passphrase)?;
        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(key_path, sealed)?;
        Ok(key)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse().unwrap_or_else(|e| {
        eprintln!("error parsing arguments: {e}");
        process::exit(1);
    });

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = Config::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let passphrase = env::var(&config.passphrase_env_var)
        .unwrap_or_else(|_| "insecure-dev-passphrase-do-not-use-in-production".to_string());
    let key_path = PathBuf::from(
        env::var("AP2_PAYMENT_PROCESSOR_KEY_PATH").unwrap_or_else(|_| "./ap2-payment-processor.key.sealed".to_string()),
    );
    let processor_key = load_or_generate_key(&key_path, &passphrase)?;
    let did_document = DidDocument::single_key(&config.did, &processor_key);

    info!(did = %config.did, "payment processor key loaded");

    let storage = Storage::new(&config.db_path).await?;
    let mut base_urls = std::collections::HashMap::new();
    base_urls.insert(config.merchant_agent_did.clone(), config.merchant_agent_url.clone());
    let resolver: Arc<dyn DidResolver> = Arc::new(CachingHttpResolver::new(base_urls));

    // Two independent replay-defense domains: the envelope layer's nonce,
    // and the `merchant_authorization.jti` the chain-validation algorithm
    // checks in step 4. Conflating them would let a reused envelope nonce
    // mask a replayed authorization token, or vice versa.
    let nonce_ledger = Arc::new(NonceLedger::new());
    let jti_ledger = Arc::new(NonceLedger::new());
    let credential_provider_client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;
    let passkey_verifier: Arc<dyn PasskeyVerifier> = Arc::new(CredentialProviderPasskeyVerifier::new(
        credential_provider_client.clone(),
        config.credential_provider_url.clone(),
    ));

    let payment_mandate_handler = Arc::new(PaymentMandateHandler {
        storage: storage.clone(),
        self_did: config.did.clone(),
        resolver: resolver.clone(),
        jti_ledger: jti_ledger.clone(),
        passkey_verifier: passkey_verifier.clone(),
        rp_id: config.rp_id.clone(),
        allowed_origins: config.allowed_origins.clone(),
        credential_provider_client: credential_provider_client.clone(),
        credential_provider_url: config.credential_provider_url.clone(),
        public_base_url: config.public_base_url.clone(),
    });
    let router = Arc::new(Router::new().register(DataPartType::PaymentMandate, payment_mandate_handler));

    let state = State {
        storage,
        processor_key: Arc::new(processor_key),
        did: config.did.clone(),
        did_document,
        nonce_ledger,
        jti_ledger,
        passkey_verifier,
        resolver,
        router,
        credential_provider_client,
        credential_provider_url: config.credential_provider_url.clone(),
        rp_id: config.rp_id.clone(),
        allowed_origins: config.allowed_origins.clone(),
        public_base_url: config.public_base_url.clone(),
    };

    let mut server = PaymentProcessorServer::new(config.clone(), state);
    server.start().await?;

    info!(addr = %config.server_addr(), "payment processor server started");
    println!("ap2-payment-processor listening on {}", config.server_addr());

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");
    server.stop().await;

    Ok(())
}
