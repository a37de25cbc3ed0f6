//! Binary executable for the Merchant HTTP server.

use ap2_crypto::keys::{Algorithm, KeyPair};
use ap2_crypto::seal::{secure_storage_open, secure_storage_seal};
use ap2_envelope::did::{DidResolver, StaticDidResolver};
use ap2_envelope::dispatch::Router;
use ap2_merchant::handler::State;
use ap2_merchant::server::MerchantServer;
use ap2_merchant::storage::Storage;
use ap2_merchant::Config;
use ap2_model::did::DidDocument;
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
    println!("ap2-merchant");
    println!();
    println!("USAGE:");
    println!("    ap2-merchant [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --host <HOST>    Host to bind to [default: 127.0.0.1]");
    println!("    -p, --port <PORT>    Port to listen on [default: 8101]");
    println!("    -v, --verbose        Enable verbose logging");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    AP2_MERCHANT_HOST, AP2_MERCHANT_PORT, AP2_MERCHANT_DID,");
    println!("    AP2_PAYMENT_PROCESSOR_DID, AP2_MERCHANT_DB_PATH, AP2_MERCHANT_KEY_PATH,");
    println!("    AP2_MERCHANT_PASSPHRASE");
}

/// Load the merchant's signing key from its sealed key file, generating and
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
        env::var("AP2_MERCHANT_KEY_PATH").unwrap_or_else(|_| "./ap2-merchant.key.sealed".to_string()),
    );
    let merchant_key = load_or_generate_key(&key_path, &passphrase)?;
    let did_document = DidDocument::single_key(&config.did, &merchant_key);

    info!(did = %config.did, "merchant key loaded");

    let storage = Storage::new(&config.db_path).await?;

    let state = State {
        storage,
        merchant_key: Arc::new(merchant_key),
        did: config.did.clone(),
        payment_processor_did: config.payment_processor_did.clone(),
        did_document,
        nonce_ledger: Arc::new(NonceLedger::new()),
        resolver: Arc::new(StaticDidResolver::new()) as Arc<dyn DidResolver>,
        router: Arc::new(Router::new()),
    };

    let mut server = MerchantServer::new(config.clone(), state);
    server.start().await?;

    info!(addr = %config.server_addr(), "merchant server started");
    println!("ap2-merchant listening on {}", config.server_addr());

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");
    server.stop().await;

    Ok(())
}
