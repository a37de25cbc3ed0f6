//! Binary executable for the Payment Network HTTP server.

use ap2_crypto::keys::{Algorithm, KeyPair};
use ap2_crypto::seal::{secure_storage_open, secure_storage_seal};
use ap2_envelope::did::{DidResolver, StaticDidResolver};
use ap2_envelope::dispatch::Router;
use ap2_model::did::DidDocument;
use ap2_payment_network::handler::State;
use ap2_payment_network::server::PaymentNetworkServer;
use ap2_payment_network::storage::Storage;
use ap2_payment_network::Config;
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
            println!("ap2-payment-network [--host HOST] [--port PORT] [-v]");
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
        env::var("AP2_PAYMENT_NETWORK_KEY_PATH").unwrap_or_else(|_| "./ap2-payment-network.key.sealed".to_string()),
    );
    let network_key = load_or_generate_key(&key_path, &passphrase)?;
    let did_document = DidDocument::single_key(&config.did, &network_key);

    let storage = Storage::new(&config.db_path).await?;

    let state = State {
        storage,
        did: config.did.clone(),
        network_name: config.network_name.clone(),
        did_document,
        nonce_ledger: Arc::new(NonceLedger::new()),
        resolver: Arc::new(StaticDidResolver::new()) as Arc<dyn DidResolver>,
        router: Arc::new(Router::new()),
    };

    let mut server = PaymentNetworkServer::new(config.clone(), state);
    server.start().await?;

    info!(addr = %config.server_addr(), "payment network server started");
    println!("ap2-payment-network listening on {}", config.server_addr());

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");
    server.stop().await;

    Ok(())
}
