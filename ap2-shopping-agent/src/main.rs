//! CLI binary that drives a single purchase end to end (§4.10).

use ap2_crypto::keys::{Algorithm, KeyPair};
use ap2_crypto::seal::{secure_storage_open, secure_storage_seal};
use ap2_envelope::did::{CachingHttpResolver, DidResolver};
use ap2_model::did::DidDocument;
use ap2_model::payment_request::PaymentCurrencyAmount;
use ap2_shopping_agent::domain::{run_purchase, PurchaseRequest, ShoppingAgentContext};
use ap2_shopping_agent::server::ShoppingAgentDidServer;
use ap2_shopping_agent::Config;
use env_logger::Env;
use std::collections::HashMap;
use std::env;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::process;
use tracing::info;

struct Args {
    description: Option<String>,
    max_amount: Option<String>,
    currency: String,
    payment_method_id: String,
    verbose: bool,
}

impl Args {
    fn parse() -> Result<Self, Box<dyn StdError>> {
        let mut args = pico_args::Arguments::from_env();
        if args.contains(["-h", "--help"]) {
            print_help();
            process::exit(0);
        }
        let result = Self {
            description: args.opt_value_from_str(["-d", "--description"])?,
            max_amount: args.opt_value_from_str("--max-amount")?,
            currency: args.opt_value_from_str("--currency")?.unwrap_or_else(|| "JPY".to_string()),
            payment_method_id: args.opt_value_from_str("--payment-method")?.unwrap_or_else(|| "pm_visa_4242".to_string()),
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
    println!("ap2-shopping-agent");
    println!();
    println!("USAGE:");
    println!("    ap2-shopping-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -d, --description <TEXT>     Natural-language purchase intent");
    println!("        --max-amount <VALUE>      Ceiling on the cart total, in major units");
    println!("        --currency <CODE>         Currency for --max-amount [default: JPY]");
    println!("        --payment-method <ID>     Payment method id to charge [default: pm_visa_4242]");
    println!("    -v, --verbose                 Enable verbose logging");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    AP2_SHOPPING_AGENT_HOST, AP2_SHOPPING_AGENT_PORT,");
    println!("    AP2_SHOPPING_AGENT_DID, AP2_SHOPPING_AGENT_USER_ID,");
    println!("    AP2_MERCHANT_AGENT_DID, AP2_MERCHANT_AGENT_URL, AP2_MERCHANT_DID, AP2_MERCHANT_URL,");
    println!("    AP2_PAYMENT_PROCESSOR_DID, AP2_CREDENTIAL_PROVIDER_URL,");
    println!("    AP2_SHOPPING_AGENT_WEBAUTHN_ORIGIN, AP2_SHOPPING_AGENT_KEY_PATH,");
    println!("    AP2_SHOPPING_AGENT_PASSPHRASE");
}

fn load_or_generate_key(key_path: &PathBuf, passphrase: &str) -> Result<KeyPair, Box<dyn StdError>> {
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
async fn main() -> Result<(), Box<dyn StdError>> {
    let args = Args::parse().unwrap_or_else(|e| {
        eprintln!("error parsing arguments: {e}");
        process::exit(1);
    });

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();

    let passphrase = env::var("AP2_SHOPPING_AGENT_PASSPHRASE")
        .unwrap_or_else(|_| "insecure-dev-passphrase-do-not-use-in-production".to_string());
    let key_path = PathBuf::from(
        env::var("AP2_SHOPPING_AGENT_KEY_PATH").unwrap_or_else(|_| "./ap2-shopping-agent.key.sealed".to_string()),
    );
    let signing_key = load_or_generate_key(&key_path, &passphrase)?;
    info!(did = %config.did, "shopping agent key loaded");

    // Publish our own DID document so the Merchant Agent and Payment
    // Processor can resolve it over HTTP when verifying envelopes we send
    // them (§6: all six services serve /.well-known/did.json identically).
    let did_document = DidDocument::single_key(&config.did, &signing_key);
    let mut did_server = ShoppingAgentDidServer::new(config.server_addr().parse()?, did_document);
    did_server.start().await;

    let mut base_urls = HashMap::new();
    base_urls.insert(config.merchant_did.clone(), config.merchant_url.clone());
    let resolver: Box<dyn DidResolver> = Box::new(CachingHttpResolver::new(base_urls));

    let http_client = reqwest::Client::builder().timeout(config.request_timeout()).build()?;

    let max_amount = args.max_amount.map(|value| PaymentCurrencyAmount { currency: args.currency.clone(), value });
    let request = PurchaseRequest {
        natural_language_description: args
            .description
            .unwrap_or_else(|| "red high-top basketball shoes".to_string()),
        max_amount,
        payment_method_id: args.payment_method_id,
    };

    let ctx = ShoppingAgentContext {
        self_did: &config.did,
        user_id: &config.user_id,
        signing_key: &signing_key,
        merchant_agent_did: &config.merchant_agent_did,
        merchant_agent_url: &config.merchant_agent_url,
        merchant_did: &config.merchant_did,
        payment_processor_did: &config.payment_processor_did,
        credential_provider_url: &config.credential_provider_url,
        webauthn_origin: &config.webauthn_origin,
        resolver: resolver.as_ref(),
        http_client: &http_client,
    };

    let outcome = run_purchase(&ctx, request).await;
    did_server.stop().await;

    match outcome {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("{{\"error_kind\": \"{}\", \"message\": \"{e}\"}}", e.error_kind());
            process::exit(1);
        }
    }
}
