//! HTTP server wiring for the Credential Provider service.

use crate::config::Config;
use crate::error::Error;
use crate::handler::{
    handle_a2a_message, handle_complete_step_up, handle_did_document, handle_get_step_up, handle_health,
    handle_initiate_step_up, handle_list_payment_methods, handle_receipt, handle_register_passkey,
    handle_tokenize_payment_method, handle_verify_attestation, handle_verify_credential, handle_verify_step_up, State,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tracing::{info, warn};
use warp::{self, Filter, Rejection, Reply};

pub struct CredentialProviderServer {
    config: Config,
    state: State,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl CredentialProviderServer {
    pub fn new(config: Config, state: State) -> Self {
        Self {
            config,
            state,
            shutdown_tx: None,
        }
    }

    pub async fn start(&mut self) -> Result<(), Error> {
        let addr: SocketAddr = self
            .config
            .server_addr()
            .parse()
            .map_err(|e| Error::Config(format!("invalid server address: {e}")))?;

        let state = self.state.clone();

        let health_route = warp::path("health").and(warp::get()).and_then(handle_health);

        let did_route = warp::path!(".well-known" / "did.json")
            .and(warp::get())
            .and(with_state(state.clone()))
            .and_then(handle_did_document);

        let register_passkey_route = warp::path!("register" / "passkey")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state(state.clone()))
            .and_then(handle_register_passkey);

        let list_payment_methods_route = warp::path("payment-methods")
            .and(warp::path::end())
            .and(warp::get())
            .and(warp::query())
            .and(with_state(state.clone()))
            .and_then(handle_list_payment_methods);

        let tokenize_route = warp::path!("payment-methods" / "tokenize")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state(state.clone()))
            .and_then(handle_tokenize_payment_method);

        let initiate_step_up_route = warp::path!("payment-methods" / "initiate-step-up")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state(state.clone()))
            .and_then(handle_initiate_step_up);

        let get_step_up_route = warp::path!("step-up" / String)
            .and(warp::get())
            .and_then(handle_get_step_up);

        let complete_step_up_route = warp::path!("step-up" / String / "complete")
            .and(warp::post())
            .and(with_state(state.clone()))
            .and_then(handle_complete_step_up);

        let verify_step_up_route = warp::path!("payment-methods" / "verify-step-up")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state(state.clone()))
            .and_then(handle_verify_step_up);

        let verify_attestation_route = warp::path!("verify" / "attestation")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state(state.clone()))
            .and_then(handle_verify_attestation);

        let verify_credential_route = warp::path!("credentials" / "verify")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state(state.clone()))
            .and_then(handle_verify_credential);

        let receipts_route = warp::path("receipts")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state(state.clone()))
            .and_then(handle_receipt);

        let a2a_route = warp::path!("a2a" / "message")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state(state.clone()))
            .and_then(handle_a2a_message);

        let routes = health_route
            .or(did_route)
            .or(register_passkey_route)
            .or(list_payment_methods_route)
            .or(tokenize_route)
            .or(initiate_step_up_route)
            .or(get_step_up_route)
            .or(complete_step_up_route)
            .or(verify_step_up_route)
            .or(verify_attestation_route)
            .or(verify_credential_route)
            .or(receipts_route)
            .or(a2a_route)
            .with(warp::log("ap2_credential_provider"))
            .recover(handle_rejection);

        let (tx, rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(tx);

        info!(%addr, "starting credential provider server");
        let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
            rx.await.ok();
            info!("shutting down credential provider server");
        });

        tokio::spawn(server);
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        } else {
            warn!("credential provider server is not running");
        }
    }
}

fn with_state(state: State) -> impl Filter<Extract = (State,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let (status, error_kind, message) = if err.is_not_found() {
        (warp::http::StatusCode::NOT_FOUND, "NotFound", "not found".to_string())
    } else if let Some(e) = err.find::<Error>() {
        (e.status_code(), e.error_kind(), e.to_string())
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (
            warp::http::StatusCode::BAD_REQUEST,
            "MalformedRequest",
            "request body did not match the expected shape".to_string(),
        )
    } else {
        (
            warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            "InternalError",
            "internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error_kind": error_kind, "message": message })),
        status,
    ))
}
