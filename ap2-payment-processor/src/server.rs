//! HTTP server wiring for the Payment Processor service.

use crate::config::Config;
use crate::error::Error;
use crate::handler::{handle_a2a_message, handle_did_document, handle_health, State};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tracing::{info, warn};
use warp::{self, Filter, Rejection, Reply};

pub struct PaymentProcessorServer {
    config: Config,
    state: State,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl PaymentProcessorServer {
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
            .map_err(|e| Error::Validation(ap2_model::Error::SchemaInvalid(format!("invalid listen address: {e}"))))?;

        let state = self.state.clone();

        let health_route = warp::path("health").and(warp::get()).and_then(handle_health);

        let did_route = warp::path!(".well-known" / "did.json")
            .and(warp::get())
            .and(with_state(state.clone()))
            .and_then(handle_did_document);

        let a2a_route = warp::path!("a2a" / "message")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state(state.clone()))
            .and_then(handle_a2a_message);

        let routes = health_route
            .or(did_route)
            .or(a2a_route)
            .with(warp::log("ap2_payment_processor"))
            .recover(handle_rejection);

        let (tx, rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(tx);

        info!(%addr, "starting payment processor server");
        let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
            rx.await.ok();
            info!("shutting down payment processor server");
        });

        tokio::spawn(server);
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        } else {
            warn!("payment processor server is not running");
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
        (warp::http::StatusCode::BAD_REQUEST, "MalformedRequest", "request body did not match the expected shape".to_string())
    } else {
        (warp::http::StatusCode::INTERNAL_SERVER_ERROR, "InternalError", "internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error_kind": error_kind, "message": message })),
        status,
    ))
}
