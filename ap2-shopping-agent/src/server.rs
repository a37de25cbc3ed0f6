//! Minimal HTTP surface (§6): `GET /health` and `GET /.well-known/did.json`
//! only. The Shopping Agent is not an A2A server — it registers no
//! `/a2a/message` route and no dispatch router — but every other service
//! resolves peer DIDs over HTTP, so this process still needs to publish its
//! own document for the Merchant Agent and Payment Processor to verify the
//! envelopes it sends them.

use ap2_model::did::DidDocument;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tracing::{info, warn};
use warp::{self, Filter, Reply};

pub struct ShoppingAgentDidServer {
    addr: SocketAddr,
    did_document: DidDocument,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ShoppingAgentDidServer {
    pub fn new(addr: SocketAddr, did_document: DidDocument) -> Self {
        Self { addr, did_document, shutdown_tx: None }
    }

    pub async fn start(&mut self) {
        let did_document = self.did_document.clone();
        let health_route = warp::path("health")
            .and(warp::get())
            .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })));
        let did_route = warp::path!(".well-known" / "did.json")
            .and(warp::get())
            .map(move || warp::reply::json(&did_document));
        let routes = health_route.or(did_route).with(warp::log("ap2_shopping_agent"));

        let (tx, rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(tx);
        info!(addr = %self.addr, "starting shopping agent did.json server");
        let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(self.addr, async {
            rx.await.ok();
            info!("shutting down shopping agent did.json server");
        });
        tokio::spawn(server);
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        } else {
            warn!("shopping agent did.json server is not running");
        }
    }
}
