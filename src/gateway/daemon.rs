//! The HTTP/SSE gateway server.

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::routes::{SharedState, chat, health, respond_approval, stop};

pub const DEFAULT_PORT: u16 = 18790;
const MAX_PORT_ATTEMPTS: u16 = 10;

/// Build the gateway router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/conversations/:id/chat", post(chat))
        .route("/api/v1/conversations/:id/stop", post(stop))
        .route("/api/v1/approvals/:id", post(respond_approval))
        .layer(CorsLayer::permissive()) // Local-only service; bound to loopback below.
        .with_state(state)
}

/// Start the gateway, binding to `127.0.0.1` starting at `start_port`.  If
/// that port is taken, increments up to [`MAX_PORT_ATTEMPTS`] times before
/// returning an error.  Blocks until the server shuts down.
pub async fn start_gateway(state: SharedState, start_port: u16) -> Result<(), String> {
    let app = router(state);

    let listener = bind_with_fallback(start_port).await?;
    let addr = listener.local_addr().map_err(|e| e.to_string())?;
    info!(%addr, "anteroom gateway listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("gateway error: {e}"))
}

async fn bind_with_fallback(start_port: u16) -> Result<TcpListener, String> {
    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port + offset;
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(_) if offset + 1 < MAX_PORT_ATTEMPTS => continue,
            Err(e) => {
                return Err(format!(
                    "could not bind to any port in {start_port}–{}: {e}",
                    start_port + MAX_PORT_ATTEMPTS - 1
                ));
            }
        }
    }
    unreachable!()
}
