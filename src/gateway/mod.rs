//! HTTP control surface.
//!
//! Serves the engine's endpoints:
//! - `POST /chunk-process`              — start a job (or `?estimate=true`)
//! - `GET  /chunk-process/:id/stream`   — SSE progress stream
//! - `POST /chunk-process/:id/cancel`   — cooperative cancellation
//! - `POST /chunk-process/:id/retry`    — re-run failed chunks
//! - `POST /chunk-process/:id/resume`   — relaunch an orphaned job
//! - `GET  /chats/:id/document`         — reassemble the original document
//! - `GET  /chats/:id/active-job`       — most recent non-terminal job
//! - `GET  /status`                     — health

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::models::{CompletionClient, ModelCatalog};
use crate::store::JobStore;

// ---------------------------------------------------------------------------
// Shared state injected into axum handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub client: Arc<dyn CompletionClient>,
    pub catalog: Arc<ModelCatalog>,
}

/// Handle returned by [`start_gateway`].
pub struct Gateway {
    /// Server task handle.
    pub handle: JoinHandle<()>,
    /// The address the server is actually listening on.
    pub addr: SocketAddr,
}

/// Build the engine's router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(handlers::health::status_handler))
        .route("/chunk-process", post(handlers::jobs::start_job))
        .route("/chunk-process/:id/stream", get(handlers::stream::stream_job))
        .route("/chunk-process/:id/cancel", post(handlers::jobs::cancel_job))
        .route("/chunk-process/:id/retry", post(handlers::jobs::retry_failed))
        .route("/chunk-process/:id/resume", post(handlers::jobs::resume_job))
        .route("/chats/:id/document", get(handlers::chats::document))
        .route("/chats/:id/active-job", get(handlers::chats::active_job))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the gateway HTTP server on `addr`.
///
/// Binding to port 0 picks a free port; the bound address is returned in
/// the [`Gateway`] handle.
pub async fn start_gateway(addr: SocketAddr, state: AppState) -> std::io::Result<Gateway> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("gateway server error: {e}");
        }
    });

    info!(%bound_addr, "gateway started");

    Ok(Gateway {
        handle,
        addr: bound_addr,
    })
}
