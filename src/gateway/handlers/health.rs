use axum::{response::IntoResponse, Json};

/// `GET /status` — liveness probe.
pub(crate) async fn status_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chunkmill",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
