//! Chat-scoped reads: document reassembly and active-job lookup.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::super::AppState;

/// `GET /chats/:id/document` — reconstruct the original text from the
/// chat's most recent job by joining chunk inputs in index order. The
/// overlap is left in: the document is exactly what was chunked.
pub(crate) async fn document(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> impl IntoResponse {
    let job = match state.store.latest_job_for_chat(&chat_id) {
        Ok(Some(j)) => j,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "no job for this chat" })),
            )
                .into_response()
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("{e:#}") })),
            )
                .into_response()
        }
    };

    let chunks = match state.store.chunks(&job.id) {
        Ok(c) => c,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("{e:#}") })),
            )
                .into_response()
        }
    };

    let document = chunks
        .iter()
        .map(|c| c.input_text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    (
        StatusCode::OK,
        Json(json!({
            "chatId": chat_id,
            "jobId": job.id,
            "document": document,
        })),
    )
        .into_response()
}

/// `GET /chats/:id/active-job` — most recent non-terminal job, 404 if none.
pub(crate) async fn active_job(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> impl IntoResponse {
    match state.store.active_job_for_chat(&chat_id) {
        Ok(Some(job)) => (
            StatusCode::OK,
            Json(json!({ "jobId": job.id, "status": job.status })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no active job" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{e:#}") })),
        )
            .into_response(),
    }
}
