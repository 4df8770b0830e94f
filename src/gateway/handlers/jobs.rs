//! Job control endpoints: start (with estimate-only mode), cancel,
//! retry-failed, and resume.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::super::AppState;
use crate::chunker;
use crate::models::{ModelInfo, ModelLimits};
use crate::scheduler;
use crate::store::JobStatus;
use crate::tokens::{estimate_tokens, max_chunk_tokens, SYSTEM_PROMPT_RESERVE};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartRequest {
    #[serde(default)]
    chat_id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    model_id: String,
    #[serde(default)]
    enable_stitch_pass: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartQuery {
    /// When true, return the cost estimate without creating anything.
    #[serde(default)]
    estimate: bool,
}

fn error_body(status: StatusCode, msg: impl Into<String>) -> axum::response::Response {
    (status, Json(json!({ "error": msg.into() }))).into_response()
}

fn internal(e: anyhow::Error) -> axum::response::Response {
    error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
}

/// Resolve a model from the catalog, mapping the failure modes to HTTP.
async fn resolve_model(state: &AppState, model_id: &str) -> Result<ModelInfo, axum::response::Response> {
    match state.catalog.model(model_id).await {
        Ok(Some(m)) => Ok(m),
        Ok(None) => Err(error_body(
            StatusCode::BAD_REQUEST,
            format!("unknown model {model_id}"),
        )),
        Err(e) => Err(error_body(
            StatusCode::BAD_GATEWAY,
            format!("model catalog unavailable: {e:#}"),
        )),
    }
}

/// `POST /chunk-process` — start a job, or preview its cost.
pub(crate) async fn start_job(
    State(state): State<AppState>,
    Query(q): Query<StartQuery>,
    Json(body): Json<StartRequest>,
) -> impl IntoResponse {
    if body.chat_id.trim().is_empty()
        || body.text.trim().is_empty()
        || body.instruction.trim().is_empty()
        || body.model_id.trim().is_empty()
    {
        return error_body(
            StatusCode::BAD_REQUEST,
            "chatId, text, instruction, and modelId are required",
        );
    }

    let model = match resolve_model(&state, &body.model_id).await {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let instruction_tokens = estimate_tokens(&body.instruction);
    let budget = max_chunk_tokens(model.context_length, instruction_tokens, model.max_output);
    let chunks = chunker::split(&body.text, budget);

    if q.estimate {
        return (
            StatusCode::OK,
            Json(estimate_body(&chunks, instruction_tokens, budget, &model)),
        )
            .into_response();
    }

    if let Err(e) = state.store.ensure_chat(&body.chat_id) {
        return internal(e);
    }
    let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
    let total = texts.len();
    let job = match state.store.create_job(
        &body.chat_id,
        &body.instruction,
        &body.model_id,
        body.enable_stitch_pass,
        &texts,
    ) {
        Ok(j) => j,
        Err(e) => return internal(e),
    };

    let notice = format!(
        "Processing a large document in {} chunk(s) with {}.",
        total, model.id
    );
    if let Err(e) = state
        .store
        .insert_message(&body.chat_id, Some(&job.id), "system", &notice, None)
    {
        return internal(e);
    }

    info!(job_id = %job.id, chat_id = %body.chat_id, chunks = total, "job started");

    tokio::spawn(scheduler::run_job(
        state.store.clone(),
        state.client.clone(),
        job.id.clone(),
        ModelLimits::from(&model),
        (0..total).collect(),
    ));

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "jobId": job.id,
            "totalChunks": total,
            "status": "processing",
        })),
    )
        .into_response()
}

fn estimate_body(
    chunks: &[chunker::Chunk],
    instruction_tokens: usize,
    budget: usize,
    model: &ModelInfo,
) -> serde_json::Value {
    let chunk_tokens: usize = chunks.iter().map(|c| estimate_tokens(&c.text)).sum();
    // Each call carries the instruction twice (bookended) plus the fixed
    // system framing; output is assumed comparable to input.
    let input_tokens =
        chunk_tokens + chunks.len() * (2 * instruction_tokens + SYSTEM_PROMPT_RESERVE);
    let output_tokens = chunk_tokens;
    let cost = input_tokens as f64 * model.input_price_per_m / 1_000_000.0
        + output_tokens as f64 * model.output_price_per_m / 1_000_000.0;

    json!({
        "chunkCount": chunks.len(),
        "maxChunkTokens": budget,
        "estimatedInputTokens": input_tokens,
        "estimatedOutputTokens": output_tokens,
        "estimatedCost": cost,
        "model": model.id,
    })
}

/// `POST /chunk-process/:id/cancel`
pub(crate) async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let job = match state.store.job(&id) {
        Ok(Some(j)) => j,
        Ok(None) => return error_body(StatusCode::NOT_FOUND, "job not found"),
        Err(e) => return internal(e),
    };
    if job.status.is_terminal() {
        return error_body(
            StatusCode::CONFLICT,
            format!("job is already {}", job.status.as_str()),
        );
    }
    if let Err(e) = state.store.cancel_job(&id) {
        return internal(e);
    }
    info!(job_id = %id, "job cancelled");
    (StatusCode::OK, Json(json!({ "status": "cancelled" }))).into_response()
}

/// `POST /chunk-process/:id/retry` — reset failed chunks and re-dispatch
/// only those. A fresh retry budget applies; with nothing failed this is
/// a no-op.
pub(crate) async fn retry_failed(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let job = match state.store.job(&id) {
        Ok(Some(j)) => j,
        Ok(None) => return error_body(StatusCode::NOT_FOUND, "job not found"),
        Err(e) => return internal(e),
    };
    if job.status == JobStatus::Cancelled {
        return error_body(StatusCode::CONFLICT, "job is cancelled");
    }

    // Resolve the model before touching any rows: a catalog failure must
    // leave the job exactly as it was, or the reset chunks end up pending
    // with no scheduler coming and no endpoint able to unstick them.
    let model = match resolve_model(&state, &job.model_id).await {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let reset = match state.store.reset_failed_chunks(&id) {
        Ok(v) => v,
        Err(e) => return internal(e),
    };
    if reset.is_empty() {
        return (
            StatusCode::OK,
            Json(json!({ "reset": 0, "status": job.status })),
        )
            .into_response();
    }

    if let Err(e) = state.store.set_job_status(&id, JobStatus::Processing) {
        return internal(e);
    }

    info!(job_id = %id, retrying = reset.len(), "retrying failed chunks");

    let count = reset.len();
    tokio::spawn(scheduler::run_job(
        state.store.clone(),
        state.client.clone(),
        id.clone(),
        ModelLimits::from(&model),
        reset,
    ));

    (
        StatusCode::ACCEPTED,
        Json(json!({ "reset": count, "status": "processing" })),
    )
        .into_response()
}

/// `POST /chunk-process/:id/resume` — pick up a job orphaned by a crash
/// or restart. Chunks stuck in `processing` go back to `pending`, the
/// completion counter is recomputed from the rows, and the scheduler is
/// re-invoked on whatever is pending. Finalization stays idempotent, so
/// resuming an already-finalized job inserts no duplicate message.
pub(crate) async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let job = match state.store.job(&id) {
        Ok(Some(j)) => j,
        Ok(None) => return error_body(StatusCode::NOT_FOUND, "job not found"),
        Err(e) => return internal(e),
    };
    if job.status.is_terminal() {
        return error_body(
            StatusCode::CONFLICT,
            format!("cannot resume a {} job", job.status.as_str()),
        );
    }

    let model = match resolve_model(&state, &job.model_id).await {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let prep = (|| -> anyhow::Result<Vec<usize>> {
        state.store.reset_processing_chunks(&id)?;
        state.store.recount_completed(&id)?;
        state.store.set_job_status(&id, JobStatus::Processing)?;
        state.store.pending_chunk_indices(&id)
    })();
    let pending = match prep {
        Ok(p) => p,
        Err(e) => return internal(e),
    };

    info!(job_id = %id, pending = pending.len(), "resuming job");

    let count = pending.len();
    tokio::spawn(scheduler::run_job(
        state.store.clone(),
        state.client.clone(),
        id.clone(),
        ModelLimits::from(&model),
        pending,
    ));

    (
        StatusCode::ACCEPTED,
        Json(json!({ "resumed": count, "status": "processing" })),
    )
        .into_response()
}
