//! Bounded-parallel chunk dispatch.
//!
//! Runs a job's chunks through the remote client with at most
//! [`MAX_CONCURRENCY`] calls in flight, persisting every transition to the
//! job store. Cancellation is cooperative: the job's status is re-read
//! before each launch, and a `cancelled` status stops further launches
//! while letting in-flight workers finish (their results are persisted,
//! which is benign).
//!
//! Completion accounting always reaches `total_chunks`: a chunk that fails
//! terminally still bumps the counter, so progress readers can tell the
//! job is done working even when some chunks are lost.

pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::models::{CompletionClient, ModelLimits};
use crate::store::{ChunkRow, ChunkStatus, JobStatus, JobStore};
use crate::stitcher;

/// Maximum in-flight remote calls per job.
pub const MAX_CONCURRENCY: usize = 5;
/// Attempts per chunk per dispatch (retry only applies to rate limits).
pub const MAX_RETRIES: u32 = 3;
/// Base back-off delay, doubled between attempts.
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Run (or re-run) a job over the chunks named by `indices`, then finalize.
///
/// Chunks not named in `indices` are assumed to already be terminal — this
/// is how retry-failed and resume re-invoke the scheduler on a subset.
/// An empty `indices` just finalizes, which makes resume idempotent after
/// a crash that happened mid-finalization.
///
/// Infrastructure failures (store errors, join errors) are caught here:
/// the job is marked `failed` and a `[Big Context Processing Failed]`
/// assistant message is inserted.
pub async fn run_job(
    store: Arc<JobStore>,
    client: Arc<dyn CompletionClient>,
    job_id: String,
    limits: ModelLimits,
    indices: Vec<usize>,
) {
    if let Err(e) = process_job(&store, &client, &job_id, limits, indices).await {
        error!(job_id = %job_id, error = %e, "job processing crashed");
        let content = format!("[Big Context Processing Failed] {e:#}");
        if let Err(e2) = record_failure(&store, &job_id, &content) {
            error!(job_id = %job_id, error = %e2, "failed to record job failure");
        }
    }
}

fn record_failure(store: &JobStore, job_id: &str, content: &str) -> anyhow::Result<()> {
    store.finish_job(job_id, JobStatus::Failed, None)?;
    if !store.job_message_exists(job_id)? {
        if let Some(job) = store.job(job_id)? {
            store.insert_message(&job.chat_id, Some(job_id), "assistant", content, None)?;
        }
    }
    Ok(())
}

async fn process_job(
    store: &Arc<JobStore>,
    client: &Arc<dyn CompletionClient>,
    job_id: &str,
    limits: ModelLimits,
    indices: Vec<usize>,
) -> anyhow::Result<()> {
    let Some(job) = store.job(job_id)? else {
        anyhow::bail!("job {job_id} not found");
    };
    if job.status == JobStatus::Cancelled {
        info!(job_id = %job_id, "job already cancelled, nothing to dispatch");
        return Ok(());
    }

    let chunks = store.chunks(job_id)?;
    let total = chunks.len();
    info!(
        job_id = %job_id,
        total,
        dispatching = indices.len(),
        model = %job.model_id,
        "dispatching chunks"
    );

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENCY));
    let mut handles = Vec::new();

    for idx in indices {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed");

        // Cooperative cancellation: checked once per launch. Chunk rows
        // were already marked cancelled by the control endpoint.
        let status = store.job(job_id)?.map(|j| j.status);
        if status == Some(JobStatus::Cancelled) {
            info!(job_id = %job_id, next = idx, "cancellation observed, stopping launches");
            drop(permit);
            break;
        }

        let Some(chunk) = chunks.iter().find(|c| c.index == idx as i64) else {
            warn!(job_id = %job_id, idx, "dispatch index has no chunk row, skipping");
            drop(permit);
            continue;
        };

        let store = store.clone();
        let client = client.clone();
        let job_id = job_id.to_string();
        let instruction = job.instruction.clone();
        let model_id = job.model_id.clone();
        let chunk = chunk.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            process_chunk(
                &store, &*client, &job_id, &instruction, &model_id, limits, &chunk, total,
            )
            .await
        }));
    }

    let mut first_err: Option<anyhow::Error> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            Err(e) => {
                first_err.get_or_insert(anyhow::anyhow!("chunk worker panicked: {e}"));
            }
        }
    }
    if let Some(e) = first_err {
        return Err(e);
    }

    finalize_job(store, &**client, job_id, limits).await
}

/// Run one chunk to a recorded outcome. Store errors bubble up; remote
/// errors are recovered locally into a failed chunk row.
#[allow(clippy::too_many_arguments)]
async fn process_chunk(
    store: &JobStore,
    client: &dyn CompletionClient,
    job_id: &str,
    instruction: &str,
    model_id: &str,
    limits: ModelLimits,
    chunk: &ChunkRow,
    total: usize,
) -> anyhow::Result<()> {
    let index = chunk.index as usize;
    store.mark_chunk_processing(job_id, index)?;

    let messages = prompts::chunk_messages(instruction, &chunk.input_text, index, total);
    let max_tokens = limits.max_output_tokens.map(|v| v as u32);

    let mut attempt = 0u32;
    loop {
        match client.complete(model_id, &messages, max_tokens).await {
            Ok(completion) => {
                store.record_api_call(
                    Some(job_id),
                    "chunk",
                    model_id,
                    crate::store::CallUsage {
                        prompt_tokens: completion.usage.prompt_tokens as i64,
                        completion_tokens: completion.usage.completion_tokens as i64,
                        total_tokens: completion.usage.total_tokens as i64,
                        cost: completion.usage.cost,
                    },
                )?;
                store.complete_chunk(
                    job_id,
                    index,
                    &completion.content,
                    completion.usage.total_tokens as i64,
                    completion.usage.cost,
                )?;
                info!(job_id = %job_id, chunk = index, "chunk completed");
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt + 1 < MAX_RETRIES => {
                let delay = BASE_RETRY_DELAY * 2u32.pow(attempt);
                warn!(
                    job_id = %job_id,
                    chunk = index,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(job_id = %job_id, chunk = index, error = %e, "chunk failed");
                store.fail_chunk(job_id, index, &e.to_string())?;
                return Ok(());
            }
        }
    }
}

/// Close out a job once every chunk has a recorded outcome.
///
/// The job is `failed` only when every chunk failed; with at least one
/// success the job completes and the failed chunks are simply absent from
/// the final artifact (visible in the progress snapshot instead). The
/// terminal `(status, stitched_output)` write is one transaction, and the
/// assistant message is inserted at most once per job.
async fn finalize_job(
    store: &JobStore,
    client: &dyn CompletionClient,
    job_id: &str,
    limits: ModelLimits,
) -> anyhow::Result<()> {
    let Some(job) = store.job(job_id)? else {
        anyhow::bail!("job {job_id} vanished before finalization");
    };
    if job.status == JobStatus::Cancelled {
        info!(job_id = %job_id, "job cancelled, skipping finalization");
        return Ok(());
    }

    let chunks = store.chunks(job_id)?;
    let outputs: Vec<String> = chunks
        .iter()
        .filter(|c| c.status == ChunkStatus::Completed)
        .filter_map(|c| c.output_text.clone())
        .collect();
    let failed = chunks
        .iter()
        .filter(|c| c.status == ChunkStatus::Failed)
        .count();

    if outputs.is_empty() {
        warn!(job_id = %job_id, failed, "every chunk failed");
        let first_error = chunks
            .iter()
            .find_map(|c| c.error.clone())
            .unwrap_or_else(|| "unknown error".to_string());
        let content = format!(
            "[Big Context Processing Failed] All {} chunks failed. First error: {}",
            chunks.len(),
            first_error
        );
        store.finish_job(job_id, JobStatus::Failed, None)?;
        insert_final_message(store, &job.chat_id, job_id, &content)?;
        return Ok(());
    }

    let final_output = if job.enable_stitch_pass && outputs.len() > 1 {
        store.set_job_status(job_id, JobStatus::Stitching)?;
        stitcher::stitch(
            store,
            client,
            job_id,
            &job.instruction,
            &job.model_id,
            limits,
            &outputs,
        )
        .await?
    } else {
        outputs.join("\n\n")
    };

    // A cancellation that lands during stitching wins; the guarded write
    // tells us by changing nothing.
    if !store.finish_job(job_id, JobStatus::Completed, Some(&final_output))? {
        info!(job_id = %job_id, "job cancelled during finalization");
        return Ok(());
    }
    insert_final_message(store, &job.chat_id, job_id, &final_output)?;
    info!(
        job_id = %job_id,
        output_chars = final_output.chars().count(),
        failed,
        "job completed"
    );
    Ok(())
}

/// Insert the job's assistant message unless finalization already did —
/// resume after a crash mid-finalization must not duplicate it.
fn insert_final_message(
    store: &JobStore,
    chat_id: &str,
    job_id: &str,
    content: &str,
) -> anyhow::Result<()> {
    if store.job_message_exists(job_id)? {
        info!(job_id = %job_id, "assistant message already exists, skipping insert");
        return Ok(());
    }
    let summary: Option<String> = if content.chars().count() > 2_000 {
        Some(content.chars().take(2_000).collect())
    } else {
        None
    };
    store.insert_message(chat_id, Some(job_id), "assistant", content, summary.as_deref())?;
    Ok(())
}
