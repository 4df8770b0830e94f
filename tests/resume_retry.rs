//! Resume and retry-failed flows: crash recovery, counter reconciliation,
//! and idempotent finalization.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chunkmill::models::{
    ChatMessage, Completion, CompletionClient, CompletionError, ModelLimits, Usage,
};
use chunkmill::scheduler;
use chunkmill::store::{ChunkStatus, JobStatus, JobStore};

fn limits() -> ModelLimits {
    ModelLimits {
        context_length: 128_000,
        max_output_tokens: None,
    }
}

struct EchoClient {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionClient for EchoClient {
    async fn complete(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _max_tokens: Option<u32>,
    ) -> Result<Completion, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Completion {
            content: "out".into(),
            finish_reason: "stop".into(),
            usage: Usage::default(),
        })
    }
}

fn ten_chunk_job(store: &JobStore) -> String {
    store.ensure_chat("chat-r").unwrap();
    let texts: Vec<String> = (0..10).map(|i| format!("part {i}")).collect();
    store
        .create_job("chat-r", "Summarize", "test/model", false, &texts)
        .unwrap()
        .id
}

/// Scenario: chunks 0–3 completed, 4–5 were in flight when the process
/// died. Resume resets the orphans, reconciles the counter, and finishes
/// the job with exactly one assistant message.
#[tokio::test]
async fn resume_after_crash_finishes_the_job_once() {
    let store = Arc::new(JobStore::open_in_memory().unwrap());
    let job_id = ten_chunk_job(&store);

    for i in 0..4 {
        store.complete_chunk(&job_id, i, "done-early", 5, 0.0).unwrap();
    }
    store.mark_chunk_processing(&job_id, 4).unwrap();
    store.mark_chunk_processing(&job_id, 5).unwrap();
    // The crash: nothing else happens until resume.

    // What the resume endpoint does.
    assert_eq!(store.reset_processing_chunks(&job_id).unwrap(), 2);
    store.recount_completed(&job_id).unwrap();
    store.set_job_status(&job_id, JobStatus::Processing).unwrap();
    let pending = store.pending_chunk_indices(&job_id).unwrap();
    assert_eq!(pending, vec![4, 5, 6, 7, 8, 9]);

    let client = Arc::new(EchoClient {
        calls: AtomicUsize::new(0),
    });
    scheduler::run_job(store.clone(), client.clone(), job_id.clone(), limits(), pending).await;

    assert_eq!(client.calls.load(Ordering::SeqCst), 6);
    let job = store.job(&job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_chunks, 10);
    for c in store.chunks(&job_id).unwrap() {
        assert_eq!(c.status, ChunkStatus::Completed);
    }

    let assistant: Vec<_> = store
        .messages_for_chat("chat-r")
        .unwrap()
        .into_iter()
        .filter(|m| m.role == "assistant")
        .collect();
    assert_eq!(assistant.len(), 1);
}

/// Resume against a job whose finalization already ran must not insert a
/// second assistant message.
#[tokio::test]
async fn resume_after_finalization_inserts_no_duplicate_message() {
    let store = Arc::new(JobStore::open_in_memory().unwrap());
    let job_id = ten_chunk_job(&store);

    for i in 0..10 {
        store.complete_chunk(&job_id, i, "done", 5, 0.0).unwrap();
    }
    // Finalization got as far as the assistant message, then the process
    // died before anyone observed the terminal status.
    store
        .insert_message("chat-r", Some(&job_id), "assistant", "the artifact", None)
        .unwrap();

    let client = Arc::new(EchoClient {
        calls: AtomicUsize::new(0),
    });
    // Resume with nothing left pending: just re-finalizes.
    scheduler::run_job(store.clone(), client.clone(), job_id.clone(), limits(), vec![]).await;

    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    let job = store.job(&job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.stitched_output.is_some());

    let assistant: Vec<_> = store
        .messages_for_chat("chat-r")
        .unwrap()
        .into_iter()
        .filter(|m| m.role == "assistant")
        .collect();
    assert_eq!(assistant.len(), 1, "finalization must not duplicate the message");
    assert_eq!(assistant[0].content, "the artifact");
}

/// Retry gives failed chunks a fresh budget and leaves everything else
/// alone; a second retry with nothing failed is a no-op.
#[tokio::test]
async fn retry_failed_is_idempotent() {
    let store = Arc::new(JobStore::open_in_memory().unwrap());
    let job_id = ten_chunk_job(&store);

    for i in 0..8 {
        store.complete_chunk(&job_id, i, "kept", 5, 0.0).unwrap();
    }
    store.fail_chunk(&job_id, 8, "server error: 500").unwrap();
    store.fail_chunk(&job_id, 9, "server error: 500").unwrap();
    store.finish_job(&job_id, JobStatus::Completed, Some("partial")).unwrap();

    // First retry: exactly the two failed chunks come back.
    let reset = store.reset_failed_chunks(&job_id).unwrap();
    assert_eq!(reset, vec![8, 9]);
    assert_eq!(store.job(&job_id).unwrap().unwrap().completed_chunks, 8);
    store.set_job_status(&job_id, JobStatus::Processing).unwrap();

    let client = Arc::new(EchoClient {
        calls: AtomicUsize::new(0),
    });
    scheduler::run_job(store.clone(), client.clone(), job_id.clone(), limits(), reset).await;

    // Only the two reset chunks were re-dispatched.
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    let job = store.job(&job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_chunks, 10);
    // The untouched chunks kept their original outputs.
    let chunks = store.chunks(&job_id).unwrap();
    assert_eq!(chunks[0].output_text.as_deref(), Some("kept"));
    assert_eq!(chunks[8].output_text.as_deref(), Some("out"));

    // Second retry: nothing failed, nothing changes.
    assert!(store.reset_failed_chunks(&job_id).unwrap().is_empty());
    assert_eq!(store.job(&job_id).unwrap().unwrap().completed_chunks, 10);
}
