//! Progress snapshots over a job's persisted state.
//!
//! The progress stream is a polling loop: no database triggers, no change
//! feeds, just a snapshot of the job and its chunk list every ~1.5 s. The
//! aggregates (`total_tokens`, `total_cost`, `failed_chunks`) are computed
//! from the same chunk list the snapshot carries, so a reader always sees
//! one consistent view.
//!
//! Staleness: a `processing` job whose completion counter has not moved
//! for three minutes is flagged so the UI can offer (or auto-trigger)
//! a resume — the typical cause is a server restart that orphaned the job.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::store::{ChunkRow, Job, JobStatus};

/// How often the SSE stream re-reads the job.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1_500);
/// No counter movement for this long while processing ⇒ stale.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(180);

/// Per-chunk progress as exposed to the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    pub index: i64,
    pub status: crate::store::ChunkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One frame of the progress stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub total_chunks: i64,
    pub completed_chunks: i64,
    pub chunks: Vec<ChunkProgress>,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub failed_chunks: i64,
    pub started_at: String,
    pub updated_at: String,
    pub model: String,
    pub is_stale: bool,
    pub stale_duration_ms: u64,
    /// Present only in terminal snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stitched_output: Option<String>,
}

/// Tracks when the completion counter last moved.
pub struct StaleTracker {
    last_completed: i64,
    changed_at: Instant,
}

impl StaleTracker {
    pub fn new() -> Self {
        Self {
            last_completed: -1,
            changed_at: Instant::now(),
        }
    }

    /// Observe the current counter; returns how long it has been stuck.
    pub fn observe(&mut self, completed_chunks: i64, now: Instant) -> Duration {
        if completed_chunks != self.last_completed {
            self.last_completed = completed_chunks;
            self.changed_at = now;
        }
        now.duration_since(self.changed_at)
    }
}

impl Default for StaleTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Build one snapshot from a job row and its chunk list.
pub fn snapshot(job: &Job, chunks: &[ChunkRow], tracker: &mut StaleTracker) -> ProgressSnapshot {
    snapshot_at(job, chunks, tracker, Instant::now())
}

/// Like [`snapshot`] with an explicit clock, so staleness is testable.
pub fn snapshot_at(
    job: &Job,
    chunks: &[ChunkRow],
    tracker: &mut StaleTracker,
    now: Instant,
) -> ProgressSnapshot {
    let total_tokens: i64 = chunks.iter().map(|c| c.tokens).sum();
    let total_cost: f64 = chunks.iter().map(|c| c.cost).sum();
    let failed_chunks = chunks
        .iter()
        .filter(|c| c.status == crate::store::ChunkStatus::Failed)
        .count() as i64;

    let stuck_for = tracker.observe(job.completed_chunks, now);
    let is_stale = job.status == JobStatus::Processing
        && job.completed_chunks < job.total_chunks
        && stuck_for >= STALE_THRESHOLD;

    let terminal = job.status.is_terminal();

    ProgressSnapshot {
        id: job.id.clone(),
        status: job.status,
        total_chunks: job.total_chunks,
        completed_chunks: job.completed_chunks,
        chunks: chunks
            .iter()
            .map(|c| ChunkProgress {
                index: c.index,
                status: c.status,
                error: c.error.clone(),
            })
            .collect(),
        total_tokens,
        total_cost,
        failed_chunks,
        started_at: job.created_at.clone(),
        updated_at: job.updated_at.clone(),
        model: job.model_id.clone(),
        is_stale,
        stale_duration_ms: if is_stale { stuck_for.as_millis() as u64 } else { 0 },
        stitched_output: if terminal { job.stitched_output.clone() } else { None },
    }
}
