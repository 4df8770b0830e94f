//! SSE progress stream.
//!
//! A polling loop over the job store, not a database change feed: the
//! snapshot is tiny and ~1.5 s latency is plenty for a progress UI, and
//! polling keeps the publisher portable to any store. The stream closes
//! after a final `{"done":true}` frame (or an `{"error":…}` frame).

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_core::Stream;
use serde_json::json;
use tracing::debug;

use super::super::AppState;
use crate::publisher::{self, ProgressSnapshot, StaleTracker, POLL_INTERVAL};

/// `GET /chunk-process/:id/stream`
pub(crate) async fn stream_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut tracker = StaleTracker::new();
        debug!(job_id = %id, "progress stream opened");
        loop {
            match read_snapshot(&state, &id, &mut tracker) {
                Ok(Some(snapshot)) => {
                    let terminal = snapshot.status.is_terminal();
                    let data = serde_json::to_string(&snapshot)
                        .unwrap_or_else(|_| "{}".to_string());
                    yield Ok::<_, Infallible>(Event::default().data(data));
                    if terminal {
                        yield Ok(Event::default().data(json!({ "done": true }).to_string()));
                        break;
                    }
                }
                Ok(None) => {
                    yield Ok(Event::default().data(json!({ "error": "job not found" }).to_string()));
                    break;
                }
                Err(e) => {
                    yield Ok(Event::default().data(json!({ "error": format!("{e:#}") }).to_string()));
                    break;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        debug!(job_id = %id, "progress stream closed");
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn read_snapshot(
    state: &AppState,
    job_id: &str,
    tracker: &mut StaleTracker,
) -> anyhow::Result<Option<ProgressSnapshot>> {
    let Some(job) = state.store.job(job_id)? else {
        return Ok(None);
    };
    let chunks = state.store.chunks(job_id)?;
    Ok(Some(publisher::snapshot(&job, &chunks, tracker)))
}
