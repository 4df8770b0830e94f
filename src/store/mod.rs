//! Durable job state — SQLite.
//!
//! Every mutation is a narrow, idempotent update so that replaying a write
//! converges instead of corrupting state. The completed-chunk counter is
//! always advanced server-side (`completed_chunks = completed_chunks + 1`),
//! never read-modify-write, so up to five workers can finish concurrently
//! without losing increments. The terminal `(status, stitched_output)`
//! write is a single statement, so no reader ever observes a completed job
//! without its output.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle of a big-context job.
///
/// `pending → processing → (stitching →)? completed | failed`, with
/// `cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Stitching,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Stitching => "stitching",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "stitching" => JobStatus::Stitching,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Lifecycle of one chunk of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ChunkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Processing => "processing",
            ChunkStatus::Completed => "completed",
            ChunkStatus::Failed => "failed",
            ChunkStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => ChunkStatus::Pending,
            "processing" => ChunkStatus::Processing,
            "completed" => ChunkStatus::Completed,
            "failed" => ChunkStatus::Failed,
            "cancelled" => ChunkStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChunkStatus::Completed | ChunkStatus::Failed | ChunkStatus::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One big-context request.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub chat_id: String,
    pub status: JobStatus,
    pub total_chunks: i64,
    pub completed_chunks: i64,
    pub instruction: String,
    pub model_id: String,
    pub enable_stitch_pass: bool,
    pub stitched_output: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One unit of work within a job.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: String,
    pub job_id: String,
    pub index: i64,
    pub input_text: String,
    pub output_text: Option<String>,
    pub status: ChunkStatus,
    pub error: Option<String>,
    pub tokens: i64,
    pub cost: f64,
}

/// A chat message row (only what the engine reads/writes).
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub job_id: Option<String>,
    pub role: String,
    pub content: String,
    pub summary: Option<String>,
    pub created_at: String,
}

/// Token/cost usage recorded per remote call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost: f64,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn bad_status(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown status {value:?}").into(),
    )
}

// ---------------------------------------------------------------------------
// JobStore
// ---------------------------------------------------------------------------

/// SQLite-backed store for jobs, chunks, chat messages, and call telemetry.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open (or create) the database at `db_path`.
    pub fn open_path(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chats (
                id         TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS jobs (
                id               TEXT PRIMARY KEY,
                chat_id          TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                status           TEXT NOT NULL,
                total_chunks     INTEGER NOT NULL,
                completed_chunks INTEGER NOT NULL DEFAULT 0,
                instruction      TEXT NOT NULL,
                model_id         TEXT NOT NULL,
                enable_stitch    INTEGER NOT NULL DEFAULT 0,
                stitched_output  TEXT,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_chat ON jobs(chat_id, status);
            CREATE TABLE IF NOT EXISTS chunks (
                id          TEXT PRIMARY KEY,
                job_id      TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                idx         INTEGER NOT NULL,
                input_text  TEXT NOT NULL,
                output_text TEXT,
                status      TEXT NOT NULL DEFAULT 'pending',
                error       TEXT,
                tokens      INTEGER NOT NULL DEFAULT 0,
                cost        REAL NOT NULL DEFAULT 0,
                UNIQUE(job_id, idx)
            );
            CREATE TABLE IF NOT EXISTS messages (
                id         TEXT PRIMARY KEY,
                chat_id    TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                job_id     TEXT,
                role       TEXT NOT NULL,
                content    TEXT NOT NULL,
                summary    TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);
            CREATE TABLE IF NOT EXISTS api_calls (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id            TEXT,
                purpose           TEXT NOT NULL,
                model_id          TEXT NOT NULL,
                prompt_tokens     INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                total_tokens      INTEGER NOT NULL DEFAULT 0,
                cost              REAL NOT NULL DEFAULT 0,
                created_at        TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    // -- chats ---------------------------------------------------------------

    /// Create the chat row if it does not exist yet. The chat UI owns chats;
    /// the engine only needs the FK parent to be present.
    pub fn ensure_chat(&self, chat_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("job store poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO chats (id, created_at) VALUES (?1, ?2)",
            params![chat_id, now()],
        )?;
        Ok(())
    }

    // -- job creation --------------------------------------------------------

    /// Insert a job together with all of its chunk rows in one transaction.
    ///
    /// The job starts out `processing`, the chunks `pending`.
    pub fn create_job(
        &self,
        chat_id: &str,
        instruction: &str,
        model_id: &str,
        enable_stitch_pass: bool,
        chunk_texts: &[String],
    ) -> anyhow::Result<Job> {
        let mut conn = self.conn.lock().expect("job store poisoned");
        let tx = conn.transaction()?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let ts = now();
        tx.execute(
            "INSERT INTO jobs (id, chat_id, status, total_chunks, completed_chunks,
                               instruction, model_id, enable_stitch, created_at, updated_at)
             VALUES (?1, ?2, 'processing', ?3, 0, ?4, ?5, ?6, ?7, ?7)",
            params![
                job_id,
                chat_id,
                chunk_texts.len() as i64,
                instruction,
                model_id,
                enable_stitch_pass as i64,
                ts
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, job_id, idx, input_text, status)
                 VALUES (?1, ?2, ?3, ?4, 'pending')",
            )?;
            for (i, text) in chunk_texts.iter().enumerate() {
                stmt.execute(params![
                    uuid::Uuid::new_v4().to_string(),
                    job_id,
                    i as i64,
                    text
                ])?;
            }
        }
        tx.commit()?;

        Ok(Job {
            id: job_id,
            chat_id: chat_id.to_string(),
            status: JobStatus::Processing,
            total_chunks: chunk_texts.len() as i64,
            completed_chunks: 0,
            instruction: instruction.to_string(),
            model_id: model_id.to_string(),
            enable_stitch_pass,
            stitched_output: None,
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    // -- job reads -----------------------------------------------------------

    pub fn job(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
        let conn = self.conn.lock().expect("job store poisoned");
        let job = conn
            .query_row(
                "SELECT id, chat_id, status, total_chunks, completed_chunks, instruction,
                        model_id, enable_stitch, stitched_output, created_at, updated_at
                 FROM jobs WHERE id = ?1",
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// All chunks of a job, in index order.
    pub fn chunks(&self, job_id: &str) -> anyhow::Result<Vec<ChunkRow>> {
        let conn = self.conn.lock().expect("job store poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, job_id, idx, input_text, output_text, status, error, tokens, cost
             FROM chunks WHERE job_id = ?1 ORDER BY idx",
        )?;
        let rows = stmt.query_map(params![job_id], chunk_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Indices of chunks still waiting to run, in order.
    pub fn pending_chunk_indices(&self, job_id: &str) -> anyhow::Result<Vec<usize>> {
        let conn = self.conn.lock().expect("job store poisoned");
        let mut stmt = conn.prepare(
            "SELECT idx FROM chunks WHERE job_id = ?1 AND status = 'pending' ORDER BY idx",
        )?;
        let rows = stmt.query_map(params![job_id], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r? as usize);
        }
        Ok(out)
    }

    /// Most recent non-terminal job for a chat, if any.
    pub fn active_job_for_chat(&self, chat_id: &str) -> anyhow::Result<Option<Job>> {
        let conn = self.conn.lock().expect("job store poisoned");
        let job = conn
            .query_row(
                "SELECT id, chat_id, status, total_chunks, completed_chunks, instruction,
                        model_id, enable_stitch, stitched_output, created_at, updated_at
                 FROM jobs
                 WHERE chat_id = ?1 AND status IN ('pending', 'processing', 'stitching')
                 ORDER BY created_at DESC LIMIT 1",
                params![chat_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Most recent job for a chat regardless of status.
    pub fn latest_job_for_chat(&self, chat_id: &str) -> anyhow::Result<Option<Job>> {
        let conn = self.conn.lock().expect("job store poisoned");
        let job = conn
            .query_row(
                "SELECT id, chat_id, status, total_chunks, completed_chunks, instruction,
                        model_id, enable_stitch, stitched_output, created_at, updated_at
                 FROM jobs WHERE chat_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![chat_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    // -- job status ----------------------------------------------------------

    /// Move a job to `status`. Never resurrects a cancelled job.
    ///
    /// Returns `false` when the job does not exist or was cancelled.
    pub fn set_job_status(&self, job_id: &str, status: JobStatus) -> anyhow::Result<bool> {
        let conn = self.conn.lock().expect("job store poisoned");
        let n = conn.execute(
            "UPDATE jobs SET status = ?2, updated_at = ?3
             WHERE id = ?1 AND status != 'cancelled'",
            params![job_id, status.as_str(), now()],
        )?;
        Ok(n > 0)
    }

    /// Cancel a job and all of its not-yet-terminal chunks.
    pub fn cancel_job(&self, job_id: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.lock().expect("job store poisoned");
        let tx = conn.transaction()?;
        let n = tx.execute(
            "UPDATE jobs SET status = 'cancelled', updated_at = ?2
             WHERE id = ?1 AND status IN ('pending', 'processing', 'stitching')",
            params![job_id, now()],
        )?;
        if n > 0 {
            tx.execute(
                "UPDATE chunks SET status = 'cancelled'
                 WHERE job_id = ?1 AND status IN ('pending', 'processing')",
                params![job_id],
            )?;
        }
        tx.commit()?;
        Ok(n > 0)
    }

    /// Terminal write: status and stitched output land together, so a reader
    /// can never observe `completed` with a NULL output.
    ///
    /// A cancelled job is left untouched.
    pub fn finish_job(
        &self,
        job_id: &str,
        status: JobStatus,
        stitched_output: Option<&str>,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().expect("job store poisoned");
        let n = conn.execute(
            "UPDATE jobs SET status = ?2, stitched_output = ?3, updated_at = ?4
             WHERE id = ?1 AND status != 'cancelled'",
            params![job_id, status.as_str(), stitched_output, now()],
        )?;
        Ok(n > 0)
    }

    // -- chunk transitions ---------------------------------------------------

    pub fn mark_chunk_processing(&self, job_id: &str, index: usize) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("job store poisoned");
        conn.execute(
            "UPDATE chunks SET status = 'processing' WHERE job_id = ?1 AND idx = ?2",
            params![job_id, index as i64],
        )?;
        conn.execute(
            "UPDATE jobs SET updated_at = ?2 WHERE id = ?1",
            params![job_id, now()],
        )?;
        Ok(())
    }

    /// Record a successful chunk and bump the job's completion counter.
    ///
    /// The counter update is a server-side `+ 1`, never read-modify-write,
    /// and is skipped when the chunk was already completed so a replay
    /// converges instead of double-counting.
    pub fn complete_chunk(
        &self,
        job_id: &str,
        index: usize,
        output: &str,
        tokens: i64,
        cost: f64,
    ) -> anyhow::Result<()> {
        self.settle_chunk(job_id, index, ChunkStatus::Completed, Some(output), None, tokens, cost)
    }

    /// Record a terminal chunk failure. Still bumps the completion counter
    /// so progress accounting reaches `total_chunks`.
    pub fn fail_chunk(&self, job_id: &str, index: usize, error: &str) -> anyhow::Result<()> {
        self.settle_chunk(job_id, index, ChunkStatus::Failed, None, Some(error), 0, 0.0)
    }

    fn settle_chunk(
        &self,
        job_id: &str,
        index: usize,
        status: ChunkStatus,
        output: Option<&str>,
        error: Option<&str>,
        tokens: i64,
        cost: f64,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().expect("job store poisoned");
        let tx = conn.transaction()?;

        let prior: Option<String> = tx
            .query_row(
                "SELECT status FROM chunks WHERE job_id = ?1 AND idx = ?2",
                params![job_id, index as i64],
                |row| row.get(0),
            )
            .optional()?;
        let Some(prior) = prior else {
            anyhow::bail!("chunk {index} of job {job_id} not found");
        };

        tx.execute(
            "UPDATE chunks SET status = ?3, output_text = ?4, error = ?5, tokens = ?6, cost = ?7
             WHERE job_id = ?1 AND idx = ?2",
            params![
                job_id,
                index as i64,
                status.as_str(),
                output,
                error,
                tokens,
                cost
            ],
        )?;

        // Replays of the same settlement must not double-count.
        let already_counted = prior == "completed" || prior == "failed";
        if already_counted {
            tx.execute(
                "UPDATE jobs SET updated_at = ?2 WHERE id = ?1",
                params![job_id, now()],
            )?;
        } else {
            tx.execute(
                "UPDATE jobs SET completed_chunks = completed_chunks + 1, updated_at = ?2
                 WHERE id = ?1",
                params![job_id, now()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // -- retry / resume resets -----------------------------------------------

    /// Reset every failed chunk back to `pending`, clearing its output and
    /// error, and walk the job's counter back by the number reset.
    ///
    /// Returns the reset chunk indices, in order — exactly the set the
    /// scheduler should be re-invoked on. Empty makes the call a no-op.
    pub fn reset_failed_chunks(&self, job_id: &str) -> anyhow::Result<Vec<usize>> {
        let mut conn = self.conn.lock().expect("job store poisoned");
        let tx = conn.transaction()?;

        let mut indices = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT idx FROM chunks WHERE job_id = ?1 AND status = 'failed' ORDER BY idx",
            )?;
            let rows = stmt.query_map(params![job_id], |row| row.get::<_, i64>(0))?;
            for r in rows {
                indices.push(r? as usize);
            }
        }

        if !indices.is_empty() {
            tx.execute(
                "UPDATE chunks
                 SET status = 'pending', output_text = NULL, error = NULL, tokens = 0, cost = 0
                 WHERE job_id = ?1 AND status = 'failed'",
                params![job_id],
            )?;
            tx.execute(
                "UPDATE jobs SET completed_chunks = completed_chunks - ?2, updated_at = ?3
                 WHERE id = ?1",
                params![job_id, indices.len() as i64, now()],
            )?;
        }
        tx.commit()?;
        Ok(indices)
    }

    /// Reset chunks that were mid-flight when their process died.
    pub fn reset_processing_chunks(&self, job_id: &str) -> anyhow::Result<usize> {
        let conn = self.conn.lock().expect("job store poisoned");
        let n = conn.execute(
            "UPDATE chunks SET status = 'pending', output_text = NULL, error = NULL
             WHERE job_id = ?1 AND status = 'processing'",
            params![job_id],
        )?;
        Ok(n)
    }

    /// Recompute `completed_chunks` from the chunk rows themselves.
    /// Failed chunks count: the counter tracks *settled* work, not successes.
    pub fn recount_completed(&self, job_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("job store poisoned");
        conn.execute(
            "UPDATE jobs
             SET completed_chunks = (
                 SELECT COUNT(*) FROM chunks
                 WHERE job_id = ?1 AND status IN ('completed', 'failed')
             ),
             updated_at = ?2
             WHERE id = ?1",
            params![job_id, now()],
        )?;
        Ok(())
    }

    // -- messages ------------------------------------------------------------

    /// Append a chat message. Assistant messages produced by a job carry the
    /// job id so finalization can stay idempotent across resumes.
    pub fn insert_message(
        &self,
        chat_id: &str,
        job_id: Option<&str>,
        role: &str,
        content: &str,
        summary: Option<&str>,
    ) -> anyhow::Result<String> {
        let conn = self.conn.lock().expect("job store poisoned");
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO messages (id, chat_id, job_id, role, content, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, chat_id, job_id, role, content, summary, now()],
        )?;
        Ok(id)
    }

    /// Has finalization already produced the assistant message for this job?
    pub fn job_message_exists(&self, job_id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().expect("job store poisoned");
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE job_id = ?1 AND role = 'assistant'",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// All messages of a chat, oldest first.
    pub fn messages_for_chat(&self, chat_id: &str) -> anyhow::Result<Vec<MessageRow>> {
        let conn = self.conn.lock().expect("job store poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, job_id, role, content, summary, created_at
             FROM messages WHERE chat_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![chat_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                job_id: row.get(2)?,
                role: row.get(3)?,
                content: row.get(4)?,
                summary: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // -- telemetry -----------------------------------------------------------

    /// Record usage/cost for one remote call.
    pub fn record_api_call(
        &self,
        job_id: Option<&str>,
        purpose: &str,
        model_id: &str,
        usage: CallUsage,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("job store poisoned");
        conn.execute(
            "INSERT INTO api_calls (job_id, purpose, model_id, prompt_tokens,
                                    completion_tokens, total_tokens, cost, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job_id,
                purpose,
                model_id,
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
                usage.cost,
                now()
            ],
        )?;
        Ok(())
    }
}

fn job_from_row(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let status: String = row.get(2)?;
    Ok(Job {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        status: JobStatus::parse(&status).ok_or_else(|| bad_status(2, &status))?,
        total_chunks: row.get(3)?,
        completed_chunks: row.get(4)?,
        instruction: row.get(5)?,
        model_id: row.get(6)?,
        enable_stitch_pass: row.get::<_, i64>(7)? != 0,
        stitched_output: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn chunk_from_row(row: &rusqlite::Row) -> rusqlite::Result<ChunkRow> {
    let status: String = row.get(5)?;
    Ok(ChunkRow {
        id: row.get(0)?,
        job_id: row.get(1)?,
        index: row.get(2)?,
        input_text: row.get(3)?,
        output_text: row.get(4)?,
        status: ChunkStatus::parse(&status).ok_or_else(|| bad_status(5, &status))?,
        error: row.get(6)?,
        tokens: row.get(7)?,
        cost: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_job(chunks: &[&str]) -> (JobStore, Job) {
        let store = JobStore::open_in_memory().unwrap();
        store.ensure_chat("chat-1").unwrap();
        let texts: Vec<String> = chunks.iter().map(|s| s.to_string()).collect();
        let job = store
            .create_job("chat-1", "Summarize", "test/model", false, &texts)
            .unwrap();
        (store, job)
    }

    #[test]
    fn create_job_inserts_ordered_pending_chunks() {
        let (store, job) = store_with_job(&["one", "two", "three"]);
        assert_eq!(job.total_chunks, 3);
        let chunks = store.chunks(&job.id).unwrap();
        assert_eq!(chunks.len(), 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as i64);
            assert_eq!(c.status, ChunkStatus::Pending);
            assert!(c.output_text.is_none());
        }
    }

    #[test]
    fn complete_chunk_increments_counter_once() {
        let (store, job) = store_with_job(&["one", "two"]);
        store.complete_chunk(&job.id, 0, "OUT", 10, 0.01).unwrap();
        assert_eq!(store.job(&job.id).unwrap().unwrap().completed_chunks, 1);

        // Replaying the same settlement converges without double-counting.
        store.complete_chunk(&job.id, 0, "OUT", 10, 0.01).unwrap();
        assert_eq!(store.job(&job.id).unwrap().unwrap().completed_chunks, 1);
    }

    #[test]
    fn failed_chunks_count_toward_completion() {
        let (store, job) = store_with_job(&["one", "two"]);
        store.complete_chunk(&job.id, 0, "OUT", 10, 0.0).unwrap();
        store.fail_chunk(&job.id, 1, "boom").unwrap();
        let job = store.job(&job.id).unwrap().unwrap();
        assert_eq!(job.completed_chunks, job.total_chunks);
    }

    #[test]
    fn finish_job_writes_status_and_output_together() {
        let (store, job) = store_with_job(&["one"]);
        assert!(store
            .finish_job(&job.id, JobStatus::Completed, Some("done"))
            .unwrap());
        let job = store.job(&job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.stitched_output.as_deref(), Some("done"));
    }

    #[test]
    fn cancel_is_sticky() {
        let (store, job) = store_with_job(&["one", "two"]);
        assert!(store.cancel_job(&job.id).unwrap());
        // Neither a status change nor a finish can resurrect it.
        assert!(!store.set_job_status(&job.id, JobStatus::Processing).unwrap());
        assert!(!store
            .finish_job(&job.id, JobStatus::Completed, Some("x"))
            .unwrap());
        let job = store.job(&job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        for c in store.chunks(&job.id).unwrap() {
            assert_eq!(c.status, ChunkStatus::Cancelled);
        }
    }

    #[test]
    fn reset_failed_chunks_walks_counter_back() {
        let (store, job) = store_with_job(&["a", "b", "c"]);
        store.complete_chunk(&job.id, 0, "A", 1, 0.0).unwrap();
        store.fail_chunk(&job.id, 1, "rate limited").unwrap();
        store.fail_chunk(&job.id, 2, "rate limited").unwrap();

        let reset = store.reset_failed_chunks(&job.id).unwrap();
        assert_eq!(reset, vec![1, 2]);
        let job2 = store.job(&job.id).unwrap().unwrap();
        assert_eq!(job2.completed_chunks, 1);
        assert_eq!(store.pending_chunk_indices(&job.id).unwrap(), vec![1, 2]);

        // Second reset with nothing failed is a no-op.
        assert!(store.reset_failed_chunks(&job.id).unwrap().is_empty());
        assert_eq!(
            store.job(&job.id).unwrap().unwrap().completed_chunks,
            1
        );
    }

    #[test]
    fn recount_completed_rebuilds_from_rows() {
        let (store, job) = store_with_job(&["a", "b", "c", "d"]);
        store.complete_chunk(&job.id, 0, "A", 1, 0.0).unwrap();
        store.fail_chunk(&job.id, 1, "x").unwrap();
        store.mark_chunk_processing(&job.id, 2).unwrap();
        // Simulate a crash: chunk 2 stuck in processing, counter drifted.
        store.reset_processing_chunks(&job.id).unwrap();
        store.recount_completed(&job.id).unwrap();
        let job2 = store.job(&job.id).unwrap().unwrap();
        assert_eq!(job2.completed_chunks, 2);
        assert_eq!(store.pending_chunk_indices(&job.id).unwrap(), vec![2, 3]);
    }

    #[test]
    fn job_message_guard_detects_existing_assistant_message() {
        let (store, job) = store_with_job(&["a"]);
        assert!(!store.job_message_exists(&job.id).unwrap());
        store
            .insert_message("chat-1", Some(&job.id), "assistant", "result", None)
            .unwrap();
        assert!(store.job_message_exists(&job.id).unwrap());
        // User-facing notices do not trip the guard.
        let (store2, job2) = {
            let s = JobStore::open_in_memory().unwrap();
            s.ensure_chat("c").unwrap();
            let j = s.create_job("c", "i", "m", false, &["x".into()]).unwrap();
            (s, j)
        };
        store2
            .insert_message("c", Some(&job2.id), "user", "job started", None)
            .unwrap();
        assert!(!store2.job_message_exists(&job2.id).unwrap());
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("jobs.db");

        let job_id = {
            let store = JobStore::open_path(&db_path).unwrap();
            store.ensure_chat("chat-p").unwrap();
            let job = store
                .create_job("chat-p", "Summarize", "m", true, &["a".into(), "b".into()])
                .unwrap();
            store.complete_chunk(&job.id, 0, "OUT-A", 7, 0.002).unwrap();
            store.mark_chunk_processing(&job.id, 1).unwrap();
            job.id
        };

        // A fresh process sees exactly what was persisted — this is what
        // makes resume after a crash possible.
        let store = JobStore::open_path(&db_path).unwrap();
        let job = store.job(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.completed_chunks, 1);
        assert!(job.enable_stitch_pass);
        let chunks = store.chunks(&job_id).unwrap();
        assert_eq!(chunks[0].status, ChunkStatus::Completed);
        assert_eq!(chunks[0].output_text.as_deref(), Some("OUT-A"));
        assert_eq!(chunks[1].status, ChunkStatus::Processing);
    }

    #[test]
    fn active_job_ignores_terminal_jobs() {
        let (store, job) = store_with_job(&["a"]);
        assert_eq!(
            store.active_job_for_chat("chat-1").unwrap().unwrap().id,
            job.id
        );
        store.finish_job(&job.id, JobStatus::Completed, Some("")).unwrap();
        assert!(store.active_job_for_chat("chat-1").unwrap().is_none());
        assert_eq!(
            store.latest_job_for_chat("chat-1").unwrap().unwrap().id,
            job.id
        );
    }
}
