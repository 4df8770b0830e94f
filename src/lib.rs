//! chunkmill — big-context document processing engine.
//!
//! Splits oversized documents into overlapping chunks, fans them out to a
//! chat-completion provider under a concurrency cap, and stitches the
//! per-chunk outputs back into a single artifact. All state lives in
//! SQLite so jobs survive client disconnects and server restarts.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod chunker;
pub mod config;
pub mod gateway;
pub mod models;
pub mod publisher;
pub mod scheduler;
pub mod stitcher;
pub mod store;
pub mod tokens;

/// Return the chunkmill home directory.
///
/// Resolution order:
/// 1. `CHUNKMILL_HOME` environment variable
/// 2. `$HOME/.chunkmill`
pub fn chunkmill_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("CHUNKMILL_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".chunkmill")
    }
}
