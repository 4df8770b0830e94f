//! Token estimation and chunk-budget sizing.
//!
//! The estimator is a deliberate two-class heuristic rather than a real BPE:
//! ASCII code points count at 4 chars/token, everything above U+007F at
//! 1.5 chars/token. Non-Latin scripts tokenize roughly 2–3× denser than
//! English, and a naive `len/4` estimator undersizes chunks enough to blow
//! the model's output limit on translation-style tasks.
//!
//! The same estimator feeds the chunker's chars-per-token ratio, so the
//! planner and the slicer never disagree about how big a chunk is.

/// Tokens reserved for the fixed system prompt wrapped around every chunk.
pub const SYSTEM_PROMPT_RESERVE: usize = 500;
/// Tokens reserved for position metadata ("section k of N" framing).
pub const METADATA_RESERVE: usize = 100;
/// Tokens reserved for the overlap carried in from the previous chunk.
pub const OVERLAP_RESERVE: usize = 200;
/// Minimum chunk budget. Guarantees forward progress on small-window models.
pub const MIN_CHUNK_TOKENS: usize = 2_000;

/// Estimate the token count of `text`.
///
/// `ceil(ascii_chars / 4 + non_ascii_chars / 1.5)`. Pure and deterministic.
pub fn estimate_tokens(text: &str) -> usize {
    let mut ascii = 0usize;
    let mut non_ascii = 0usize;
    for c in text.chars() {
        if (c as u32) <= 127 {
            ascii += 1;
        } else {
            non_ascii += 1;
        }
    }
    (ascii as f64 / 4.0 + non_ascii as f64 / 1.5).ceil() as usize
}

/// Compute the maximum safe token budget for one chunk.
///
/// Two ceilings, take the lower, never go below [`MIN_CHUNK_TOKENS`]:
///
/// - **Context-based**: 40 % of the model window minus the reserves and the
///   instruction. The other 60 % stays free for the model's reply — on
///   translation-shaped tasks output is comparable in size to input.
/// - **Output-based**: 90 % of the model's max output tokens, when known.
pub fn max_chunk_tokens(
    context_length: usize,
    instruction_tokens: usize,
    max_output_tokens: Option<usize>,
) -> usize {
    let context_limit = 0.40 * context_length as f64
        - SYSTEM_PROMPT_RESERVE as f64
        - instruction_tokens as f64
        - METADATA_RESERVE as f64
        - OVERLAP_RESERVE as f64;

    let output_limit = match max_output_tokens {
        Some(max) => (0.9 * max as f64).floor(),
        None => f64::INFINITY,
    };

    let limit = context_limit.min(output_limit).floor();
    (limit.max(0.0) as usize).max(MIN_CHUNK_TOKENS)
}
