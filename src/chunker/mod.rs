//! Boundary-aware text segmentation with overlap.
//!
//! Splits a document into ordered chunks that each fit a token budget,
//! preferring natural boundaries (section headers, paragraphs, sentences)
//! over hard cuts so every chunk stays semantically coherent. Adjacent
//! chunks share a ~200-token overlap so sentences crossing a seam keep
//! enough context on both sides.
//!
//! All offsets are character offsets; slicing maps them back to byte
//! positions, so multi-byte scripts never split inside a code point.

use crate::tokens::{estimate_tokens, OVERLAP_RESERVE};

/// One contiguous slice of the input, sized for a single remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position within the job.
    pub index: usize,
    pub text: String,
}

/// Rule-line characters that mark a section divider (`===` / `---`).
const SECTION_MARKERS: [char; 2] = ['=', '-'];

/// Split `text` into ordered, overlapping chunks of at most
/// `max_chunk_tokens` estimated tokens each.
///
/// The estimator and the slicer share one chars/token ratio derived from
/// the actual text, so the character budget tracks the token budget for
/// whatever script the document is written in.
pub fn split(text: &str, max_chunk_tokens: usize) -> Vec<Chunk> {
    let total_tokens = estimate_tokens(text);
    if total_tokens <= max_chunk_tokens {
        return vec![Chunk {
            index: 0,
            text: text.to_string(),
        }];
    }

    let chars: Vec<char> = text.chars().collect();
    let char_len = chars.len();

    let chars_per_token = char_len as f64 / total_tokens.max(1) as f64;
    let max_chunk_chars = ((max_chunk_tokens as f64 * chars_per_token).floor() as usize).max(1);
    let overlap_chars = (OVERLAP_RESERVE as f64 * chars_per_token).floor() as usize;

    let mut chunks = Vec::new();
    let mut offset = 0usize;

    while offset < char_len {
        let tentative = (offset + max_chunk_chars).min(char_len);
        let end = if tentative < char_len {
            find_break(&chars, offset, tentative)
        } else {
            tentative
        };

        let slice: String = chars[offset..end].iter().collect();
        let trimmed = slice.trim();
        if !trimmed.is_empty() {
            chunks.push(Chunk {
                index: chunks.len(),
                text: trimmed.to_string(),
            });
        }

        if end >= char_len {
            break;
        }
        // The +1 guarantees forward progress when the overlap would swallow
        // the whole slice.
        offset = (end.saturating_sub(overlap_chars)).max(offset + 1);
    }

    chunks
}

/// Pick the best break position inside the window `[offset, end)`.
///
/// Boundary levels are tried highest-priority first, each searched
/// backward, and the first matching level wins. Only the last 30 % of the
/// window is searched so chunks never come out degenerately short.
/// Returns a position in `(offset, end]`; `end` itself is the hard cut.
fn find_break(chars: &[char], offset: usize, end: usize) -> usize {
    let window = end - offset;
    let search_start = offset + window * 7 / 10;

    // 1. Section/chapter divider: newline followed by a `#`-header or a
    //    `===` / `---` rule line.
    for i in (search_start..end).rev() {
        if chars[i] == '\n' && is_section_start(chars, i + 1) {
            return i + 1;
        }
    }

    // 2. Paragraph boundary.
    for i in (search_start..end).rev() {
        if chars[i] == '\n' && chars.get(i + 1) == Some(&'\n') {
            return i + 2;
        }
    }

    // 3. Single newline.
    for i in (search_start..end).rev() {
        if chars[i] == '\n' {
            return i + 1;
        }
    }

    // 4. Sentence terminator followed by whitespace.
    for i in (search_start..end).rev() {
        if matches!(chars[i], '.' | '!' | '?')
            && chars.get(i + 1).is_some_and(|c| c.is_whitespace())
        {
            return i + 1;
        }
    }

    // 5. Word boundary.
    for i in (search_start..end).rev() {
        if chars[i] == ' ' {
            return i + 1;
        }
    }

    // 6. Hard cut.
    end
}

/// Does the line beginning at `pos` look like a section divider?
///
/// Either a Markdown header (`#`, `##`, `###` plus whitespace) or a rule
/// line of at least three `=` / `-` characters.
fn is_section_start(chars: &[char], pos: usize) -> bool {
    let mut hashes = 0usize;
    let mut i = pos;
    while chars.get(i) == Some(&'#') && hashes < 4 {
        hashes += 1;
        i += 1;
    }
    if (1..=3).contains(&hashes) && chars.get(i).is_some_and(|c| c.is_whitespace()) {
        return true;
    }

    for marker in SECTION_MARKERS {
        if chars.get(pos) == Some(&marker)
            && chars.get(pos + 1) == Some(&marker)
            && chars.get(pos + 2) == Some(&marker)
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1000-token budget over pure ASCII gives a 4000-char window with an
    // 800-char overlap, and the boundary search covers [2800, 4000).
    const BUDGET: usize = 1_000;

    fn filler(len: usize) -> String {
        "a".repeat(len)
    }

    /// Insert `boundary` into a 12 000-char ASCII document at `pos`.
    fn doc_with(pos: usize, boundary: &str) -> String {
        let mut s = filler(12_000);
        s.replace_range(pos..pos + boundary.len(), boundary);
        s
    }

    #[test]
    fn small_input_is_single_untouched_chunk() {
        let text = "  short document  ";
        let chunks = split(text, BUDGET);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn breaks_at_section_divider() {
        let text = doc_with(3_500, "\n## Two ");
        let chunks = split(text.as_str(), BUDGET);
        // Break lands after the newline, before the header; the trailing
        // newline is trimmed off the emitted slice.
        assert_eq!(chunks[0].text.chars().count(), 3_500);
    }

    #[test]
    fn breaks_at_rule_line_divider() {
        let text = doc_with(3_500, "\n=== ");
        let chunks = split(text.as_str(), BUDGET);
        assert_eq!(chunks[0].text.chars().count(), 3_500);
    }

    #[test]
    fn breaks_at_paragraph() {
        let text = doc_with(3_500, "\n\n");
        let chunks = split(text.as_str(), BUDGET);
        assert_eq!(chunks[0].text.chars().count(), 3_500);
    }

    #[test]
    fn breaks_at_newline() {
        let text = doc_with(3_500, "\n");
        let chunks = split(text.as_str(), BUDGET);
        assert_eq!(chunks[0].text.chars().count(), 3_500);
    }

    #[test]
    fn breaks_after_sentence_terminator() {
        let text = doc_with(3_500, ". ");
        let chunks = split(text.as_str(), BUDGET);
        // The terminator stays with its sentence.
        assert!(chunks[0].text.ends_with('.'));
        assert_eq!(chunks[0].text.chars().count(), 3_501);
    }

    #[test]
    fn breaks_at_word_boundary() {
        let text = doc_with(3_500, " ");
        let chunks = split(text.as_str(), BUDGET);
        assert_eq!(chunks[0].text.chars().count(), 3_500);
    }

    #[test]
    fn hard_cut_without_any_boundary() {
        let text = filler(12_000);
        let chunks = split(text.as_str(), BUDGET);
        assert_eq!(chunks[0].text.chars().count(), 4_000);
    }

    #[test]
    fn divider_outranks_closer_lower_priority_boundaries() {
        // Section divider early in the search region, paragraph and space
        // much closer to the window's end. Priority beats proximity.
        let mut text = filler(12_000);
        text.replace_range(2_900..2_908, "\n# Head ");
        text.replace_range(3_600..3_602, "\n\n");
        text.replace_range(3_900..3_901, " ");
        let chunks = split(text.as_str(), BUDGET);
        assert_eq!(chunks[0].text.chars().count(), 2_900);
    }

    #[test]
    fn boundary_outside_search_region_is_ignored() {
        // A paragraph break in the first 70 % of the window must not win
        // over the hard cut.
        let text = doc_with(1_000, "\n\n");
        let chunks = split(text.as_str(), BUDGET);
        assert_eq!(chunks[0].text.chars().count(), 4_000);
    }

    #[test]
    fn consecutive_chunks_overlap() {
        // Unique word stream so substring matches are not coincidental.
        let text: String = (0..3_000).map(|i| format!("w{i} ")).collect();
        let chunks = split(text.as_str(), BUDGET);
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let head: String = pair[1].text.chars().take(50).collect();
            assert!(
                pair[0].text.contains(head.trim()),
                "chunk {} does not carry overlap into chunk {}",
                pair[0].index,
                pair[1].index
            );
        }
    }

    #[test]
    fn every_word_survives_chunking() {
        let text: String = (0..3_000).map(|i| format!("w{i} ")).collect();
        let chunks = split(text.as_str(), BUDGET);
        let joined: String = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for i in 0..3_000 {
            let needle = format!("w{i} ");
            assert!(
                joined.contains(needle.trim()),
                "word w{i} lost during chunking"
            );
        }
    }

    #[test]
    fn indices_are_contiguous_from_zero() {
        let text = filler(30_000);
        let chunks = split(text.as_str(), BUDGET);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn devanagari_chunk_count_tracks_budget() {
        // 60 000 dense chars ≈ 40 000 tokens; a 4 000-token budget advances
        // ~5 700 chars per chunk → about ten chunks.
        let text = "न".repeat(60_000);
        let chunks = split(text.as_str(), 4_000);
        assert!(
            (9..=12).contains(&chunks.len()),
            "expected ~10 chunks, got {}",
            chunks.len()
        );
        for c in &chunks {
            assert!(estimate_tokens(&c.text) <= 4_000 + 1);
        }
    }

    #[test]
    fn terminates_when_overlap_exceeds_slice() {
        // Overlap (800 chars) larger than what a tiny budget can slice:
        // the +1 advance must still drive the loop to completion.
        let text = filler(9_000);
        let chunks = split(text.as_str(), 100);
        assert!(!chunks.is_empty());
        assert!(chunks.len() < 9_000);
    }
}
