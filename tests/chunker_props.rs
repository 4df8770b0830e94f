//! Chunker properties across scripts: full coverage, strict termination,
//! and token-level overlap on dense non-Latin text.

use chunkmill::chunker;
use chunkmill::tokens::estimate_tokens;

#[test]
fn ascii_prose_is_fully_covered() {
    // Numbered sentences so every piece of content is identifiable.
    let text: String = (0..2_000)
        .map(|i| format!("Sentence number {i} ends here. "))
        .collect();
    let chunks = chunker::split(&text, 1_000);
    assert!(chunks.len() > 1);

    let joined: String = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    for i in (0..2_000).step_by(97) {
        let marker = format!("Sentence number {i} ends here.");
        assert!(joined.contains(&marker), "lost: {marker}");
    }
}

#[test]
fn mixed_script_document_terminates_and_covers() {
    // Alternating ASCII and Devanagari paragraphs stress the adaptive
    // chars-per-token ratio.
    let mut text = String::new();
    for i in 0..200 {
        if i % 2 == 0 {
            text.push_str(&format!("Paragraph {i} in plain English text goes on a while.\n\n"));
        } else {
            text.push_str(&format!("खण्ड {i} की सामग्री यहाँ है और आगे बढ़ती है।\n\n"));
        }
    }
    let chunks = chunker::split(&text, 2_000);
    assert!(!chunks.is_empty());
    for c in &chunks {
        // Budget respected with slack for the boundary search.
        assert!(estimate_tokens(&c.text) <= 2_100, "chunk {} too big", c.index);
    }
    let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
    assert!(joined.contains("Paragraph 0 "));
    assert!(joined.contains("खण्ड 199"));
}

#[test]
fn dense_script_chunks_overlap_by_roughly_two_hundred_tokens() {
    // 60 000 Devanagari chars at 1.5 chars/token ≈ 40 000 tokens; a 4 000
    // token budget yields ~10 chunks overlapping by ~200 tokens each.
    let text: String = (0..6_000)
        .map(|i| format!("शब्द{i} ", i = i % 100))
        .collect();
    let budget = 800;
    let chunks = chunker::split(&text, budget);
    assert!(chunks.len() >= 3, "got {}", chunks.len());

    for pair in chunks.windows(2) {
        // The head of the next chunk must be carried at the tail of the
        // previous one.
        let head: String = pair[1].text.chars().take(30).collect();
        assert!(
            pair[0].text.contains(head.trim()),
            "no overlap between chunks {} and {}",
            pair[0].index,
            pair[1].index
        );
    }
}

#[test]
fn pathological_inputs_terminate() {
    // No whitespace, no boundaries, tiny budget: hard cuts all the way.
    let text = "x".repeat(50_000);
    let chunks = chunker::split(&text, 2_000);
    assert!(chunks.len() < 50_000);
    // Single characters and empty-ish inputs are a single chunk.
    assert_eq!(chunker::split("a", 2_000).len(), 1);
    assert_eq!(chunker::split("   ", 2_000).len(), 1);
}
