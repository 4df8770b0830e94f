//! Prompt construction for per-chunk processing.
//!
//! Each chunk becomes two messages: a system message fixing the model's
//! role and the chunk's position in the document, and a user message that
//! bookends the instruction around the text. The bookend matters: on very
//! long non-English bodies some providers drop early instructions from
//! attention, so the instruction is restated after the text.

use crate::models::ChatMessage;

/// Where this chunk sits inside the document.
fn position_hint(index: usize, total: usize) -> String {
    if total <= 1 {
        "the complete text".to_string()
    } else if index == 0 {
        format!(
            "the beginning of a longer document (section 1 of {total}); the text may end mid-sentence"
        )
    } else if index == total - 1 {
        format!(
            "the end of a longer document (section {total} of {total}); the text may start mid-sentence"
        )
    } else {
        format!(
            "section {} of {total} of a longer document; the text may start and end mid-sentence",
            index + 1
        )
    }
}

/// Build the message pair for one chunk.
pub fn chunk_messages(
    instruction: &str,
    chunk_text: &str,
    index: usize,
    total: usize,
) -> Vec<ChatMessage> {
    let system = format!(
        "You are a document processor. You are given {}.\n\
         Rules:\n\
         - Apply the instruction exactly as given.\n\
         - Do not add preambles, introductions, or closing remarks.\n\
         - Do not ask for more input; process exactly the text you are given.\n\
         - If the instruction is to translate, output only the target language; never echo the source language.\n\
         - Prefer direct quotation over paraphrase.\n\
         - Do not editorialize.",
        position_hint(index, total)
    );

    let user = format!(
        "INSTRUCTION:\n{instruction}\n\nTEXT:\n{chunk_text}\n\n\
         REMINDER: apply this instruction to the text above: {instruction}"
    );

    vec![
        ChatMessage::new("system", system),
        ChatMessage::new("user", user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_says_complete_text() {
        let msgs = chunk_messages("Uppercase", "hello", 0, 1);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "system");
        assert!(msgs[0].content.contains("the complete text"));
    }

    #[test]
    fn first_middle_last_hints_differ() {
        let first = chunk_messages("x", "t", 0, 5);
        let middle = chunk_messages("x", "t", 2, 5);
        let last = chunk_messages("x", "t", 4, 5);
        assert!(first[0].content.contains("beginning"));
        assert!(first[0].content.contains("section 1 of 5"));
        assert!(middle[0].content.contains("section 3 of 5"));
        assert!(middle[0].content.contains("start and end mid-sentence"));
        assert!(last[0].content.contains("the end of a longer document"));
    }

    #[test]
    fn user_message_bookends_instruction() {
        let msgs = chunk_messages("Translate to French", "Bonjour source", 1, 3);
        let user = &msgs[1];
        assert_eq!(user.role, "user");
        let first = user.content.find("Translate to French").unwrap();
        let last = user.content.rfind("Translate to French").unwrap();
        assert!(first < last, "instruction must appear before and after the text");
        let text_pos = user.content.find("Bonjour source").unwrap();
        assert!(first < text_pos && text_pos < last);
    }
}
