//! Assembly of per-chunk outputs.
//!
//! Two paths: safe concatenation (always lossless) or one remote
//! "seam-smoothing" call. The remote pass is suppressed whenever the
//! combined outputs could not fit in a single reply — a stitch pass that
//! cannot emit the full text in one completion will truncate it, and
//! losing content is worse than visible seams.

use tracing::{info, warn};

use crate::models::{ChatMessage, CompletionClient, ModelLimits};
use crate::store::{CallUsage, JobStore};
use crate::tokens::estimate_tokens;

/// Literal marker between chunk outputs in the stitch prompt.
pub const BOUNDARY_MARKER: &str = "\n\n---CHUNK BOUNDARY---\n\n";

/// Share of the effective output window the combined outputs may occupy
/// before the remote pass is skipped.
const STITCH_FIT_RATIO: f64 = 0.9;

/// Assemble `outputs` into the final artifact.
///
/// Callers gate on the job's stitch opt-in; this function additionally
/// refuses to stitch remotely when the result could not fit one reply,
/// returning the plain `"\n\n"` join instead. A failed remote pass also
/// falls back to the join — the stitch is an enhancement, never a
/// requirement.
pub async fn stitch(
    store: &JobStore,
    client: &dyn CompletionClient,
    job_id: &str,
    instruction: &str,
    model_id: &str,
    limits: ModelLimits,
    outputs: &[String],
) -> anyhow::Result<String> {
    match outputs {
        [] => return Ok(String::new()),
        [only] => return Ok(only.clone()),
        _ => {}
    }

    let total_output_tokens: usize = outputs.iter().map(|o| estimate_tokens(o)).sum();
    let effective_max_output = limits
        .max_output_tokens
        .unwrap_or(limits.context_length / 2);

    if total_output_tokens as f64 > STITCH_FIT_RATIO * effective_max_output as f64 {
        info!(
            job_id = %job_id,
            total_output_tokens,
            effective_max_output,
            "outputs too large for a single reply, concatenating instead of stitching"
        );
        store.record_api_call(Some(job_id), "stitch_skipped", model_id, CallUsage::default())?;
        return Ok(outputs.join("\n\n"));
    }

    let messages = stitch_messages(instruction, outputs);
    let max_tokens = limits.max_output_tokens.map(|v| v as u32);
    match client.complete(model_id, &messages, max_tokens).await {
        Ok(completion) => {
            store.record_api_call(
                Some(job_id),
                "stitch",
                model_id,
                CallUsage {
                    prompt_tokens: completion.usage.prompt_tokens as i64,
                    completion_tokens: completion.usage.completion_tokens as i64,
                    total_tokens: completion.usage.total_tokens as i64,
                    cost: completion.usage.cost,
                },
            )?;
            info!(job_id = %job_id, "stitch pass completed");
            Ok(completion.content)
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "stitch pass failed, falling back to concatenation");
            Ok(outputs.join("\n\n"))
        }
    }
}

/// Build the seam-smoothing prompt.
fn stitch_messages(instruction: &str, outputs: &[String]) -> Vec<ChatMessage> {
    let system = format!(
        "You are merging the outputs of a document that was processed in sections.\n\
         The original instruction for every section was:\n{instruction}\n\n\
         The user message contains the per-section outputs joined by the literal marker\n\
         \"---CHUNK BOUNDARY---\".\n\
         Merge them into one continuous text. Smooth the transitions and remove\n\
         redundancies at the boundaries only. Do not summarize, shorten, or truncate\n\
         the content. Return the complete merged text and nothing else."
    );
    vec![
        ChatMessage::new("system", system),
        ChatMessage::new("user", outputs.join(BOUNDARY_MARKER)),
    ]
}
