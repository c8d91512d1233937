use futures::StreamExt;
use ozzie_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, Role};
use serde::{Deserialize, Serialize};

/// Grounded on the teacher's `compact_session` narrative-summary prompt.
pub const SUMMARIZE_PROMPT: &str = "Summarize the conversation so far in dense prose, \
preserving decisions, open questions, and file paths mentioned. Do not include pleasantries.";

/// Grounded on the teacher's `STRUCTURED_COMPACTION_PROMPT` fixed-section
/// checkpoint format.
pub const STRUCTURED_COMPACTION_PROMPT: &str = "Produce a structured checkpoint of the \
conversation so far using exactly these Markdown sections, each a short bullet list:\n\
## Decisions\n## Open Questions\n## Files Touched\n## Next Steps";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    #[default]
    Narrative,
    Structured,
}

#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub summary: Message,
    /// Index (exclusive) into the original history this summary covers.
    /// Stored in session meta as `summary_up_to` so compaction is idempotent.
    pub summary_up_to: usize,
}

/// ~4 characters per token. Good enough to decide whether to compact
/// without pulling in a tokenizer.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.content.len() / 4 + 1).sum()
}

/// Summarizes the oldest contiguous prefix of `messages` (everything but the
/// last `keep_tail`) into one synthetic `system` message via a model call.
/// Idempotent: called again against a history whose prefix content hasn't
/// changed, it asks the model to summarize exactly the same prefix and
/// produces an equivalent high-water mark.
pub async fn compact_session_with_strategy(
    provider: &dyn ModelProvider,
    messages: &[Message],
    keep_tail: usize,
    strategy: CompactionStrategy,
) -> anyhow::Result<CompactionResult> {
    let split = messages.len().saturating_sub(keep_tail);
    let prefix = &messages[..split];
    if prefix.is_empty() {
        anyhow::bail!("nothing to compact: history shorter than keep_tail");
    }

    let prompt = match strategy {
        CompactionStrategy::Narrative => SUMMARIZE_PROMPT,
        CompactionStrategy::Structured => STRUCTURED_COMPACTION_PROMPT,
    };

    let mut req_messages = prefix.to_vec();
    req_messages.push(Message::user(prompt));
    let req = CompletionRequest { messages: req_messages, tools: Vec::new(), stream: false };

    let mut stream = provider.complete(req).await?;
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::TextDelta(delta) => text.push_str(&delta),
            ResponseEvent::Done => break,
            ResponseEvent::Error(e) => anyhow::bail!("compaction model call failed: {e}"),
            ResponseEvent::ToolCall { .. } | ResponseEvent::Usage { .. } => {}
        }
    }

    Ok(CompactionResult { summary: Message::system(text), summary_up_to: split })
}

/// Legacy entry point retained for callers that don't care which strategy
/// runs: always narrative.
pub async fn compact_session(
    provider: &dyn ModelProvider,
    messages: &[Message],
    keep_tail: usize,
) -> anyhow::Result<CompactionResult> {
    compact_session_with_strategy(provider, messages, keep_tail, CompactionStrategy::Narrative).await
}

/// Deterministic, model-free fallback for when even the compaction prompt
/// itself would not fit the context window. Drops everything but the most
/// recent `keep_last` non-system messages and prepends a canned notice.
/// Never fails.
pub fn emergency_compact(messages: &[Message], keep_last: usize) -> Vec<Message> {
    let mut non_system: Vec<Message> = messages.iter().filter(|m| m.role != Role::System).cloned().collect();
    let drop_count = non_system.len().saturating_sub(keep_last);
    let tail = non_system.split_off(drop_count);

    let mut out = Vec::with_capacity(tail.len() + 1);
    out.push(Message::system(
        "[earlier conversation was dropped to fit the context window; only the most recent messages are shown]",
    ));
    out.extend(tail);
    out
}
