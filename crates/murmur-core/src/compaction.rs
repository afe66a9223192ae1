//! Context compaction — summarize older turns when the token budget is
//! under pressure.
//!
//! When the projected prompt exceeds the compaction threshold, the
//! compactor:
//!
//! 1. Preserves the system layer verbatim.
//! 2. Preserves the most recent `keep_recent_turns` turns verbatim.
//! 3. Summarizes older turns in chunks via a utility-tier model call,
//!    extracting a prose summary plus a list of key facts (decisions, file
//!    paths, identifiers).
//! 4. Replaces the summarized turns with one synthetic prior-context turn.
//!
//! Compacting a log that is already below threshold is a no-op, so
//! `compact(compact(log))` converges.

use serde_json::Value;
use tracing::{debug, info};

use murmur_provider::router::ChatOptions;
use murmur_provider::{CompletionContent, Message, ProviderRouter, Role, Tier};

use crate::config::ContextConfig;
use crate::context::projected_tokens;
use crate::error::{AgentError, Result};

/// Marker prefix on the synthetic turn so later passes (and humans reading
/// transcripts) can recognize it.
const PRIOR_CONTEXT_PREFIX: &str = "[prior context]";

/// Result of a compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    /// The (possibly rewritten) message list.
    pub messages: Vec<Message>,
    /// Projected tokens before the pass.
    pub before_tokens: usize,
    /// Projected tokens after the pass.
    pub after_tokens: usize,
}

impl CompactionOutcome {
    /// Tokens saved by this pass (zero for a no-op).
    pub fn saved(&self) -> usize {
        self.before_tokens.saturating_sub(self.after_tokens)
    }
}

/// Whether the projected prompt size breaches the compaction threshold.
pub fn needs_compaction(messages: &[Message], config: &ContextConfig) -> bool {
    let budget = config
        .max_context_tokens
        .saturating_sub(config.completion_headroom);
    let threshold = (budget as f32 * config.compaction_threshold) as usize;
    projected_tokens(messages) > threshold
}

/// Compact the conversation by summarizing older turns.
///
/// No-op when below threshold or when there is nothing older than the
/// keep-recent window.
pub async fn compact_messages(
    messages: &[Message],
    router: &ProviderRouter,
    config: &ContextConfig,
) -> Result<CompactionOutcome> {
    let before_tokens = projected_tokens(messages);

    if !needs_compaction(messages, config) {
        return Ok(CompactionOutcome {
            messages: messages.to_vec(),
            before_tokens,
            after_tokens: before_tokens,
        });
    }

    // Separate the system layer from the conversation.
    let (system, conversation) = match messages.first() {
        Some(first) if first.role == Role::System => (Some(&messages[0]), &messages[1..]),
        _ => (None, messages),
    };

    if conversation.len() <= config.keep_recent_turns {
        debug!(
            total = messages.len(),
            keep_recent = config.keep_recent_turns,
            "over threshold but nothing older than the recent window"
        );
        return Ok(CompactionOutcome {
            messages: messages.to_vec(),
            before_tokens,
            after_tokens: before_tokens,
        });
    }

    let split_point = conversation.len() - config.keep_recent_turns;
    let old_turns = &conversation[..split_point];
    let recent_turns = &conversation[split_point..];

    info!(
        old_count = old_turns.len(),
        recent_count = recent_turns.len(),
        before_tokens,
        "compacting conversation history"
    );

    // Summarize the old turns chunk by chunk.
    let mut summaries: Vec<String> = Vec::new();
    let mut facts: Vec<String> = Vec::new();
    for chunk in old_turns.chunks(config.summary_chunk_turns.max(1)) {
        let chunk_text = format_turns_for_summary(chunk);
        let (summary, chunk_facts) = summarize_chunk(router, &chunk_text).await?;
        summaries.push(summary);
        facts.extend(chunk_facts);
    }

    // Build the single synthetic prior-context turn.
    let mut synthetic = format!(
        "{PRIOR_CONTEXT_PREFIX} {} earlier turns were summarized.\n\n{}",
        old_turns.len(),
        summaries.join("\n\n")
    );
    if !facts.is_empty() {
        synthetic.push_str("\n\nKey facts:");
        for fact in &facts {
            synthetic.push_str(&format!("\n- {fact}"));
        }
    }

    let mut compacted = Vec::with_capacity(2 + recent_turns.len());
    if let Some(system) = system {
        compacted.push(system.clone());
    }
    compacted.push(Message::system(synthetic));
    compacted.extend_from_slice(recent_turns);

    let after_tokens = projected_tokens(&compacted);
    info!(
        before_tokens,
        after_tokens,
        saved = before_tokens.saturating_sub(after_tokens),
        "compaction complete"
    );

    Ok(CompactionOutcome {
        messages: compacted,
        before_tokens,
        after_tokens,
    })
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Format turns into a readable block for the summarizer.
fn format_turns_for_summary(messages: &[Message]) -> String {
    let mut buf = String::with_capacity(messages.len() * 200);
    for msg in messages {
        let role_label = match msg.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        };

        buf.push_str(role_label);
        buf.push_str(": ");

        if !msg.content.is_empty() {
            buf.push_str(&msg.content);
        }

        for tc in &msg.tool_calls {
            buf.push_str(&format!("\n  [tool_call: {}({})]", tc.name, tc.arguments));
        }

        buf.push('\n');
    }
    buf
}

/// Ask a utility-tier model to summarize one chunk, extracting prose plus
/// key facts. Lenient on the reply shape: a non-JSON reply becomes the
/// summary with no facts.
async fn summarize_chunk(
    router: &ProviderRouter,
    chunk_text: &str,
) -> Result<(String, Vec<String>)> {
    let prompt = format!(
        "Summarize this conversation excerpt for an agent that must continue \
         it later. Reply with a JSON object: {{\"summary\": \"...\", \
         \"facts\": [\"decisions, file paths, identifiers worth keeping\"]}}.\n\n\
         {chunk_text}"
    );

    let messages = [Message::user(prompt)];
    let opts = ChatOptions::for_tier(Tier::Utility);

    debug!("requesting chunk summary");
    let completion = router.chat(&messages, &opts).await?;

    let reply = match completion.content {
        CompletionContent::Text(text) => text,
        CompletionContent::ToolCalls(_) => {
            return Err(AgentError::Internal(
                "summarization call unexpectedly returned tool calls".into(),
            ));
        }
    };

    // Lenient parse: look for a JSON object anywhere in the reply.
    let start = reply.find('{');
    let end = reply.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if let Ok(v) = serde_json::from_str::<Value>(&reply[start..=end]) {
            let summary = v["summary"].as_str().unwrap_or(&reply).to_owned();
            let facts = v["facts"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|f| f.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            return Ok((summary, facts));
        }
    }

    Ok((reply, Vec::new()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
