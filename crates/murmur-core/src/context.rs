//! Layered prompt assembly.
//!
//! The prompt is built from fixed layers: identity (persistent across
//! sessions), a one-line signal summary, the environment block (channel,
//! cwd, active facets), then conversation history. The total must fit the
//! configured token budget minus completion headroom; the compactor
//! (`crate::compaction`) is responsible for shrinking history before the
//! builder is asked to exceed it.

use murmur_provider::Message;

use crate::config::ContextConfig;
use crate::identity::Identity;
use crate::signal::Signal;

// ---------------------------------------------------------------------------
// Token estimation
// ---------------------------------------------------------------------------

/// Rough token estimate: ~4 characters per token. Good enough for budget
/// decisions; providers report exact usage after the fact.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}

/// Estimate tokens for one message, including serialized tool calls.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut total = estimate_tokens(&message.content) + 4;
    for call in &message.tool_calls {
        total += estimate_tokens(&call.name);
        total += estimate_tokens(&call.arguments.to_string());
    }
    total
}

/// Estimate the projected prompt size of a message list.
pub fn projected_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// The runtime surroundings injected into the prompt.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// Channel tag the session arrived on.
    pub channel: String,
    /// Working directory, when the deployment has one.
    pub cwd: Option<String>,
    /// Active machines, skills or other capabilities, one line each.
    pub facets: Vec<String>,
}

impl Environment {
    fn prompt_section(&self) -> String {
        let mut out = format!("environment: channel={}", self.channel);
        if let Some(cwd) = &self.cwd {
            out.push_str(&format!(" cwd={cwd}"));
        }
        for facet in &self.facets {
            out.push('\n');
            out.push_str(facet);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// The assembled prompt plus its projected size.
#[derive(Debug, Clone)]
pub struct ContextAssembly {
    /// System message followed by conversation history.
    pub messages: Vec<Message>,
    /// Estimated prompt tokens.
    pub projected_tokens: usize,
}

/// Assemble the layered prompt.
///
/// History must already fit the budget (compaction runs first); if a
/// pathological single turn still overflows, the oldest history entries are
/// dropped rather than blowing the provider's context window.
pub fn build_context(
    identity: &Identity,
    signal: &Signal,
    environment: &Environment,
    history: &[Message],
    config: &ContextConfig,
) -> ContextAssembly {
    let system = format!(
        "{}\n\n{}\n\n{}",
        identity.prompt_section(),
        signal.summary_line(),
        environment.prompt_section()
    );

    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system));
    messages.extend_from_slice(history);

    let budget = config
        .max_context_tokens
        .saturating_sub(config.completion_headroom);

    // Last-resort overflow guard: drop oldest history (never the system
    // layer) until the prompt fits.
    while projected_tokens(&messages) > budget && messages.len() > 2 {
        let dropped = messages.remove(1);
        tracing::warn!(
            dropped_tokens = estimate_message_tokens(&dropped),
            "prompt over budget after compaction, dropping oldest turn"
        );
    }

    let projected = projected_tokens(&messages);
    ContextAssembly {
        messages,
        projected_tokens: projected,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
