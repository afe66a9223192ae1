//! # murmur-provider
//!
//! Provider-agnostic LLM access for the Murmur runtime.
//!
//! The [`router::ProviderRouter`] maps abstract `chat` calls onto concrete
//! backends. Callers pick a [`types::Tier`] (elite / specialist / utility);
//! the router resolves tier → model for the active provider, retries once on
//! transient failures, and then advances along the fallback chain,
//! re-resolving the tier for each provider it lands on.
//!
//! Two wire formats ship in-tree: the Anthropic Messages API
//! ([`anthropic::AnthropicBackend`]) and OpenAI-compatible chat completions
//! ([`openai::OpenAiBackend`], which also covers local servers). Both
//! support SSE streaming with a final usage record.

pub mod anthropic;
pub mod backend;
pub mod error;
pub mod openai;
pub mod router;
pub mod streaming;
pub mod types;

pub use backend::{ChatBackend, TokenSink};
pub use error::{ProviderError, Result};
pub use router::{ChatOptions, ProviderConfig, ProviderInfo, ProviderRouter, TierLimits};
pub use types::{
    ChatRequest, Completion, CompletionContent, Message, Role, Tier, ToolCall, ToolResult,
    ToolSchema, Usage,
};
