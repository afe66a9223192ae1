//! Core types for LLM interaction.
//!
//! These types are provider-agnostic; the backend modules translate them
//! into each provider's wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// A budget / capability band for model selection.
///
/// Elite handles orchestration and architecture, specialist handles
/// implementation, utility handles classification and quick tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Elite,
    Specialist,
    Utility,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Elite => "elite",
            Self::Specialist => "specialist",
            Self::Utility => "utility",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the LLM.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,

    /// The textual content. For [`Role::Tool`] messages this is the
    /// serialized tool result; for assistant messages that carry only tool
    /// calls it may be empty.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which tool call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message that contains tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier assigned by the LLM for correlating results.
    pub id: String,

    /// The name of the tool to invoke.
    pub name: String,

    /// Arguments as a JSON value.
    pub arguments: Value,
}

/// The result of executing a tool, ready to feed back to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The [`ToolCall::id`] this result corresponds to.
    pub tool_call_id: String,

    /// Serialized result content.
    pub content: String,

    /// Whether the tool invocation failed.
    #[serde(default)]
    pub is_error: bool,
}

/// A tool schema advertised to the LLM.
///
/// `parameters` is a JSON Schema draft-07 subset: object root, named
/// properties, required list, per-property type and description. Backends
/// translate this into their provider's native function-calling shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub parameters: Value,
}

// ---------------------------------------------------------------------------
// Requests and completions
// ---------------------------------------------------------------------------

/// A full request to send to a backend.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// The model identifier. Empty means the backend's default.
    pub model: String,

    /// The conversation history.
    pub messages: Vec<Message>,

    /// Tool schemas the model may invoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens the model may generate in this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// What the model produced: a final text answer, or tool invocations.
#[derive(Debug, Clone)]
pub enum CompletionContent {
    /// The model produced a final text answer.
    Text(String),

    /// The model wants one or more tools run before continuing.
    ToolCalls(Vec<ToolCall>),
}

/// A completed chat turn, with usage attribution.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The model's output.
    pub content: CompletionContent,

    /// Token usage for this call.
    pub usage: Usage,

    /// The provider that served the call (useful after fallback).
    pub provider: String,

    /// The concrete model that served the call.
    pub model: String,
}

/// Token usage information returned by the LLM.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,
    /// Number of tokens generated by the model.
    pub completion_tokens: u32,
}

// ---------------------------------------------------------------------------
// Streaming events (Anthropic SSE)
// ---------------------------------------------------------------------------

/// Events emitted during SSE streaming from the Anthropic Messages API.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The stream started; prompt token count is known here.
    MessageStart {
        message_id: String,
        model: String,
        prompt_tokens: u32,
    },

    /// A new content block started (`"text"` or `"tool_use"`).
    ContentBlockStart {
        index: u32,
        content_type: String,
        id: Option<String>,
        name: Option<String>,
    },

    /// An incremental delta within a content block.
    ContentBlockDelta { index: u32, delta: StreamDelta },

    /// A content block finished streaming.
    ContentBlockStop { index: u32 },

    /// The overall message is complete; completion token count arrives here.
    MessageDelta {
        stop_reason: Option<String>,
        completion_tokens: u32,
    },

    /// The stream has fully terminated.
    MessageStop,

    /// A keepalive event.
    Ping,
}

/// Incremental delta within a streaming content block.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text.
    TextDelta(String),

    /// A chunk of JSON for a tool-use input.
    InputJsonDelta(String),
}
