//! Agent error types.
//!
//! All runtime subsystems surface errors through [`AgentError`]. The
//! [`AgentError::class`] accessor buckets every variant into the recovery
//! taxonomy callers branch on: transient errors retry, policy and input
//! errors are fed back to the model mid-loop, terminal errors surface to the
//! caller, and cancellation is its own first-class outcome.

/// How a given error should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Recoverable by retry or fallback.
    Transient,
    /// A deliberate refusal (hook block, denied tool).
    Policy,
    /// Malformed input; the model may recover if told.
    Input,
    /// Unrecoverable for this request; session state is preserved.
    Terminal,
    /// The operation was cancelled by the caller.
    Cancelled,
}

/// Unified error type for the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Loop errors ---------------------------------------------------------
    /// The ReAct loop reached its tier's iteration ceiling.
    #[error("max iterations reached ({max_iterations}) for session {session_id}")]
    MaxIterationsReached {
        session_id: String,
        max_iterations: u32,
    },

    /// The same tool call failed three times in a row.
    #[error("doom loop detected on tool `{tool_name}`")]
    DoomLoop { tool_name: String },

    /// A hook blocked the operation before the loop could proceed.
    #[error("blocked by hook `{hook_name}`: {reason}")]
    HookBlocked { hook_name: String, reason: String },

    /// A hook handler itself failed (or timed out).
    #[error("hook `{hook_name}` failed: {reason}")]
    HookFailed { hook_name: String, reason: String },

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    // -- Tool errors ---------------------------------------------------------
    /// A tool call referenced a tool that is not registered.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// Tool arguments failed JSON-schema validation.
    #[error("invalid arguments for `{tool_name}`: {details}")]
    InvalidArguments { tool_name: String, details: String },

    /// A tool invocation failed.
    #[error("tool `{tool_name}` failed: {reason}")]
    ToolFailed { tool_name: String, reason: String },

    /// A tool invocation exceeded its timeout.
    #[error("tool `{tool_name}` timed out after {seconds}s")]
    ToolTimeout { tool_name: String, seconds: u64 },

    /// A tool was registered with a parameter spec that is not valid
    /// JSON Schema.
    #[error("invalid parameter schema for `{tool_name}`: {reason}")]
    InvalidToolSchema { tool_name: String, reason: String },

    // -- Input errors --------------------------------------------------------
    /// The inbound message could not be processed.
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// A swarm was requested with a preset that is not registered.
    #[error("unknown swarm preset: {name}")]
    UnknownPreset { name: String },

    /// Configuration parsing or validation failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the provider router.
    #[error("provider error: {0}")]
    Provider(#[from] murmur_provider::ProviderError),

    /// An error propagated from the swarm orchestrator.
    #[error("swarm error: {0}")]
    Swarm(#[from] murmur_swarm::SwarmError),

    /// An error propagated from the session store.
    #[error("store error: {0}")]
    Store(#[from] murmur_store::StoreError),

    /// An error propagated from the kernel.
    #[error("kernel error: {0}")]
    Kernel(#[from] murmur_kernel::KernelError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors. Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Bucket this error into the recovery taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Provider(e) if e.is_transient() => ErrorClass::Transient,
            Self::ToolTimeout { .. } => ErrorClass::Transient,

            Self::HookBlocked { .. } => ErrorClass::Policy,

            Self::UnknownTool { .. }
            | Self::InvalidArguments { .. }
            | Self::InvalidToolSchema { .. }
            | Self::MalformedMessage { .. }
            | Self::UnknownPreset { .. }
            | Self::ToolFailed { .. }
            | Self::Json(_) => ErrorClass::Input,

            Self::Cancelled | Self::Swarm(murmur_swarm::SwarmError::Cancelled) => {
                ErrorClass::Cancelled
            }

            Self::MaxIterationsReached { .. }
            | Self::DoomLoop { .. }
            | Self::HookFailed { .. }
            | Self::Provider(_)
            | Self::Swarm(_)
            | Self::Store(_)
            | Self::Kernel(_)
            | Self::Config { .. }
            | Self::Internal(_) => ErrorClass::Terminal,
        }
    }

    /// Short machine-readable kind for event payloads and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MaxIterationsReached { .. } => "max_iterations_reached",
            Self::DoomLoop { .. } => "doom_loop",
            Self::HookBlocked { .. } => "hook_blocked",
            Self::HookFailed { .. } => "hook_failed",
            Self::Cancelled => "cancelled",
            Self::UnknownTool { .. } => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::ToolFailed { .. } => "tool_failed",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::InvalidToolSchema { .. } => "invalid_tool_schema",
            Self::MalformedMessage { .. } => "malformed_message",
            Self::UnknownPreset { .. } => "unknown_preset",
            Self::Config { .. } => "config",
            Self::Provider(_) => "provider",
            Self::Swarm(murmur_swarm::SwarmError::Cancelled) => "cancelled",
            Self::Swarm(_) => "swarm",
            Self::Store(_) => "store",
            Self::Kernel(_) => "kernel",
            Self::Json(_) => "json",
            Self::Internal(_) => "internal",
        }
    }
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doom_loop_is_terminal() {
        let err = AgentError::DoomLoop {
            tool_name: "shell_execute".into(),
        };
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert_eq!(err.kind(), "doom_loop");
    }

    #[test]
    fn hook_block_is_policy() {
        let err = AgentError::HookBlocked {
            hook_name: "policy".into(),
            reason: "shell disabled".into(),
        };
        assert_eq!(err.class(), ErrorClass::Policy);
    }

    #[test]
    fn cancellation_is_distinct_from_error() {
        assert_eq!(AgentError::Cancelled.class(), ErrorClass::Cancelled);
    }

    #[test]
    fn transient_provider_errors_classify_transient() {
        let err = AgentError::Provider(murmur_provider::ProviderError::Timeout {
            provider: "anthropic".into(),
        });
        assert_eq!(err.class(), ErrorClass::Transient);

        let hard = AgentError::Provider(murmur_provider::ProviderError::Auth {
            provider: "anthropic".into(),
        });
        assert_eq!(hard.class(), ErrorClass::Terminal);
    }
}
