//! Kernel error types.

/// Unified error type for kernel subsystems.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// A hook referenced by name is not registered for the given event.
    #[error("hook not found: {hook_name}")]
    HookNotFound { hook_name: String },

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
