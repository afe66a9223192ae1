//! Swarm error types.

use thiserror::Error;

/// Unified error type for swarm orchestration.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// The preset declares no roles.
    #[error("preset `{preset}` has no roles")]
    EmptyPreset { preset: String },

    /// A role's `after` dependency names a role that is not in the preset.
    #[error("role `{role}` depends on unknown role `{after}`")]
    UnknownDependency { role: String, after: String },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle involving role `{role}`")]
    DependencyCycle { role: String },

    /// The lead role failed; the swarm cannot synthesize.
    #[error("lead role failed: {reason}")]
    LeadFailed { reason: String },

    /// The swarm was cancelled before completion.
    #[error("swarm cancelled")]
    Cancelled,

    /// An error propagated from the provider router.
    #[error("provider error: {0}")]
    Provider(#[from] murmur_provider::ProviderError),
}

/// Convenience alias used throughout the swarm crate.
pub type Result<T> = std::result::Result<T, SwarmError>;
