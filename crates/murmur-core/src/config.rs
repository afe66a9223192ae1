//! Runtime configuration.
//!
//! All tuning knobs live in one TOML-deserializable [`RuntimeConfig`].
//! The config is loaded once at boot and published as an immutable
//! snapshot; [`ConfigStore::reload`] swaps in a new snapshot without
//! touching live sessions (they pick it up on their next message).

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Noise filter thresholds. Channel-dependent calibration belongs here, not
/// in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Messages with signal weight strictly below this are filtered
    /// (equality passes).
    pub weight_threshold: f32,
    /// Upper bound of the borderline band consulted by the tier-2 LLM probe.
    pub borderline_ceiling: f32,
    /// Whether the tier-2 LLM probe runs at all.
    pub llm_assist: bool,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            weight_threshold: 0.15,
            borderline_ceiling: 0.30,
            llm_assist: false,
        }
    }
}

/// Context budget and compaction tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Total prompt budget in tokens.
    pub max_context_tokens: usize,
    /// Tokens reserved for the model's completion.
    pub completion_headroom: usize,
    /// Compaction triggers when the projected prompt exceeds this fraction
    /// of the budget.
    pub compaction_threshold: f32,
    /// Number of recent turns preserved verbatim by compaction.
    pub keep_recent_turns: usize,
    /// How many older turns go into each summarization chunk.
    pub summary_chunk_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 128_000,
            completion_headroom: 8_192,
            compaction_threshold: 0.70,
            keep_recent_turns: 6,
            summary_chunk_turns: 20,
        }
    }
}

/// Session loop behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether plan mode gates build/execute tasks behind a plan proposal.
    pub plan_mode: bool,
    /// Consecutive identical failing tool calls before the loop halts.
    pub doom_loop_threshold: u32,
    /// Sessions idle longer than this are closed by the sweeper.
    pub idle_timeout_secs: u64,
    /// Whether the LLM-assisted classifier branch is enabled.
    pub classifier_llm_assist: bool,
    /// Preset used to fan heavyweight build tasks out to a swarm. `None`
    /// leaves swarming caller-directed only.
    pub auto_swarm_preset: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            plan_mode: false,
            doom_loop_threshold: 3,
            idle_timeout_secs: 30 * 60,
            classifier_llm_assist: false,
            auto_swarm_preset: None,
        }
    }
}

/// Tool execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Hard per-call timeout in seconds.
    pub call_timeout_secs: u64,
    /// Results longer than this many bytes are truncated with a marker.
    pub result_byte_cap: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            result_byte_cap: 100 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

/// The full runtime configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub noise: NoiseConfig,
    pub context: ContextConfig,
    pub session: SessionConfig,
    pub tools: ToolConfig,
}

impl RuntimeConfig {
    /// Parse a TOML document. Missing sections and fields take defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| AgentError::Config {
            reason: format!("invalid config TOML: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

/// Published configuration snapshots.
///
/// Readers call [`ConfigStore::snapshot`] and hold the `Arc` for the
/// duration of one message; a concurrent reload never mutates what they
/// are reading.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<Arc<RuntimeConfig>>>,
}

impl ConfigStore {
    /// Create a store with the given initial configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RuntimeConfig> {
        Arc::clone(&self.inner.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Publish a new snapshot.
    pub fn reload(&self, config: RuntimeConfig) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = Arc::new(config);
        tracing::info!("runtime configuration reloaded");
    }

    /// Parse and publish a new snapshot from TOML.
    pub fn reload_from_str(&self, raw: &str) -> Result<()> {
        let config = RuntimeConfig::from_toml_str(raw)?;
        self.reload(config);
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
