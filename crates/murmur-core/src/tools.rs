//! Tool registry and dispatcher.
//!
//! The registry is the mutable surface: tools register (idempotently on
//! name) and unregister at boot or at runtime. After every mutation the
//! registry rebuilds an immutable lookup table and publishes it atomically;
//! [`ToolRegistry::dispatcher`] hands out a snapshot with O(1) lookups that
//! is never affected by later mutations.
//!
//! Execution validates arguments against the tool's JSON schema, runs the
//! executor under a hard timeout, and truncates oversized results with an
//! explicit marker. Executors own their own sandboxing; policy enforcement
//! (path allow-lists, command blocklists) belongs in `pre_tool_use` hooks,
//! not here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use murmur_provider::ToolSchema;

use crate::config::ToolConfig;
use crate::error::{AgentError, Result};

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Declared side-effect class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffect {
    Read,
    Write,
    Exec,
    Network,
}

/// The code behind a tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute with validated arguments, returning text to feed back to
    /// the model.
    async fn execute(&self, arguments: Value) -> Result<String>;
}

/// Adapter wrapping a plain closure as a [`ToolExecutor`].
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F> ToolExecutor for FnTool<F>
where
    F: Fn(Value) -> Result<String> + Send + Sync,
{
    async fn execute(&self, arguments: Value) -> Result<String> {
        (self.0)(arguments)
    }
}

/// A registered tool: schema, metadata and executor.
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description advertised to the model.
    pub description: String,
    /// JSON Schema (draft-07 subset) for the arguments.
    pub parameters: Value,
    /// Declared side-effect class.
    pub side_effect: SideEffect,
    executor: Arc<dyn ToolExecutor>,
    compiled: JSONSchema,
}

impl ToolDescriptor {
    /// Create a descriptor, compiling the parameter schema up front so a
    /// bad schema fails at registration rather than at dispatch.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        side_effect: SideEffect,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<Self> {
        let name = name.into();
        let compiled =
            JSONSchema::compile(&parameters).map_err(|e| AgentError::InvalidToolSchema {
                tool_name: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            description: description.into(),
            parameters,
            side_effect,
            executor,
            compiled,
        })
    }

    /// The wire schema advertised to providers.
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("side_effect", &self.side_effect)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type Table = HashMap<String, Arc<ToolDescriptor>>;

/// Mutable tool registry publishing immutable dispatch tables.
///
/// Reads never lock: every mutation rebuilds the table and swaps it in
/// atomically, so in-flight dispatchers keep the snapshot they started
/// with.
pub struct ToolRegistry {
    table: ArcSwap<Table>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(Table::new()),
        }
    }

    /// Register a tool. Idempotent on name: re-registering replaces the
    /// previous descriptor.
    pub fn register(&self, descriptor: ToolDescriptor) {
        let descriptor = Arc::new(descriptor);
        let name = descriptor.name.clone();
        self.table.rcu(|table| {
            let mut rebuilt = (**table).clone();
            rebuilt.insert(name.clone(), Arc::clone(&descriptor));
            rebuilt
        });
        debug!(tool = %descriptor.name, side_effect = ?descriptor.side_effect, "tool registered");
    }

    /// Remove a tool by name. Returns `true` if it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let mut removed = false;
        self.table.rcu(|table| {
            let mut rebuilt = (**table).clone();
            removed = rebuilt.remove(name).is_some();
            rebuilt
        });
        if removed {
            debug!(tool = %name, "tool unregistered");
        }
        removed
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish the current table as an immutable dispatcher.
    pub fn dispatcher(&self, config: &ToolConfig) -> ToolDispatcher {
        ToolDispatcher {
            table: self.table.load_full(),
            timeout: Duration::from_secs(config.call_timeout_secs),
            byte_cap: config.result_byte_cap,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Immutable dispatch snapshot: name → descriptor in O(1).
#[derive(Clone)]
pub struct ToolDispatcher {
    table: Arc<Table>,
    timeout: Duration,
    byte_cap: usize,
}

impl ToolDispatcher {
    /// Resolve a descriptor by name.
    pub fn lookup(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.table.get(name)
    }

    /// Wire schemas for every tool, sorted by name so prompts are stable.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.table.values().map(|d| d.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Number of tools in this snapshot.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether this snapshot has no tools.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Execute a tool call: resolve, validate, run under timeout, truncate.
    ///
    /// The caller (the session loop) runs `pre_tool_use` hooks before
    /// calling this; the dispatcher must not dispatch them again.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let descriptor = self
            .lookup(name)
            .ok_or_else(|| AgentError::UnknownTool {
                tool_name: name.to_owned(),
            })?
            .clone();

        if let Err(errors) = descriptor.compiled.validate(arguments) {
            let details = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AgentError::InvalidArguments {
                tool_name: name.to_owned(),
                details,
            });
        }

        debug!(tool = %name, "executing tool");

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = tokio::time::timeout(self.timeout, descriptor.executor.execute(arguments.clone())) => {
                match result {
                    Err(_) => {
                        return Err(AgentError::ToolTimeout {
                            tool_name: name.to_owned(),
                            seconds: self.timeout.as_secs(),
                        });
                    }
                    Ok(output) => output?,
                }
            }
        };

        Ok(truncate_result(output, self.byte_cap))
    }
}

/// Enforce the result byte cap. Output exactly at the cap passes untouched;
/// one byte over is cut (at a char boundary) and marked.
fn truncate_result(text: String, cap: usize) -> String {
    if text.len() <= cap {
        return text;
    }

    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    let total = text.len();
    format!(
        "{}\n[output truncated: {} of {} bytes shown]",
        &text[..end],
        end,
        total
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
