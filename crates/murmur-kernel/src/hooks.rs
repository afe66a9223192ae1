//! Hook pipeline.
//!
//! Hooks are priority-ordered middleware invoked at fixed lifecycle points
//! of the agent loop.  Each handler receives the event payload and returns
//! one of three outcomes: allow (optionally rewriting the payload), block
//! (short-circuit with a reason), or error (abort the operation).
//!
//! Within an event, handlers run in ascending priority; ties are broken by
//! registration order.  A block stops the remaining handlers for that
//! dispatch.  Handlers run under a timeout (default 5s); exceeding it counts
//! as an error, not a block.
//!
//! The `pre_*` events are dispatched synchronously and gate the loop; the
//! `post_*` events may be dispatched fire-and-forget at the caller's
//! discretion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Events and outcomes
// ---------------------------------------------------------------------------

/// Lifecycle points a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    PreLlm,
    PostLlm,
    PreResponse,
    PostResponse,
    SessionStart,
    SessionEnd,
    ContextPressure,
    ToolError,
    BudgetExceeded,
    PlanProposed,
    HookBlocked,
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreToolUse => "pre_tool_use",
            Self::PostToolUse => "post_tool_use",
            Self::PreLlm => "pre_llm",
            Self::PostLlm => "post_llm",
            Self::PreResponse => "pre_response",
            Self::PostResponse => "post_response",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::ContextPressure => "context_pressure",
            Self::ToolError => "tool_error",
            Self::BudgetExceeded => "budget_exceeded",
            Self::PlanProposed => "plan_proposed",
            Self::HookBlocked => "hook_blocked",
        };
        write!(f, "{s}")
    }
}

/// What a single handler decided about the payload it was given.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    /// Continue, with the (possibly rewritten) payload.
    Allow(Value),
    /// Stop the operation; the reason is surfaced verbatim.
    Block { reason: String },
    /// The handler itself failed; the operation aborts as an error.
    Error { reason: String },
}

/// The aggregate result of running every handler for one event.
#[derive(Debug, Clone)]
pub enum HookDispatch {
    /// All handlers allowed; carries the final payload after rewrites.
    Allowed(Value),
    /// A handler blocked; no later handler ran.
    Blocked { hook_name: String, reason: String },
    /// A handler errored or timed out.
    Failed { hook_name: String, reason: String },
}

impl HookDispatch {
    /// Whether the dispatch allowed the operation to proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// A hook handler.  Implementations must be pure functions of the payload;
/// side effects belong in event-bus observers, not hooks.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn call(&self, payload: Value) -> HookOutcome;
}

/// Adapter wrapping a plain closure as a [`HookHandler`].
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> HookHandler for FnHook<F>
where
    F: Fn(Value) -> HookOutcome + Send + Sync,
{
    async fn call(&self, payload: Value) -> HookOutcome {
        (self.0)(payload)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Per-handler dispatch statistics.
#[derive(Debug, Clone, Default)]
pub struct HookMetrics {
    /// Number of times the handler ran.
    pub calls: u64,
    /// Number of times it returned a block.
    pub blocks: u64,
    /// Number of errors (including timeouts).
    pub errors: u64,
    /// Cumulative wall-clock time spent in the handler.
    pub total_duration: Duration,
}

impl HookMetrics {
    /// Average duration per call, or zero if never called.
    pub fn avg_duration(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.calls as u32
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct HookEntry {
    name: String,
    priority: i32,
    seq: u64,
    handler: Arc<dyn HookHandler>,
}

/// Priority-ordered hook registry.
///
/// Cheaply cloneable (`Arc`-backed).  Registration and dispatch may race;
/// a dispatch in flight uses the handler snapshot taken at its start.
#[derive(Clone)]
pub struct HookRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    hooks: RwLock<HashMap<HookEvent, Vec<Arc<HookEntry>>>>,
    metrics: DashMap<(HookEvent, String), HookMetrics>,
    next_seq: AtomicU64,
    handler_timeout: Duration,
}

impl HookRegistry {
    /// Create an empty registry with the default 5s handler timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_handler_timeout(Duration::from_secs(5))
    }

    /// Create an empty registry with an explicit handler timeout.
    #[must_use]
    pub fn with_handler_timeout(handler_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                hooks: RwLock::new(HashMap::new()),
                metrics: DashMap::new(),
                next_seq: AtomicU64::new(0),
                handler_timeout,
            }),
        }
    }

    /// Register a handler for an event.
    ///
    /// Lower priority runs first; ties are broken by registration order.
    /// Re-registering the same `(event, name)` replaces the old handler.
    pub fn register(
        &self,
        event: HookEvent,
        name: impl Into<String>,
        priority: i32,
        handler: Arc<dyn HookHandler>,
    ) {
        let name = name.into();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);

        let mut hooks = self.inner.hooks.write().unwrap_or_else(|e| e.into_inner());
        let entries = hooks.entry(event).or_default();
        entries.retain(|e| e.name != name);
        entries.push(Arc::new(HookEntry {
            name: name.clone(),
            priority,
            seq,
            handler,
        }));
        entries.sort_by_key(|e| (e.priority, e.seq));

        tracing::debug!(event = %event, hook = %name, priority, "hook registered");
    }

    /// Remove a handler.  Returns `true` if it was registered.
    pub fn unregister(&self, event: HookEvent, name: &str) -> bool {
        let mut hooks = self.inner.hooks.write().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = hooks.get_mut(&event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.name != name);
        let removed = entries.len() < before;
        if removed {
            tracing::debug!(event = %event, hook = %name, "hook unregistered");
        }
        removed
    }

    /// Number of handlers registered for an event.
    pub fn count(&self, event: HookEvent) -> usize {
        let hooks = self.inner.hooks.read().unwrap_or_else(|e| e.into_inner());
        hooks.get(&event).map_or(0, Vec::len)
    }

    /// Run every handler for `event` over `payload`, threading rewrites
    /// through and short-circuiting on the first block or error.
    pub async fn dispatch(&self, event: HookEvent, payload: Value) -> HookDispatch {
        let snapshot: Vec<Arc<HookEntry>> = {
            let hooks = self.inner.hooks.read().unwrap_or_else(|e| e.into_inner());
            hooks.get(&event).cloned().unwrap_or_default()
        };

        let mut current = payload;
        for entry in snapshot {
            let start = Instant::now();
            let outcome = tokio::time::timeout(
                self.inner.handler_timeout,
                entry.handler.call(current.clone()),
            )
            .await;
            let elapsed = start.elapsed();

            let mut stats = self
                .inner
                .metrics
                .entry((event, entry.name.clone()))
                .or_default();
            stats.calls += 1;
            stats.total_duration += elapsed;

            match outcome {
                Ok(HookOutcome::Allow(rewritten)) => {
                    current = rewritten;
                }
                Ok(HookOutcome::Block { reason }) => {
                    stats.blocks += 1;
                    tracing::info!(event = %event, hook = %entry.name, reason = %reason, "hook blocked");
                    return HookDispatch::Blocked {
                        hook_name: entry.name.clone(),
                        reason,
                    };
                }
                Ok(HookOutcome::Error { reason }) => {
                    stats.errors += 1;
                    tracing::warn!(event = %event, hook = %entry.name, reason = %reason, "hook errored");
                    return HookDispatch::Failed {
                        hook_name: entry.name.clone(),
                        reason,
                    };
                }
                Err(_) => {
                    stats.errors += 1;
                    tracing::warn!(
                        event = %event,
                        hook = %entry.name,
                        timeout_ms = self.inner.handler_timeout.as_millis() as u64,
                        "hook handler timed out"
                    );
                    return HookDispatch::Failed {
                        hook_name: entry.name.clone(),
                        reason: format!(
                            "handler timed out after {}ms",
                            self.inner.handler_timeout.as_millis()
                        ),
                    };
                }
            }
        }

        HookDispatch::Allowed(current)
    }

    /// Snapshot of per-handler metrics for an event.
    pub fn metrics(&self, event: HookEvent) -> Vec<(String, HookMetrics)> {
        self.inner
            .metrics
            .iter()
            .filter(|e| e.key().0 == event)
            .map(|e| (e.key().1.clone(), e.value().clone()))
            .collect()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
