//! Lifecycle event bus.
//!
//! The bus fans lifecycle events out to registered handlers.  Unlike a
//! broadcast channel, handlers are invoked inline at `emit` time in
//! registration order, so every handler for a given event kind observes
//! events in emission order.  Handlers that need to do real work should
//! hand it off to their own task; a panicking handler is logged and
//! swallowed so observers can never take the runtime down.
//!
//! # Usage
//!
//! ```rust
//! # use murmur_kernel::bus::{EventBus, EventKind};
//! # use serde_json::json;
//! let bus = EventBus::new();
//! let token = bus.subscribe(EventKind::AgentResponse, |event| {
//!     println!("response: {}", event.payload);
//! });
//!
//! bus.emit(EventKind::AgentResponse, json!({"session_id": "tg_42_7", "text": "done"}));
//! bus.unsubscribe(token);
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// The kind of lifecycle event flowing over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A session processed its first turn.
    SessionStart,
    /// A session was closed (explicitly or by idle timeout).
    SessionEnd,
    /// A tool invocation started or finished.
    ToolCall,
    /// A tool invocation failed.
    ToolError,
    /// The model produced a completion (payload carries usage).
    LlmResponse,
    /// The loop produced its final outbound response.
    AgentResponse,
    /// A hook short-circuited an operation.
    HookBlocked,
    /// The context builder breached the compaction threshold.
    ContextPressure,
    /// A tier token budget was exceeded.
    BudgetExceeded,
    /// The loop returned a plan proposal instead of executing.
    PlanProposed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::ToolCall => "tool_call",
            Self::ToolError => "tool_error",
            Self::LlmResponse => "llm_response",
            Self::AgentResponse => "agent_response",
            Self::HookBlocked => "hook_blocked",
            Self::ContextPressure => "context_pressure",
            Self::BudgetExceeded => "budget_exceeded",
            Self::PlanProposed => "plan_proposed",
        };
        write!(f, "{s}")
    }
}

/// An event delivered to handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Event-kind-specific JSON payload.
    pub payload: Value,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

/// Opaque token returned by [`EventBus::subscribe`]; pass it to
/// [`EventBus::unsubscribe`] to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerToken {
    kind: EventKind,
    id: u64,
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Fan-out bus of event kind → ordered handler list.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.  Handlers for the
/// same kind observe events in emission order; there is no ordering
/// guarantee across kinds.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    handlers: RwLock<HashMap<EventKind, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler for an event kind.
    ///
    /// Handlers run inline inside [`EventBus::emit`]; long-running work
    /// should be dispatched to the handler's own task.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> HandlerToken
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.inner.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(kind).or_default().push((id, Arc::new(handler)));

        tracing::trace!(kind = %kind, handler_id = id, "bus handler subscribed");
        HandlerToken { kind, id }
    }

    /// Remove a previously registered handler.
    ///
    /// Returns `true` if the handler was present.
    pub fn unsubscribe(&self, token: HandlerToken) -> bool {
        let mut handlers = self.inner.handlers.write().unwrap_or_else(|e| e.into_inner());
        let Some(list) = handlers.get_mut(&token.kind) else {
            return false;
        };

        let before = list.len();
        list.retain(|(id, _)| *id != token.id);
        let removed = list.len() < before;
        if removed {
            tracing::trace!(kind = %token.kind, handler_id = token.id, "bus handler unsubscribed");
        }
        removed
    }

    /// Emit an event to every handler registered for its kind.
    ///
    /// A panicking handler is logged and swallowed; remaining handlers still
    /// run.  Returns the number of handlers invoked.
    pub fn emit(&self, kind: EventKind, payload: Value) -> usize {
        let event = Event {
            kind,
            payload,
            timestamp: Utc::now(),
        };

        // Snapshot the handler list so emission never holds the lock across
        // handler execution.
        let snapshot: Vec<(u64, Handler)> = {
            let handlers = self.inner.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(&kind).cloned().unwrap_or_default()
        };

        for (id, handler) in &snapshot {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                tracing::error!(kind = %kind, handler_id = id, "event handler panicked");
            }
        }

        tracing::trace!(kind = %kind, receivers = snapshot.len(), "event emitted");
        snapshot.len()
    }

    /// Return the number of handlers registered for a kind.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        let handlers = self.inner.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
