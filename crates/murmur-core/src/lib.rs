//! # murmur-core
//!
//! The agent runtime: per-session actors driving a bounded ReAct loop over
//! the provider router, gated by the hook pipeline, observed by the event
//! bus, persisted through the session store.
//!
//! ## Architecture
//!
//! ```text
//! inbound message
//!   └─ SessionManager::deliver ── session actor (one per session)
//!        └─ AgentRuntime::process_message
//!             ├─ signal classifier + noise filter   (gate the model)
//!             ├─ pre_llm hooks                      (gate the loop)
//!             ├─ plan gate                          (plan mode)
//!             └─ ReAct loop
//!                  ├─ context builder + compactor   (token budget)
//!                  ├─ provider router               (tier + fallback)
//!                  └─ tool dispatcher via hooks     (pre/post_tool_use)
//! outbound response ── channel adapter send callback
//! ```

pub mod channel;
pub mod compaction;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod noise;
pub mod plan;
pub mod runtime;
pub mod session;
pub mod signal;
pub mod tools;

// ── re-exports ───────────────────────────────────────────────────────

pub use channel::{
    ChannelSettings, InboundMessage, OutboundChannel, SendOptions, derive_session_id,
};
pub use config::{ConfigStore, RuntimeConfig};
pub use error::{AgentError, ErrorClass, Result};
pub use identity::{Identity, IdentityStore};
pub use plan::{PlanProposal, PlanStep};
pub use runtime::{AgentRuntime, ProcessOptions, ProcessOutcome, SessionState};
pub use session::{SessionManager, render_error};
pub use signal::{Confidence, Format, Genre, Mode, Signal, classify};
pub use tools::{FnTool, SideEffect, ToolDescriptor, ToolExecutor, ToolRegistry};
