//! # murmur-swarm
//!
//! Fan-out execution for decomposable tasks.
//!
//! A swarm spawns one transient worker per preset role. Workers within a
//! wave run concurrently; waves are computed by topologically sorting the
//! roles' declared `after` dependencies. Every worker sees the mailbox
//! transcript accumulated by earlier waves in its system prompt, posts at
//! most one entry (its final result), and terminates. Workers are never
//! restarted: a failed role is recorded and the synthesis step notes it,
//! unless the failed role is the lead, in which case the swarm fails.

pub mod error;
pub mod mailbox;
pub mod orchestrator;
pub mod preset;

pub use error::{Result, SwarmError};
pub use mailbox::{Mailbox, MailboxEntry};
pub use orchestrator::{SwarmOrchestrator, SwarmOutcome};
pub use preset::{Preset, RoleSpec};
