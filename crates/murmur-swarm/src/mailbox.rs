//! Swarm mailbox: the shared, append-only log workers rendezvous through.
//!
//! Each worker writes only its own entries (single-writer-per-worker) and
//! every worker can read the whole log. Entries are never rewritten; the
//! mailbox is dropped with the swarm.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One mailbox entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxEntry {
    /// The role that authored this entry.
    pub author: String,
    /// The entry text.
    pub text: String,
    /// Wall-clock timestamp. Workers must not depend on peer ordering
    /// within a wave; this is for audit, not sequencing.
    pub timestamp: DateTime<Utc>,
}

/// Append-only message log keyed by swarm id.
///
/// Cheaply cloneable (`Arc`-backed); the lock is held only for the push or
/// the snapshot copy.
#[derive(Debug, Clone)]
pub struct Mailbox {
    swarm_id: String,
    entries: Arc<Mutex<Vec<MailboxEntry>>>,
}

impl Mailbox {
    /// Create an empty mailbox for a swarm.
    pub fn new(swarm_id: impl Into<String>) -> Self {
        Self {
            swarm_id: swarm_id.into(),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The swarm this mailbox belongs to.
    pub fn swarm_id(&self) -> &str {
        &self.swarm_id
    }

    /// Append an entry authored by `role`.
    pub fn post(&self, role: impl Into<String>, text: impl Into<String>) {
        let entry = MailboxEntry {
            author: role.into(),
            text: text.into(),
            timestamp: Utc::now(),
        };
        tracing::debug!(swarm_id = %self.swarm_id, author = %entry.author, "mailbox entry posted");
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    /// Snapshot of all entries in append order.
    pub fn entries(&self) -> Vec<MailboxEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the mailbox is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the log as a transcript block for injection into a worker's
    /// system prompt. Empty string when nothing has been posted yet.
    pub fn transcript(&self) -> String {
        let entries = self.entries();
        if entries.is_empty() {
            return String::new();
        }

        let mut out = String::with_capacity(entries.len() * 200);
        for entry in &entries {
            out.push_str(&format!("[{}]\n{}\n\n", entry.author, entry.text));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
