//! Identity and personality snapshots.
//!
//! The identity layer is the first section of every prompt and persists
//! across sessions. It is loaded once at boot and refreshed only through an
//! explicit [`IdentityStore::reload`], which publishes a new immutable
//! snapshot; live sessions pick it up on their next message.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// The agent's persistent identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Display name used in self-reference.
    pub name: String,
    /// Who the agent is: voice, tone, persona.
    pub persona: String,
    /// Standing instructions that apply to every session.
    pub instructions: String,
}

impl Identity {
    /// A minimal default identity for tests and bare deployments.
    pub fn minimal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona: String::new(),
            instructions: String::new(),
        }
    }

    /// Render the identity as the leading prompt section.
    pub fn prompt_section(&self) -> String {
        let mut out = format!("You are {}.", self.name);
        if !self.persona.is_empty() {
            out.push_str("\n\n");
            out.push_str(&self.persona);
        }
        if !self.instructions.is_empty() {
            out.push_str("\n\n");
            out.push_str(&self.instructions);
        }
        out
    }
}

/// Published identity snapshots.
#[derive(Clone)]
pub struct IdentityStore {
    inner: Arc<RwLock<Arc<Identity>>>,
}

impl IdentityStore {
    /// Create a store with the given initial identity.
    pub fn new(identity: Identity) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(identity))),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Identity> {
        Arc::clone(&self.inner.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Publish a new snapshot.
    pub fn reload(&self, identity: Identity) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = Arc::new(identity);
        tracing::info!("identity reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_section_includes_all_layers() {
        let identity = Identity {
            name: "Murmur".into(),
            persona: "Calm and precise.".into(),
            instructions: "Prefer short answers.".into(),
        };
        let section = identity.prompt_section();
        assert!(section.starts_with("You are Murmur."));
        assert!(section.contains("Calm and precise."));
        assert!(section.contains("Prefer short answers."));
    }

    #[test]
    fn reload_does_not_mutate_held_snapshots() {
        let store = IdentityStore::new(Identity::minimal("One"));
        let held = store.snapshot();

        store.reload(Identity::minimal("Two"));
        assert_eq!(held.name, "One");
        assert_eq!(store.snapshot().name, "Two");
    }
}
