//! Swarm presets: named role lists with prompts, tiers and dependencies.

use serde::{Deserialize, Serialize};

use murmur_provider::Tier;

use crate::error::{Result, SwarmError};

/// The canonical lead role name. When present, the lead runs the final
/// synthesis step; when absent, the orchestrator merges mechanically.
pub const LEAD_ROLE: &str = "lead";

/// One role inside a preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Role name, unique within the preset (e.g. `"researcher"`).
    pub role: String,

    /// Role-specific system prompt.
    pub prompt: String,

    /// Model tier this role's calls are routed at.
    pub tier: Tier,

    /// Roles that must complete before this one starts. Empty means the
    /// role runs in the first wave.
    #[serde(default)]
    pub after: Vec<String>,
}

impl RoleSpec {
    /// Create an independent role (no dependencies).
    pub fn new(role: impl Into<String>, prompt: impl Into<String>, tier: Tier) -> Self {
        Self {
            role: role.into(),
            prompt: prompt.into(),
            tier,
            after: Vec::new(),
        }
    }

    /// Builder: declare a dependency on another role.
    pub fn after(mut self, role: impl Into<String>) -> Self {
        self.after.push(role.into());
        self
    }
}

/// A named list of roles forming one swarm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    /// Preset name (e.g. `"dev_team"`).
    pub name: String,

    /// The roles, in declaration order.
    pub roles: Vec<RoleSpec>,
}

impl Preset {
    /// Create a preset from a role list.
    pub fn new(name: impl Into<String>, roles: Vec<RoleSpec>) -> Self {
        Self {
            name: name.into(),
            roles,
        }
    }

    /// The standard development team: a lead plans, a researcher and a coder
    /// work from the plan in parallel, a reviewer checks the coder's output.
    pub fn dev_team() -> Self {
        Self::new(
            "dev_team",
            vec![
                RoleSpec::new(
                    LEAD_ROLE,
                    "You are the lead. Break the task into a short plan and call out \
                     the risks. Your plan guides the other roles.",
                    Tier::Elite,
                ),
                RoleSpec::new(
                    "researcher",
                    "You are the researcher. Gather the facts, constraints and prior \
                     art the task needs. Be concrete and cite what you relied on.",
                    Tier::Specialist,
                )
                .after(LEAD_ROLE),
                RoleSpec::new(
                    "coder",
                    "You are the coder. Produce the implementation the task asks for, \
                     following the lead's plan.",
                    Tier::Specialist,
                )
                .after(LEAD_ROLE),
                RoleSpec::new(
                    "reviewer",
                    "You are the reviewer. Check the coder's output for defects and \
                     list concrete fixes.",
                    Tier::Specialist,
                )
                .after("coder"),
            ],
        )
    }

    /// Whether this preset includes a lead role.
    pub fn has_lead(&self) -> bool {
        self.roles.iter().any(|r| r.role == LEAD_ROLE)
    }

    /// Find a role by name.
    pub fn role(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.iter().find(|r| r.role == name)
    }

    /// Compute execution waves by topologically sorting the dependency
    /// graph (Kahn's algorithm). Roles within a wave are independent and
    /// may run concurrently.
    pub fn waves(&self) -> Result<Vec<Vec<&RoleSpec>>> {
        if self.roles.is_empty() {
            return Err(SwarmError::EmptyPreset {
                preset: self.name.clone(),
            });
        }

        // Validate dependencies up front so the error names the bad edge.
        for role in &self.roles {
            for dep in &role.after {
                if self.role(dep).is_none() {
                    return Err(SwarmError::UnknownDependency {
                        role: role.role.clone(),
                        after: dep.clone(),
                    });
                }
            }
        }

        let mut remaining: Vec<&RoleSpec> = self.roles.iter().collect();
        let mut done: Vec<String> = Vec::new();
        let mut waves: Vec<Vec<&RoleSpec>> = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&RoleSpec>, Vec<&RoleSpec>) = remaining
                .into_iter()
                .partition(|r| r.after.iter().all(|dep| done.contains(dep)));

            if ready.is_empty() {
                // Nothing became ready: the rest form a cycle.
                return Err(SwarmError::DependencyCycle {
                    role: blocked[0].role.clone(),
                });
            }

            done.extend(ready.iter().map(|r| r.role.clone()));
            waves.push(ready);
            remaining = blocked;
        }

        Ok(waves)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
