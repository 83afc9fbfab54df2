//! Static configuration seed: the fallback behind the live store.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{ForemanError, Result};
use crate::selector::{EscalationRule, Tier, TierAssignments};

/// Whether capability invocations are available this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    #[default]
    Enabled,
    Disabled,
}

impl std::fmt::Display for ToolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// One role entry in the seed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSeed {
    pub tier: Tier,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub pinned: bool,
}

/// The parsed seed file.
///
/// Expected layout:
/// ```toml
/// tool_mode = "enabled"
///
/// [roles.developer]
/// tier = "economy"
/// rationale = "bulk implementation work"
///
/// [roles.architect]
/// tier = "premium"
/// pinned = true
///
/// [[escalation]]
/// role = "developer"
/// failure_threshold = 2
///
/// [routing]
/// implement = "developer"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub roles: HashMap<String, RoleSeed>,
    pub escalation: Vec<EscalationRule>,
    pub routing: HashMap<String, String>,
    pub tool_mode: ToolMode,
}

/// The executable lookup interface of the resolution chain. Implemented
/// by the seed only. The documentation hint sheet deliberately does not
/// implement this, so it cannot be consulted for resolution.
pub trait SeedLookup {
    fn entry(&self, key: &str) -> Option<serde_json::Value>;
}

impl SeedConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            ForemanError::Config(format!("Failed to read seed file {}: {}", path.display(), e))
        })?;
        let seed: SeedConfig = toml::from_str(&content)?;
        seed.validate()?;
        Ok(seed)
    }

    pub fn validate(&self) -> Result<()> {
        for rule in &self.escalation {
            if !self.roles.contains_key(&rule.role) {
                return Err(ForemanError::UnknownRole(rule.role.clone()));
            }
        }
        for (category, role) in &self.routing {
            if !self.roles.contains_key(role) {
                return Err(ForemanError::Config(format!(
                    "Routing for '{}' names unknown role '{}'",
                    category, role
                )));
            }
        }
        Ok(())
    }

    /// The role → tier table the selector starts from.
    pub fn tier_assignments(&self) -> TierAssignments {
        let mut assignments = TierAssignments::default();
        for (role, seed) in &self.roles {
            if seed.pinned {
                assignments = assignments.pin(role.clone());
            } else {
                assignments = assignments.assign(role.clone(), seed.tier);
            }
        }
        for rule in &self.escalation {
            assignments = assignments.with_rule(rule.clone());
        }
        assignments
    }
}

impl SeedLookup for SeedConfig {
    fn entry(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "tiers" => serde_json::to_value(self.tier_assignments()).ok(),
            "escalation" => serde_json::to_value(&self.escalation).ok(),
            "routing" if !self.routing.is_empty() => serde_json::to_value(&self.routing).ok(),
            "tool_mode" => serde_json::to_value(self.tool_mode).ok(),
            _ => None,
        }
    }
}
