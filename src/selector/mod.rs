//! Role-to-tier assignment with failure-driven escalation.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ForemanError, Result};

/// Cost/capability tiers, ordered cheapest first.
///
/// Escalation moves strictly upward via `next()`; there is no path back
/// down within a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Economy,
    Standard,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Economy => "economy",
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            Self::Economy => Some(Self::Standard),
            Self::Standard => Some(Self::Premium),
            Self::Premium => None,
        }
    }

    pub fn top() -> Self {
        Self::Premium
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Escalation rule loaded from the seed: after `failure_threshold`
/// consecutive failures of one worker identity, the role moves to
/// `target` (or one tier up when no rule names a target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub role: String,
    pub failure_threshold: u32,
    #[serde(default)]
    pub target: Option<Tier>,
}

/// The resolved role → tier table handed to the selector at session
/// start. Mutable only through escalation events after that.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierAssignments {
    pub roles: HashMap<String, Tier>,
    #[serde(default)]
    pub pinned: HashSet<String>,
    #[serde(default)]
    pub rules: Vec<EscalationRule>,
}

impl TierAssignments {
    pub fn assign(mut self, role: impl Into<String>, tier: Tier) -> Self {
        self.roles.insert(role.into(), tier);
        self
    }

    pub fn pin(mut self, role: impl Into<String>) -> Self {
        let role = role.into();
        self.roles.insert(role.clone(), Tier::top());
        self.pinned.insert(role);
        self
    }

    pub fn with_rule(mut self, rule: EscalationRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// A tier raise that actually happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub role: String,
    pub from: Tier,
    pub to: Tier,
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Consecutive failures of one worker identity before its role
    /// escalates, when no seed rule overrides it.
    pub default_failure_threshold: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            default_failure_threshold: 2,
        }
    }
}

/// Maps worker roles to cost tiers and applies the escalation policy.
///
/// Pinned roles always resolve to the top tier and never move. All other
/// roles start at their seeded tier and escalate monotonically: once
/// raised, a role never de-escalates within the session. `record_failure`
/// deduplicates on `(worker_id, attempt)` so a retried failure report
/// cannot double-count.
pub struct ModelSelector {
    assignments: RwLock<HashMap<String, Tier>>,
    pinned: HashSet<String>,
    rules: HashMap<String, EscalationRule>,
    default_threshold: u32,
    consecutive: RwLock<HashMap<String, u32>>,
    seen_failures: RwLock<HashSet<(String, u32)>>,
}

impl ModelSelector {
    pub fn new(assignments: TierAssignments, config: &SelectorConfig) -> Result<Self> {
        if config.default_failure_threshold == 0 {
            return Err(ForemanError::Config(
                "default_failure_threshold must be greater than 0".into(),
            ));
        }

        for pinned in &assignments.pinned {
            if !assignments.roles.contains_key(pinned) {
                return Err(ForemanError::UnknownRole(pinned.clone()));
            }
        }

        let rules = assignments
            .rules
            .iter()
            .map(|r| {
                if !assignments.roles.contains_key(&r.role) {
                    return Err(ForemanError::UnknownRole(r.role.clone()));
                }
                if r.failure_threshold == 0 {
                    return Err(ForemanError::Config(format!(
                        "Escalation threshold for role '{}' must be greater than 0",
                        r.role
                    )));
                }
                Ok((r.role.clone(), r.clone()))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            assignments: RwLock::new(assignments.roles),
            pinned: assignments.pinned,
            rules,
            default_threshold: config.default_failure_threshold,
            consecutive: RwLock::new(HashMap::new()),
            seen_failures: RwLock::new(HashSet::new()),
        })
    }

    /// Current tier for a role. Unknown roles fail fast rather than
    /// silently defaulting.
    pub fn tier_for(&self, role: &str) -> Result<Tier> {
        if self.pinned.contains(role) {
            return Ok(Tier::top());
        }
        self.assignments
            .read()
            .get(role)
            .copied()
            .ok_or_else(|| ForemanError::UnknownRole(role.to_string()))
    }

    pub fn is_pinned(&self, role: &str) -> bool {
        self.pinned.contains(role)
    }

    /// Records one terminal failure of `worker_id` on `attempt`. Returns
    /// the escalation applied, if the consecutive-failure threshold was
    /// reached. Duplicate reports for the same attempt are no-ops.
    pub fn record_failure(&self, role: &str, worker_id: &str, attempt: u32) -> Option<Escalation> {
        if !self.seen_failures.write().insert((worker_id.to_string(), attempt)) {
            debug!(worker_id, attempt, "Duplicate failure report ignored");
            return None;
        }

        if self.pinned.contains(role) {
            return None;
        }

        let count = {
            let mut consecutive = self.consecutive.write();
            let count = consecutive.entry(worker_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let threshold = self
            .rules
            .get(role)
            .map(|r| r.failure_threshold)
            .unwrap_or(self.default_threshold);

        if count < threshold {
            return None;
        }

        let mut assignments = self.assignments.write();
        let current = *assignments.get(role)?;
        let target = self
            .rules
            .get(role)
            .and_then(|r| r.target)
            .or_else(|| current.next())?;

        // Monotonic: never lower an already-raised role.
        if target <= current {
            return None;
        }

        assignments.insert(role.to_string(), target);
        self.consecutive.write().remove(worker_id);

        info!(role, worker_id, from = %current, to = %target, "Role escalated");

        Some(Escalation {
            role: role.to_string(),
            from: current,
            to: target,
            worker_id: worker_id.to_string(),
        })
    }

    /// A success breaks the consecutive-failure streak for the worker.
    pub fn record_success(&self, worker_id: &str) {
        self.consecutive.write().remove(worker_id);
    }

    /// Snapshot of the current role → tier table.
    pub fn assignments(&self) -> HashMap<String, Tier> {
        self.assignments.read().clone()
    }
}
