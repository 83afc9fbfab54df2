use std::fmt;

use serde::{Deserialize, Serialize};

/// Overall status of a session run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Running,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub fn allowed_transitions(&self) -> &'static [SessionStatus] {
        use SessionStatus::*;
        match self {
            Running => &[Completed, Aborted],
            Completed => &[],
            Aborted => &[],
        }
    }

    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Aborted => "Aborted",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle of a single task group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    #[default]
    Pending,
    Dispatched,
    Completed,
    Failed,
}

impl GroupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GroupStatus::Completed | GroupStatus::Failed)
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A full session plan: ordered phases, each holding the groups that may
/// run in parallel within it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPlan {
    pub id: String,
    pub phases: Vec<PhasePlan>,
}

impl SessionPlan {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phases: Vec::new(),
        }
    }

    pub fn with_phase(mut self, phase: PhasePlan) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn phase(&self, index: u32) -> Option<&PhasePlan> {
        self.phases.iter().find(|p| p.index == index)
    }
}

/// One sequential stage of the session. Groups within a phase have no
/// ordering dependency among themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasePlan {
    pub index: u32,
    pub groups: Vec<GroupPlan>,
}

impl PhasePlan {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: GroupPlan) -> Self {
        self.groups.push(group);
        self
    }

    pub fn required_count(&self) -> u32 {
        self.groups.len() as u32
    }
}

/// A unit of parallel work within a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPlan {
    pub id: String,
    pub workers: Vec<WorkerSpec>,
}

impl GroupPlan {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workers: Vec::new(),
        }
    }

    pub fn with_worker(mut self, worker: WorkerSpec) -> Self {
        self.workers.push(worker);
        self
    }
}

/// An individual task executor. The assigned tier and attempt history are
/// runtime state, tracked by the dispatcher and persisted in the session
/// record rather than in the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WorkerSpec {
    pub fn new(role: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            role: role.into(),
            payload,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_transitions() {
        assert!(SessionStatus::Running.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Running.can_transition_to(SessionStatus::Aborted));
        assert!(!SessionStatus::Completed.can_transition_to(SessionStatus::Running));
        assert!(!SessionStatus::Aborted.can_transition_to(SessionStatus::Completed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());

        assert!(GroupStatus::Completed.is_terminal());
        assert!(GroupStatus::Failed.is_terminal());
        assert!(!GroupStatus::Dispatched.is_terminal());
    }

    #[test]
    fn test_plan_builders() {
        let plan = SessionPlan::new("s-1").with_phase(
            PhasePlan::new(0)
                .with_group(
                    GroupPlan::new("g-1")
                        .with_worker(WorkerSpec::new("developer", serde_json::json!({}))),
                )
                .with_group(GroupPlan::new("g-2")),
        );

        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phase(0).unwrap().required_count(), 2);
        assert!(plan.phase(1).is_none());
    }

    #[test]
    fn test_worker_spec_generates_short_id() {
        let worker = WorkerSpec::new("reviewer", serde_json::json!({"target": "src"}));
        assert_eq!(worker.id.len(), 8);
        assert_eq!(worker.role, "reviewer");
    }
}
