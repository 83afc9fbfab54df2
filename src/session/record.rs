//! The persisted per-session record used for resume.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::SessionStatus;
use crate::error::Result;
use crate::selector::Tier;
use crate::state::StateStore;

const RECORD_KEY: &str = "session/record";

/// Everything the engine needs to re-enter a session after interruption:
/// current phase index, per-phase counts, per-worker tier and attempt
/// history, and the accumulated budget cost. Reloading this record and
/// re-entering the dispatcher loop reproduces the pre-interruption state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub status: SessionStatus,
    pub current_phase: u32,
    #[serde(default)]
    pub phases: Vec<PhaseProgress>,
    #[serde(default)]
    pub workers: HashMap<String, WorkerHistory>,
    pub accumulated_cost: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub index: u32,
    pub required: u32,
    pub completed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHistory {
    pub role: String,
    pub tier: Tier,
    pub attempts: u32,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: SessionStatus::Running,
            current_phase: 0,
            phases: Vec::new(),
            workers: HashMap::new(),
            accumulated_cost: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn load(store: &StateStore, session_id: &str) -> Result<Option<Self>> {
        store.get_json(session_id, RECORD_KEY).await
    }

    pub async fn save(&mut self, store: &StateStore) -> Result<()> {
        self.updated_at = Utc::now();
        store.put_json(&self.id, RECORD_KEY, self).await
    }

    pub fn record_phase(&mut self, index: u32, required: u32, completed: u32) {
        match self.phases.iter_mut().find(|p| p.index == index) {
            Some(p) => {
                p.required = required;
                p.completed = completed;
            }
            None => self.phases.push(PhaseProgress {
                index,
                required,
                completed,
            }),
        }
    }

    pub fn record_worker(&mut self, worker_id: &str, role: &str, tier: Tier, attempts: u32) {
        self.workers.insert(
            worker_id.to_string(),
            WorkerHistory {
                role: role.to_string(),
                tier,
                attempts,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("state.db")).unwrap();

        let mut record = SessionRecord::new("s-1");
        record.current_phase = 2;
        record.accumulated_cost = 14;
        record.record_phase(0, 4, 4);
        record.record_phase(1, 2, 1);
        record.record_worker("w-1", "developer", Tier::Standard, 3);
        record.save(&store).await.unwrap();

        let loaded = SessionRecord::load(&store, "s-1").await.unwrap().unwrap();
        assert_eq!(loaded.current_phase, 2);
        assert_eq!(loaded.accumulated_cost, 14);
        assert_eq!(loaded.phases.len(), 2);
        assert_eq!(loaded.workers["w-1"].attempts, 3);
        assert_eq!(loaded.workers["w-1"].tier, Tier::Standard);
    }

    #[tokio::test]
    async fn test_missing_record_is_none() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("state.db")).unwrap();
        assert!(SessionRecord::load(&store, "nope").await.unwrap().is_none());
    }

    #[test]
    fn test_record_phase_updates_in_place() {
        let mut record = SessionRecord::new("s-1");
        record.record_phase(0, 4, 1);
        record.record_phase(0, 4, 3);
        assert_eq!(record.phases.len(), 1);
        assert_eq!(record.phases[0].completed, 3);
    }
}
