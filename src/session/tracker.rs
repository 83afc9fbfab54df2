//! Phase progress tracking backed by the durable store.

use tracing::{debug, warn};

use super::types::SessionStatus;
use crate::error::Result;
use crate::state::{CompletionOutcome, CompletionRecord, StateStore};

/// Tracks how many task groups of each phase reached a terminal outcome.
///
/// Every read and write goes through the [`StateStore`]; the tracker holds
/// no counter of its own. Completion reporting is idempotent per
/// `(phase, group_id)`: a duplicate report returns the existing count and
/// is logged as an advisory, never an error.
pub struct PhaseTracker {
    store: StateStore,
    session_id: String,
}

impl PhaseTracker {
    pub fn new(store: StateStore, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn init(&self, phase: u32, required_count: u32) -> Result<()> {
        self.store
            .init_phase(&self.session_id, phase, required_count)
            .await
    }

    pub async fn report_group_complete(
        &self,
        phase: u32,
        group_id: &str,
        outcome: CompletionOutcome,
    ) -> Result<CompletionRecord> {
        let record = self
            .store
            .record_group_complete(&self.session_id, phase, group_id, outcome)
            .await?;

        if record.duplicate {
            warn!(
                session_id = %self.session_id,
                phase,
                group_id,
                completed = record.completed,
                "Duplicate completion report absorbed"
            );
        } else {
            debug!(
                session_id = %self.session_id,
                phase,
                group_id,
                completed = record.completed,
                required = record.required,
                "Group counted"
            );
        }

        Ok(record)
    }

    pub async fn is_phase_complete(&self, phase: u32) -> Result<bool> {
        let (required, completed) = self.counts(phase).await?;
        Ok(completed == required)
    }

    /// Returns `(required, completed)` for an initialized phase.
    pub async fn counts(&self, phase: u32) -> Result<(u32, u32)> {
        self.store
            .phase_counts(&self.session_id, phase)
            .await?
            .ok_or(crate::error::ForemanError::PhaseNotInitialized(phase))
    }

    /// Terminal groups of a phase, for resume: these must not be
    /// re-dispatched.
    pub async fn completed_groups(
        &self,
        phase: u32,
    ) -> Result<Vec<(String, CompletionOutcome)>> {
        self.store.completed_groups(&self.session_id, phase).await
    }

    pub async fn set_status(&self, status: SessionStatus) -> Result<()> {
        self.store
            .put(&self.session_id, "session/status", status.to_string().as_str())
            .await
    }
}
