//! Session control flow: config resolution, sequential phases, resume.

use std::sync::Arc;

use tracing::{info, warn};

use crate::budget::BudgetMonitor;
use crate::config::{ConfigResolver, ForemanConfig, HintSheet, SeedConfig};
use crate::dispatch::{Dispatcher, PhaseResult, SignalHandler};
use crate::error::{ForemanError, Result};
use crate::gateway::{Capability, ToolGateway};
use crate::output::CapsuleWriter;
use crate::selector::ModelSelector;
use crate::session::{PhaseTracker, SessionPlan, SessionRecord, SessionStatus};
use crate::state::StateStore;
use crate::worker::WorkerRuntime;

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub phases: Vec<PhaseResult>,
    pub total_cost: u64,
}

/// Owns one session's control flow.
///
/// Phases run strictly sequentially: phase N+1 never starts before phase N
/// is terminal. Between phases the session record is persisted, so an
/// interrupted session re-enters exactly where the counters say it
/// stopped. An abort halts advancement after the current phase's in-flight
/// groups wind down; the persisted counts stay valid.
pub struct SessionEngine {
    store: StateStore,
    config: ForemanConfig,
    seed: SeedConfig,
    hints: HintSheet,
    runtime: Arc<dyn WorkerRuntime>,
    capabilities: Vec<Arc<dyn Capability>>,
    signals: SignalHandler,
}

impl SessionEngine {
    pub fn new(
        store: StateStore,
        config: ForemanConfig,
        seed: SeedConfig,
        runtime: Arc<dyn WorkerRuntime>,
    ) -> Self {
        Self {
            store,
            config,
            seed,
            hints: HintSheet::default(),
            runtime,
            capabilities: Vec::new(),
            signals: SignalHandler::new(),
        }
    }

    /// Loads the seed (and optional hint sheet) from the paths in the
    /// configuration.
    pub async fn from_paths(
        store: StateStore,
        config: ForemanConfig,
        runtime: Arc<dyn WorkerRuntime>,
    ) -> Result<Self> {
        let seed = SeedConfig::load(&config.seed.seed_path).await?;
        let hints = match &config.seed.hints_path {
            Some(path) => HintSheet::load(path).await?,
            None => HintSheet::default(),
        };
        Ok(Self {
            store,
            config,
            seed,
            hints,
            runtime,
            capabilities: Vec::new(),
            signals: SignalHandler::new(),
        })
    }

    pub fn with_hints(mut self, hints: HintSheet) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Shared abort flag; `abort()` on it stops phase advancement.
    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    /// Runs the plan to a terminal status. A session that already has a
    /// persisted record resumes: phases the counters call complete are
    /// skipped and partially-counted phases re-dispatch only their
    /// remaining groups.
    pub async fn run(&self, plan: &SessionPlan) -> Result<SessionReport> {
        let session_id = plan.id.clone();
        let resolver = ConfigResolver::new(self.store.clone(), &session_id, self.seed.clone());

        let assignments = resolver.tier_assignments().await?;
        let tool_mode = resolver.tool_mode().await?;

        // Hint mismatches are cosmetic; they are logged and dropped.
        let advisories = resolver.check_hints(&self.hints).await?;
        if !advisories.is_empty() {
            warn!(count = advisories.len(), "Hint sheet disagrees with resolved config");
        }

        let selector = Arc::new(ModelSelector::new(assignments, &self.config.selector)?);
        let budget = Arc::new(
            BudgetMonitor::resume(self.store.clone(), &session_id, self.config.budget.clone())
                .await?,
        );

        let mut gateway = ToolGateway::new(Arc::clone(&budget), tool_mode);
        for capability in &self.capabilities {
            gateway.register(Arc::clone(capability))?;
        }
        self.runtime.attach_gateway(Arc::new(gateway));

        let tracker = Arc::new(PhaseTracker::new(self.store.clone(), &session_id));
        let capsules = Arc::new(CapsuleWriter::new(self.config.output.clone()));
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.runtime),
            Arc::clone(&tracker),
            Arc::clone(&selector),
            Arc::clone(&budget),
            capsules,
            self.signals.clone(),
            self.config.dispatcher.clone(),
        );

        let mut record = match SessionRecord::load(&self.store, &session_id).await? {
            Some(record) if record.status.is_terminal() => {
                return Err(ForemanError::InvalidTransition {
                    from: record.status.to_string(),
                    to: SessionStatus::Running.to_string(),
                    allowed: "none".into(),
                });
            }
            Some(record) => {
                info!(
                    session_id = %session_id,
                    phase = record.current_phase,
                    "Resuming session from persisted record"
                );
                record
            }
            None => SessionRecord::new(&session_id),
        };

        let start_phase = record.current_phase;
        let mut results = Vec::new();

        for phase_plan in plan.phases.iter().filter(|p| p.index >= start_phase) {
            if self.signals.is_aborted() {
                return self.finish(&mut record, &tracker, SessionStatus::Aborted, results, &budget)
                    .await;
            }

            match dispatcher.run_phase(phase_plan).await {
                Ok(result) => {
                    record.current_phase = phase_plan.index + 1;
                    record.record_phase(result.phase, result.required, result.completed);
                    for report in &result.reports {
                        for worker in &report.workers {
                            record.record_worker(
                                &worker.worker_id,
                                &worker.role,
                                worker.tier,
                                worker.attempts,
                            );
                        }
                    }
                    record.accumulated_cost = budget.accumulated();
                    record.save(&self.store).await?;
                    results.push(result);
                }
                Err(ForemanError::Aborted) => {
                    return self
                        .finish(&mut record, &tracker, SessionStatus::Aborted, results, &budget)
                        .await;
                }
                Err(e) => {
                    // Keep the record resumable; the counters already hold
                    // everything that was durably counted.
                    record.accumulated_cost = budget.accumulated();
                    record.save(&self.store).await?;
                    return Err(e);
                }
            }
        }

        self.finish(&mut record, &tracker, SessionStatus::Completed, results, &budget)
            .await
    }

    async fn finish(
        &self,
        record: &mut SessionRecord,
        tracker: &PhaseTracker,
        status: SessionStatus,
        phases: Vec<PhaseResult>,
        budget: &BudgetMonitor,
    ) -> Result<SessionReport> {
        record.status = status;
        record.accumulated_cost = budget.accumulated();
        record.save(&self.store).await?;
        tracker.set_status(status).await?;

        info!(
            session_id = %record.id,
            status = %status,
            total_cost = record.accumulated_cost,
            "Session terminal"
        );

        Ok(SessionReport {
            session_id: record.id.clone(),
            status,
            phases,
            total_cost: record.accumulated_cost,
        })
    }
}
