//! Budget-aware parallel dispatch of a phase's task groups.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::signal::SignalHandler;
use crate::budget::{BudgetMonitor, Pressure};
use crate::error::{ForemanError, Result};
use crate::output::{CapsuleWriter, PhaseSummary};
use crate::selector::{ModelSelector, Tier};
use crate::session::{GroupPlan, GroupStatus, PhasePlan, PhaseTracker, WorkerSpec};
use crate::state::CompletionOutcome;
use crate::worker::{SpawnRequest, WorkerReport, WorkerRuntime};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub max_parallel_groups: usize,
    pub group_timeout_secs: u64,
    /// Attempts per worker before its group is marked a partial failure.
    pub retry_ceiling: u32,
    /// Approximate cost charged per group dispatch.
    pub dispatch_cost: u64,
    /// Fixed overhead charged per terminal group report.
    pub report_cost: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_parallel_groups: 4,
            group_timeout_secs: 300,
            retry_ceiling: 3,
            dispatch_cost: 1,
            report_cost: 1,
        }
    }
}

/// Per-phase dispatch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseRunState {
    Pending,
    Dispatched,
    AwaitingReports,
    Complete,
    PartialFailure,
}

impl std::fmt::Display for PhaseRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::AwaitingReports => "awaiting_reports",
            Self::Complete => "complete",
            Self::PartialFailure => "partial_failure",
        };
        write!(f, "{}", s)
    }
}

/// One worker's final standing within a group run.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub worker_id: String,
    pub role: String,
    pub tier: Tier,
    pub attempts: u32,
    pub report: WorkerReport,
}

/// Terminal report for one group.
#[derive(Debug, Clone)]
pub struct GroupReport {
    pub group_id: String,
    pub status: GroupStatus,
    pub workers: Vec<WorkerOutcome>,
    /// Cut short by a session abort rather than a genuine terminal
    /// outcome; never counted, so resume re-dispatches the group.
    pub aborted: bool,
}

impl GroupReport {
    fn outcome(&self) -> CompletionOutcome {
        match self.status {
            GroupStatus::Completed => CompletionOutcome::Completed,
            _ => CompletionOutcome::PartialFailure,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: u32,
    pub state: PhaseRunState,
    pub completed: u32,
    pub required: u32,
    pub succeeded: u32,
    pub failed_groups: Vec<String>,
    pub capsule: Option<String>,
    /// Reports collected this run; groups counted before a resume are not
    /// re-reported here.
    pub reports: Vec<GroupReport>,
}

impl PhaseResult {
    pub fn is_clean(&self) -> bool {
        self.state == PhaseRunState::Complete
    }
}

/// Spawns the groups of a phase in parallel, collects their terminal
/// reports in whatever order they arrive, counts each through the tracker
/// exactly once, and emits a single aggregated capsule for the phase.
pub struct Dispatcher {
    runtime: Arc<dyn WorkerRuntime>,
    tracker: Arc<PhaseTracker>,
    selector: Arc<ModelSelector>,
    budget: Arc<BudgetMonitor>,
    capsules: Arc<CapsuleWriter>,
    signals: SignalHandler,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        runtime: Arc<dyn WorkerRuntime>,
        tracker: Arc<PhaseTracker>,
        selector: Arc<ModelSelector>,
        budget: Arc<BudgetMonitor>,
        capsules: Arc<CapsuleWriter>,
        signals: SignalHandler,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            runtime,
            tracker,
            selector,
            budget,
            capsules,
            signals,
            config,
        }
    }

    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    pub async fn run_phase(&self, plan: &PhasePlan) -> Result<PhaseResult> {
        let phase = plan.index;
        let mut state = PhaseRunState::Pending;
        debug!(phase, state = %state, "Phase entered");

        self.tracker.init(phase, plan.required_count()).await?;

        // Groups already counted (a resumed session) are not re-dispatched.
        let already: HashSet<String> = self
            .tracker
            .completed_groups(phase)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let remaining: Vec<GroupPlan> = plan
            .groups
            .iter()
            .filter(|g| !already.contains(&g.id))
            .cloned()
            .collect();

        if !already.is_empty() {
            info!(
                phase,
                resumed = already.len(),
                remaining = remaining.len(),
                "Resuming phase with persisted completions"
            );
        }

        // Fan-out width is decided once per phase, not re-evaluated
        // mid-flight.
        let width = match self.budget.pressure() {
            Pressure::Compact => (self.config.max_parallel_groups / 2).max(1),
            _ => self.config.max_parallel_groups,
        };
        let semaphore = Arc::new(Semaphore::new(width));

        state = PhaseRunState::Dispatched;
        debug!(phase, width, groups = remaining.len(), state = %state, "Groups dispatched");

        let mut join_set: JoinSet<Result<GroupReport>> = JoinSet::new();
        for group in remaining {
            self.budget.charge(self.config.dispatch_cost).await?;

            let semaphore = Arc::clone(&semaphore);
            let runtime = Arc::clone(&self.runtime);
            let selector = Arc::clone(&self.selector);
            let signals = self.signals.clone();
            let config = self.config.clone();
            let session_id = self.tracker.session_id().to_string();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ForemanError::State(format!("Dispatch semaphore closed: {}", e)))?;
                Self::run_group(runtime, selector, signals, config, session_id, phase, group).await
            });
        }

        state = PhaseRunState::AwaitingReports;
        debug!(phase, state = %state, "Awaiting terminal reports");

        // Arrival order is whatever it is; each report is counted durably
        // before the next is awaited.
        let mut reports = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let report =
                joined.map_err(|e| ForemanError::State(format!("Group task failed: {}", e)))??;

            if report.aborted {
                debug!(
                    phase,
                    group_id = %report.group_id,
                    "Group cut short by abort; not counted"
                );
                reports.push(report);
                continue;
            }

            let record = self
                .tracker
                .report_group_complete(phase, &report.group_id, report.outcome())
                .await?;
            self.budget.charge(self.config.report_cost).await?;

            debug!(
                phase,
                group_id = %report.group_id,
                status = %report.status,
                completed = record.completed,
                required = record.required,
                "Group report collected"
            );
            reports.push(report);
        }

        if self.signals.is_aborted() {
            // Persisted counts stay valid; the session resumes from them.
            warn!(phase, "Abort observed; halting phase advancement");
            return Err(ForemanError::Aborted);
        }

        let (required, completed) = self.tracker.counts(phase).await?;
        let terminal = self.tracker.completed_groups(phase).await?;
        let failed_groups: Vec<String> = terminal
            .iter()
            .filter(|(_, outcome)| *outcome == CompletionOutcome::PartialFailure)
            .map(|(id, _)| id.clone())
            .collect();
        let succeeded = completed - failed_groups.len() as u32;

        let state = if failed_groups.is_empty() {
            PhaseRunState::Complete
        } else {
            PhaseRunState::PartialFailure
        };

        // One aggregated capsule per phase; its form follows the pressure
        // read once, here.
        let pressure = self.budget.pressure();
        let capsule = self.capsules.emit(
            &PhaseSummary {
                session_id: self.tracker.session_id().to_string(),
                phase,
                completed,
                required,
                succeeded,
                failed: failed_groups.len() as u32,
                accumulated_cost: self.budget.accumulated(),
                ceiling: self.budget.ceiling(),
            },
            pressure,
        );

        info!(phase, state = %state, completed, required, "Phase terminal");

        Ok(PhaseResult {
            phase,
            state,
            completed,
            required,
            succeeded,
            failed_groups,
            capsule,
            reports,
        })
    }

    /// Runs one group to a terminal state: workers in parallel, failed
    /// workers re-queued at their (possibly escalated) tier until the
    /// retry ceiling, a timed-out attempt treated as a failure of every
    /// still-pending worker.
    async fn run_group(
        runtime: Arc<dyn WorkerRuntime>,
        selector: Arc<ModelSelector>,
        signals: SignalHandler,
        config: DispatcherConfig,
        session_id: String,
        phase: u32,
        group: GroupPlan,
    ) -> Result<GroupReport> {
        let timeout = Duration::from_secs(config.group_timeout_secs);
        let mut attempts: HashMap<String, u32> = HashMap::new();
        let mut finished: Vec<WorkerOutcome> = Vec::new();
        let mut exhausted: Vec<WorkerOutcome> = Vec::new();
        let mut pending: Vec<WorkerSpec> = group.workers.clone();
        let mut aborted = false;

        while !pending.is_empty() {
            if signals.is_aborted() {
                aborted = true;
                for spec in pending.drain(..) {
                    let attempt = attempts.get(&spec.id).copied().unwrap_or(0);
                    let tier = selector.tier_for(&spec.role)?;
                    exhausted.push(WorkerOutcome {
                        worker_id: spec.id.clone(),
                        role: spec.role.clone(),
                        tier,
                        attempts: attempt,
                        report: WorkerReport::failure(&spec.id, "session aborted"),
                    });
                }
                break;
            }

            let mut round = Vec::with_capacity(pending.len());
            for spec in pending.drain(..) {
                let attempt = attempts.entry(spec.id.clone()).or_insert(0);
                *attempt += 1;
                let tier = selector.tier_for(&spec.role)?;
                round.push((spec, tier, *attempt));
            }

            let calls = round.iter().map(|(spec, tier, attempt)| {
                runtime.spawn(SpawnRequest {
                    session_id: session_id.clone(),
                    phase,
                    group_id: group.id.clone(),
                    worker_id: spec.id.clone(),
                    role: spec.role.clone(),
                    tier: *tier,
                    attempt: *attempt,
                    payload: spec.payload.clone(),
                })
            });

            match tokio::time::timeout(timeout, futures::future::join_all(calls)).await {
                Ok(results) => {
                    for ((spec, tier, attempt), result) in round.into_iter().zip(results) {
                        let report = match result {
                            Ok(report) => report,
                            Err(e) => WorkerReport::failure(&spec.id, e.to_string()),
                        };

                        if report.is_success() {
                            selector.record_success(&spec.id);
                            finished.push(WorkerOutcome {
                                worker_id: spec.id,
                                role: spec.role,
                                tier,
                                attempts: attempt,
                                report,
                            });
                            continue;
                        }

                        selector.record_failure(&spec.role, &spec.id, attempt);
                        if attempt >= config.retry_ceiling {
                            warn!(
                                group_id = %group.id,
                                worker_id = %spec.id,
                                attempts = attempt,
                                "Worker exhausted retry ceiling"
                            );
                            exhausted.push(WorkerOutcome {
                                worker_id: spec.id,
                                role: spec.role,
                                tier,
                                attempts: attempt,
                                report,
                            });
                        } else {
                            pending.push(spec);
                        }
                    }
                }
                Err(_) => {
                    // No terminal report in the window: identical to a
                    // worker failure for retry purposes.
                    warn!(
                        group_id = %group.id,
                        timeout_secs = config.group_timeout_secs,
                        "Group attempt timed out"
                    );
                    for (spec, tier, attempt) in round {
                        selector.record_failure(&spec.role, &spec.id, attempt);
                        let timed_out = ForemanError::GroupTimeout {
                            group_id: group.id.clone(),
                            timeout_secs: config.group_timeout_secs,
                        };
                        let report = WorkerReport::failure(&spec.id, timed_out.to_string());
                        if attempt >= config.retry_ceiling {
                            exhausted.push(WorkerOutcome {
                                worker_id: spec.id,
                                role: spec.role,
                                tier,
                                attempts: attempt,
                                report,
                            });
                        } else {
                            pending.push(spec);
                        }
                    }
                }
            }
        }

        let status = if exhausted.is_empty() {
            GroupStatus::Completed
        } else {
            GroupStatus::Failed
        };

        let mut workers = finished;
        workers.extend(exhausted);

        Ok(GroupReport {
            group_id: group.id,
            status,
            workers,
            aborted,
        })
    }
}
