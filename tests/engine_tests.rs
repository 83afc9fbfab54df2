mod fixtures;

use std::sync::Arc;

use async_trait::async_trait;
use foreman::{
    Capability, CapabilityCost, CapabilityOutput, CompletionOutcome, ForemanConfig, ForemanError,
    GroupPlan, PhasePlan, PhaseTracker, Result, SeedConfig, SessionEngine, SessionPlan,
    SessionRecord, SessionStatus, StateStore, WorkerSpec,
};
use tempfile::TempDir;

use fixtures::{Script, ScriptedRuntime};

fn seed() -> SeedConfig {
    toml::from_str(
        r#"
        tool_mode = "enabled"

        [roles.developer]
        tier = "economy"
        rationale = "bulk implementation work"

        [roles.reviewer]
        tier = "standard"

        [roles.architect]
        tier = "premium"
        pinned = true

        [[escalation]]
        role = "developer"
        failure_threshold = 2

        [routing]
        implement = "developer"
        "#,
    )
    .unwrap()
}

fn worker(id: &str, role: &str) -> WorkerSpec {
    WorkerSpec::new(role, serde_json::json!({})).with_id(id)
}

fn two_phase_plan() -> SessionPlan {
    SessionPlan::new("s-1")
        .with_phase(
            PhasePlan::new(0)
                .with_group(GroupPlan::new("g-1").with_worker(worker("w-1", "developer")))
                .with_group(GroupPlan::new("g-2").with_worker(worker("w-2", "reviewer"))),
        )
        .with_phase(
            PhasePlan::new(1).with_group(GroupPlan::new("g-3").with_worker(worker("w-3", "architect"))),
        )
}

struct SearchCap;

#[async_trait]
impl Capability for SearchCap {
    fn name(&self) -> &str {
        "search"
    }

    fn cost(&self) -> CapabilityCost {
        CapabilityCost::Fixed(3)
    }

    async fn run(&self, _args: serde_json::Value) -> Result<CapabilityOutput> {
        Ok(CapabilityOutput::fixed(serde_json::json!({"hits": 1})))
    }
}

#[tokio::test]
async fn test_session_runs_phases_sequentially_to_completion() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state.db")).unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());

    let engine = SessionEngine::new(
        store.clone(),
        ForemanConfig::default(),
        seed(),
        runtime.clone(),
    );

    let report = engine.run(&two_phase_plan()).await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.phases.len(), 2);
    assert!(report.phases.iter().all(|p| p.is_clean()));

    // Phase 1 never started before phase 0 was terminal.
    let log = runtime.spawn_log();
    let last_phase0 = log.iter().rposition(|r| r.phase == 0).unwrap();
    let first_phase1 = log.iter().position(|r| r.phase == 1).unwrap();
    assert!(last_phase0 < first_phase1);

    let record = SessionRecord::load(&store, "s-1").await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
    assert_eq!(record.current_phase, 2);
    assert_eq!(record.workers["w-1"].attempts, 1);
    assert_eq!(record.accumulated_cost, report.total_cost);
}

#[tokio::test]
async fn test_resume_requests_only_remaining_groups() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state.db")).unwrap();

    // Interrupted earlier: 2 of 4 phase-0 groups already counted.
    let tracker = PhaseTracker::new(store.clone(), "s-1");
    tracker.init(0, 4).await.unwrap();
    tracker
        .report_group_complete(0, "g-1", CompletionOutcome::Completed)
        .await
        .unwrap();
    tracker
        .report_group_complete(0, "g-2", CompletionOutcome::Completed)
        .await
        .unwrap();
    SessionRecord::new("s-1").save(&store).await.unwrap();

    let plan = SessionPlan::new("s-1")
        .with_phase(
            PhasePlan::new(0)
                .with_group(GroupPlan::new("g-1").with_worker(worker("w-1", "developer")))
                .with_group(GroupPlan::new("g-2").with_worker(worker("w-2", "developer")))
                .with_group(GroupPlan::new("g-3").with_worker(worker("w-3", "developer")))
                .with_group(GroupPlan::new("g-4").with_worker(worker("w-4", "developer"))),
        )
        .with_phase(
            PhasePlan::new(1).with_group(GroupPlan::new("g-5").with_worker(worker("w-5", "developer"))),
        );

    let runtime = Arc::new(ScriptedRuntime::new());
    let engine = SessionEngine::new(
        store.clone(),
        ForemanConfig::default(),
        seed(),
        runtime.clone(),
    );

    let report = engine.run(&plan).await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    // Exactly the two remaining phase-0 groups plus phase 1.
    assert_eq!(runtime.dispatched_groups(), vec!["g-3", "g-4", "g-5"]);
    assert!(runtime.spawns_for("w-1").is_empty());
    assert!(runtime.spawns_for("w-2").is_empty());
}

#[tokio::test]
async fn test_abort_before_start_leaves_resumable_record() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state.db")).unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());

    let engine = SessionEngine::new(
        store.clone(),
        ForemanConfig::default(),
        seed(),
        runtime.clone(),
    );
    engine.signals().abort();

    let report = engine.run(&two_phase_plan()).await.unwrap();

    assert_eq!(report.status, SessionStatus::Aborted);
    assert!(runtime.spawn_log().is_empty());

    let record = SessionRecord::load(&store, "s-1").await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Aborted);
}

#[tokio::test]
async fn test_mid_phase_abort_reports_aborted_session() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state.db")).unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());

    let engine = SessionEngine::new(
        store.clone(),
        ForemanConfig::default(),
        seed(),
        runtime.clone(),
    );
    runtime.script("w-2", Script::AbortThenFail(100, engine.signals().clone()));

    let report = engine.run(&two_phase_plan()).await.unwrap();

    assert_eq!(report.status, SessionStatus::Aborted);
    // Phase 1 never started.
    assert!(runtime.spawn_log().iter().all(|r| r.phase == 0));
}

#[tokio::test]
async fn test_terminal_session_refuses_to_rerun() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state.db")).unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());

    let plan = two_phase_plan();
    let engine = SessionEngine::new(
        store.clone(),
        ForemanConfig::default(),
        seed(),
        runtime.clone(),
    );
    engine.run(&plan).await.unwrap();

    let again = SessionEngine::new(store, ForemanConfig::default(), seed(), runtime);
    let err = again.run(&plan).await.unwrap_err();
    assert!(matches!(err, ForemanError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_capability_calls_charged_through_gateway() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state.db")).unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());
    runtime.invoke_on_spawn("search");

    let plan = SessionPlan::new("s-1").with_phase(
        PhasePlan::new(0).with_group(GroupPlan::new("g-1").with_worker(worker("w-1", "developer"))),
    );

    let engine = SessionEngine::new(
        store,
        ForemanConfig::default(),
        seed(),
        runtime.clone(),
    )
    .with_capability(Arc::new(SearchCap));

    let report = engine.run(&plan).await.unwrap();

    // dispatch (1) + capability (3) + report (1)
    assert_eq!(report.total_cost, 5);
}

#[tokio::test]
async fn test_empty_seed_fails_session_start() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state.db")).unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());

    let engine = SessionEngine::new(
        store,
        ForemanConfig::default(),
        SeedConfig::default(),
        runtime,
    );

    // Tier assignments resolve to an empty table, so the first unknown
    // role fails the dispatch; tool_mode still resolves from defaults.
    let err = engine.run(&two_phase_plan()).await.unwrap_err();
    assert!(matches!(err, ForemanError::UnknownRole(_)));
}

#[tokio::test]
async fn test_escalated_tier_recorded_in_history() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state.db")).unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());
    runtime.script("w-1", Script::FailTimes(2));

    let plan = SessionPlan::new("s-1").with_phase(
        PhasePlan::new(0).with_group(GroupPlan::new("g-1").with_worker(worker("w-1", "developer"))),
    );

    let engine = SessionEngine::new(
        store.clone(),
        ForemanConfig::default(),
        seed(),
        runtime,
    );
    engine.run(&plan).await.unwrap();

    let record = SessionRecord::load(&store, "s-1").await.unwrap().unwrap();
    let history = &record.workers["w-1"];
    assert_eq!(history.attempts, 3);
    assert_eq!(history.tier, foreman::Tier::Standard);
}
