pub mod budget;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod output;
pub mod selector;
pub mod session;
pub mod state;
pub mod worker;

pub use budget::{BudgetConfig, BudgetMonitor, BudgetSnapshot, Pressure};
pub use config::{ConfigResolver, ForemanConfig, HintSheet, SeedConfig, ToolMode};
pub use dispatch::{Dispatcher, DispatcherConfig, PhaseResult, PhaseRunState, SignalHandler};
pub use engine::{SessionEngine, SessionReport};
pub use error::{ForemanError, Result};
pub use gateway::{Capability, CapabilityCost, CapabilityOutput, Invocation, ToolGateway};
pub use output::{CapsuleFormat, CapsuleWriter, OutputConfig, PhaseSummary};
pub use selector::{Escalation, EscalationRule, ModelSelector, SelectorConfig, Tier, TierAssignments};
pub use session::{
    GroupPlan, GroupStatus, PhasePlan, PhaseTracker, SessionPlan, SessionRecord, SessionStatus,
    WorkerSpec,
};
pub use state::{CompletionOutcome, CompletionRecord, StateStore};
pub use worker::{SpawnRequest, WorkerReport, WorkerRuntime, WorkerStatus};
