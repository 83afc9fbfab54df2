//! Session planning and durable progress tracking.

mod record;
mod tracker;
mod types;

pub use record::{PhaseProgress, SessionRecord, WorkerHistory};
pub use tracker::PhaseTracker;
pub use types::{GroupPlan, GroupStatus, PhasePlan, SessionPlan, SessionStatus, WorkerSpec};
