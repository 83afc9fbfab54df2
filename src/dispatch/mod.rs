//! Parallel group dispatch with retry, escalation, and abort handling.

mod dispatcher;
mod signal;

pub use dispatcher::{
    Dispatcher, DispatcherConfig, GroupReport, PhaseResult, PhaseRunState, WorkerOutcome,
};
pub use signal::SignalHandler;
