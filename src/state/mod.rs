//! Durable session state: the single source of truth for counters.

mod store;
mod writer;

use serde::{Deserialize, Serialize};

use crate::error::{ForemanError, Result};

fn state_err(msg: impl std::fmt::Display) -> ForemanError {
    ForemanError::State(msg.to_string())
}

fn state_err_with<E: std::fmt::Display>(context: &str, err: E) -> ForemanError {
    ForemanError::State(format!("{}: {}", context, err))
}

fn unavailable(msg: &str) -> ForemanError {
    ForemanError::PersistenceUnavailable(msg.to_string())
}

/// Terminal outcome recorded for a group: either every worker succeeded or
/// the group exhausted its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed,
    PartialFailure,
}

impl CompletionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::PartialFailure => "partial_failure",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "completed" => Ok(Self::Completed),
            "partial_failure" => Ok(Self::PartialFailure),
            other => Err(state_err(format!("Unknown completion outcome: {}", other))),
        }
    }
}

/// Result of a durable compare-and-increment on a phase counter.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRecord {
    pub completed: u32,
    pub required: u32,
    pub duplicate: bool,
}

impl CompletionRecord {
    pub fn is_phase_complete(&self) -> bool {
        self.completed == self.required
    }
}

pub use store::StateStore;
