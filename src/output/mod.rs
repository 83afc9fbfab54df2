//! Phase status capsules.
//!
//! Exactly one capsule per phase, emitted after every group of the phase
//! reached a terminal state. Per-group summaries are deliberately not a
//! thing here: each emitted unit carries a fixed overhead cost, so the
//! phase aggregate is the only report surface.

use std::collections::HashSet;
use std::io::{self, Write};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::budget::Pressure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: CapsuleFormat,
}

/// The aggregated summary of one completed phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub session_id: String,
    pub phase: u32,
    pub completed: u32,
    pub required: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub accumulated_cost: u64,
    pub ceiling: u64,
}

pub struct CapsuleWriter {
    config: OutputConfig,
    emitted: Mutex<HashSet<(String, u32)>>,
}

impl CapsuleWriter {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            config,
            emitted: Mutex::new(HashSet::new()),
        }
    }

    /// Renders the capsule for the given pressure. The pressure is decided
    /// by the caller once per emission; the writer never re-reads it.
    pub fn render(&self, summary: &PhaseSummary, pressure: Pressure) -> String {
        match (self.config.format, pressure) {
            // Minimal one-line form once the budget is under compact
            // pressure.
            (_, Pressure::Compact) => format!(
                "p{} {}/{}{}",
                summary.phase,
                summary.completed,
                summary.required,
                if summary.failed > 0 {
                    format!(" !{}", summary.failed)
                } else {
                    String::new()
                }
            ),
            (CapsuleFormat::Json, _) => {
                serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string())
            }
            (CapsuleFormat::Text, _) => format!(
                "phase {}: {}/{} groups ({} ok, {} failed) cost={}/{} pressure={}",
                summary.phase,
                summary.completed,
                summary.required,
                summary.succeeded,
                summary.failed,
                summary.accumulated_cost,
                summary.ceiling,
                pressure
            ),
        }
    }

    /// Emits the capsule for a phase at most once. A second emission
    /// attempt is absorbed and logged as an advisory.
    pub fn emit(&self, summary: &PhaseSummary, pressure: Pressure) -> Option<String> {
        let key = (summary.session_id.clone(), summary.phase);
        if !self.emitted.lock().insert(key) {
            warn!(
                session_id = %summary.session_id,
                phase = summary.phase,
                "Capsule for phase already emitted; suppressing duplicate"
            );
            return None;
        }

        let capsule = self.render(summary, pressure);
        info!(
            session_id = %summary.session_id,
            phase = summary.phase,
            pressure = %pressure,
            "{}",
            capsule
        );

        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", capsule);

        Some(capsule)
    }
}
