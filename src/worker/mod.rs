//! The boundary to the external worker runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::selector::Tier;

/// Everything the runtime needs to start one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub session_id: String,
    pub phase: u32,
    pub group_id: String,
    pub worker_id: String,
    pub role: String,
    pub tier: Tier,
    pub attempt: u32,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Success,
    Failure,
}

/// Terminal report from one worker run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: String,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerReport {
    pub fn success(worker_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(worker_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::Failure,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Success
    }
}

/// Implemented by the surrounding system. The engine only ever sees
/// terminal reports; partial progress stays on the runtime's side of the
/// boundary.
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    async fn spawn(&self, request: SpawnRequest) -> Result<WorkerReport>;

    /// Handed the session's capability gateway once, before any dispatch,
    /// so spawned workers can invoke capabilities through it. Runtimes
    /// that never touch capabilities can ignore it.
    fn attach_gateway(&self, _gateway: std::sync::Arc<crate::gateway::ToolGateway>) {}
}
