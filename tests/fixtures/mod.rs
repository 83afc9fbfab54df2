//! Scripted worker runtime for exercising dispatch without real workers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use foreman::{
    ForemanError, Result, SignalHandler, SpawnRequest, ToolGateway, WorkerReport, WorkerRuntime,
};

/// Per-worker behavior script. Outcomes key off the attempt number carried
/// in the spawn request, so retries are deterministic.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail,
    /// Fail the first `n` attempts, then succeed.
    FailTimes(u32),
    /// Sleep this long before succeeding.
    SucceedAfterMs(u64),
    /// Never report back; the dispatcher's timeout has to fire.
    Hang,
    /// Sleep, then fire the session abort and fail.
    AbortThenFail(u64, SignalHandler),
}

#[derive(Default)]
pub struct ScriptedRuntime {
    scripts: RwLock<HashMap<String, Script>>,
    spawned: Mutex<Vec<SpawnRequest>>,
    gateway: Mutex<Option<Arc<ToolGateway>>>,
    /// Capability invoked on every successful spawn, when set.
    invoke_on_spawn: Mutex<Option<String>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, worker_id: impl Into<String>, script: Script) {
        self.scripts.write().insert(worker_id.into(), script);
    }

    pub fn invoke_on_spawn(&self, capability: impl Into<String>) {
        *self.invoke_on_spawn.lock() = Some(capability.into());
    }

    pub fn spawn_log(&self) -> Vec<SpawnRequest> {
        self.spawned.lock().clone()
    }

    pub fn spawns_for(&self, worker_id: &str) -> Vec<SpawnRequest> {
        self.spawned
            .lock()
            .iter()
            .filter(|r| r.worker_id == worker_id)
            .cloned()
            .collect()
    }

    pub fn dispatched_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self
            .spawned
            .lock()
            .iter()
            .map(|r| r.group_id.clone())
            .collect();
        groups.sort();
        groups.dedup();
        groups
    }

    async fn succeed(&self, request: &SpawnRequest) -> Result<WorkerReport> {
        let capability = self.invoke_on_spawn.lock().clone();
        if let Some(name) = capability {
            let gateway = self.gateway.lock().clone();
            let gateway =
                gateway.ok_or_else(|| ForemanError::State("no gateway attached".into()))?;
            gateway.invoke(&name, serde_json::json!({})).await?;
        }
        Ok(WorkerReport::success(
            &request.worker_id,
            serde_json::json!({"tier": request.tier}),
        ))
    }
}

#[async_trait]
impl WorkerRuntime for ScriptedRuntime {
    async fn spawn(&self, request: SpawnRequest) -> Result<WorkerReport> {
        self.spawned.lock().push(request.clone());

        let script = self
            .scripts
            .read()
            .get(&request.worker_id)
            .cloned()
            .unwrap_or(Script::Succeed);

        match script {
            Script::Succeed => self.succeed(&request).await,
            Script::Fail => Ok(WorkerReport::failure(&request.worker_id, "scripted failure")),
            Script::FailTimes(n) => {
                if request.attempt <= n {
                    Ok(WorkerReport::failure(&request.worker_id, "scripted failure"))
                } else {
                    self.succeed(&request).await
                }
            }
            Script::SucceedAfterMs(ms) => {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                self.succeed(&request).await
            }
            Script::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Err(ForemanError::State("unreachable".into()))
            }
            Script::AbortThenFail(ms, signals) => {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                signals.abort();
                Ok(WorkerReport::failure(&request.worker_id, "scripted failure"))
            }
        }
    }

    fn attach_gateway(&self, gateway: Arc<ToolGateway>) {
        *self.gateway.lock() = Some(gateway);
    }
}
