//! Gateway to external capability modules.
//!
//! No capability call is ever free: the declared cost (or metered floor)
//! is charged to the budget before the call runs, and the measured
//! remainder on return. A capability that could be invoked without a
//! charge would corrupt the session's cost accounting.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::budget::BudgetMonitor;
use crate::config::ToolMode;
use crate::error::{ForemanError, Result};

/// Declared cost of one capability invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityCost {
    /// Known up front; charged in full before the call runs.
    Fixed(u64),
    /// Measured by the capability itself; the floor is charged up front
    /// and the remainder when the call returns.
    Metered { floor: u64 },
}

impl CapabilityCost {
    fn upfront(&self) -> u64 {
        match self {
            Self::Fixed(n) => *n,
            Self::Metered { floor } => *floor,
        }
    }
}

/// Output of one capability run. `measured_cost` is meaningful only for
/// metered capabilities.
#[derive(Debug, Clone)]
pub struct CapabilityOutput {
    pub payload: serde_json::Value,
    pub measured_cost: Option<u64>,
}

impl CapabilityOutput {
    pub fn fixed(payload: serde_json::Value) -> Self {
        Self {
            payload,
            measured_cost: None,
        }
    }

    pub fn metered(payload: serde_json::Value, measured_cost: u64) -> Self {
        Self {
            payload,
            measured_cost: Some(measured_cost),
        }
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn cost(&self) -> CapabilityCost;
    async fn run(&self, args: serde_json::Value) -> Result<CapabilityOutput>;
}

/// Result of a gateway invocation: the capability output plus the cost
/// actually charged.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub output: serde_json::Value,
    pub cost: u64,
}

pub struct ToolGateway {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    budget: Arc<BudgetMonitor>,
    mode: ToolMode,
}

impl ToolGateway {
    pub fn new(budget: Arc<BudgetMonitor>, mode: ToolMode) -> Self {
        Self {
            capabilities: HashMap::new(),
            budget,
            mode,
        }
    }

    /// Registers a capability. Zero declared costs are rejected: a free
    /// capability is a contract violation, not a bargain.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<()> {
        if capability.cost().upfront() == 0 {
            return Err(ForemanError::Config(format!(
                "Capability '{}' declares a zero cost",
                capability.name()
            )));
        }
        self.capabilities
            .insert(capability.name().to_string(), capability);
        Ok(())
    }

    pub fn mode(&self) -> ToolMode {
        self.mode
    }

    pub async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<Invocation> {
        if self.mode == ToolMode::Disabled {
            return Err(ForemanError::Capability {
                name: name.to_string(),
                message: "capability invocations are disabled by configuration".into(),
            });
        }

        let capability = self
            .capabilities
            .get(name)
            .ok_or_else(|| ForemanError::CapabilityNotFound(name.to_string()))?;

        let declared = capability.cost();
        let upfront = declared.upfront();

        // Charge before the call: even a failing invocation consumed the
        // resources it declared.
        self.budget.charge(upfront).await?;

        let output = capability.run(args).await?;

        let cost = match declared {
            CapabilityCost::Fixed(n) => n,
            CapabilityCost::Metered { floor } => {
                let measured = output.measured_cost.unwrap_or(floor).max(floor);
                let remainder = measured - floor;
                if remainder > 0 {
                    self.budget.charge(remainder).await?;
                }
                measured
            }
        };

        debug!(capability = name, cost, "Capability invoked");

        Ok(Invocation {
            output: output.payload,
            cost,
        })
    }
}
