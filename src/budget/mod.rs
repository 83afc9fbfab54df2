//! Session-wide cost accounting and pressure derivation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ForemanError, Result};
use crate::state::StateStore;

const ACCUMULATED_KEY: &str = "budget/accumulated";

/// How close the accumulated cost is to the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pressure {
    Normal,
    Elevated,
    Compact,
}

impl Pressure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::Compact => "compact",
        }
    }
}

impl std::fmt::Display for Pressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Total approximate cost units the session may spend before dispatch
    /// switches to minimal mode. Crossing it is a mode change, not an
    /// abort.
    pub ceiling: u64,
    pub elevated_ratio: f32,
    pub compact_ratio: f32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            ceiling: 1_000,
            elevated_ratio: 0.75,
            compact_ratio: 0.90,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub accumulated: u64,
    pub ceiling: u64,
    pub pressure: Pressure,
}

/// Accumulates the approximate cost of every action taken in the session.
///
/// Strictly additive and monotonic: nothing is ever refunded or decayed.
/// This is the single writer of the accumulated counter; every charge is
/// flushed to the [`StateStore`] so a resumed session re-enters at the
/// recorded spend. `pressure()` is a pure function of the current total
/// and the ceiling, recomputed on every call.
pub struct BudgetMonitor {
    store: StateStore,
    session_id: String,
    config: BudgetConfig,
    accumulated: Mutex<u64>,
}

impl BudgetMonitor {
    pub fn new(store: StateStore, session_id: impl Into<String>, config: BudgetConfig) -> Result<Self> {
        if config.ceiling == 0 {
            return Err(ForemanError::Config("budget ceiling must be greater than 0".into()));
        }
        Ok(Self {
            store,
            session_id: session_id.into(),
            config,
            accumulated: Mutex::new(0),
        })
    }

    /// Re-enters at the persisted spend, if any.
    pub async fn resume(
        store: StateStore,
        session_id: impl Into<String>,
        config: BudgetConfig,
    ) -> Result<Self> {
        let session_id = session_id.into();
        let persisted: u64 = store
            .get(&session_id, ACCUMULATED_KEY)
            .await?
            .map(|raw| {
                raw.parse()
                    .map_err(|_| ForemanError::State(format!("Corrupt budget value: {}", raw)))
            })
            .transpose()?
            .unwrap_or(0);

        let monitor = Self::new(store, session_id, config)?;
        *monitor.accumulated.lock() = persisted;
        Ok(monitor)
    }

    /// Adds `amount` to the accumulated cost and persists the new total
    /// before returning it.
    pub async fn charge(&self, amount: u64) -> Result<u64> {
        let total = {
            let mut accumulated = self.accumulated.lock();
            *accumulated = accumulated.saturating_add(amount);
            *accumulated
        };

        self.store
            .put(&self.session_id, ACCUMULATED_KEY, &total.to_string())
            .await?;

        if total > self.config.ceiling {
            warn!(
                session_id = %self.session_id,
                accumulated = total,
                ceiling = self.config.ceiling,
                "Budget ceiling exceeded; continuing in minimal mode"
            );
        } else {
            debug!(session_id = %self.session_id, amount, total, "Cost charged");
        }

        Ok(total)
    }

    pub fn accumulated(&self) -> u64 {
        *self.accumulated.lock()
    }

    pub fn ceiling(&self) -> u64 {
        self.config.ceiling
    }

    /// Derived fresh from the current total on every call; never cached.
    pub fn pressure(&self) -> Pressure {
        let ratio = self.accumulated() as f64 / self.config.ceiling as f64;
        if ratio >= self.config.compact_ratio as f64 {
            Pressure::Compact
        } else if ratio >= self.config.elevated_ratio as f64 {
            Pressure::Elevated
        } else {
            Pressure::Normal
        }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            accumulated: self.accumulated(),
            ceiling: self.config.ceiling,
            pressure: self.pressure(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_monitor(ceiling: u64) -> (TempDir, BudgetMonitor) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("state.db")).unwrap();
        let monitor = BudgetMonitor::new(
            store,
            "s-1",
            BudgetConfig {
                ceiling,
                ..Default::default()
            },
        )
        .unwrap();
        (dir, monitor)
    }

    #[tokio::test]
    async fn test_charges_are_additive() {
        let (_dir, monitor) = temp_monitor(100).await;

        monitor.charge(3).await.unwrap();
        monitor.charge(7).await.unwrap();
        let split = monitor.accumulated();

        let (_dir2, monitor2) = temp_monitor(100).await;
        monitor2.charge(10).await.unwrap();

        assert_eq!(split, monitor2.accumulated());
        assert_eq!(split, 10);
    }

    #[tokio::test]
    async fn test_pressure_breakpoints() {
        let (_dir, monitor) = temp_monitor(8).await;

        monitor.charge(2).await.unwrap();
        assert_eq!(monitor.pressure(), Pressure::Normal);

        monitor.charge(2).await.unwrap();
        assert_eq!(monitor.pressure(), Pressure::Normal);

        // 6/8 = 0.75: exactly at the elevated breakpoint.
        monitor.charge(2).await.unwrap();
        assert_eq!(monitor.pressure(), Pressure::Elevated);

        monitor.charge(2).await.unwrap();
        assert_eq!(monitor.pressure(), Pressure::Compact);
    }

    #[tokio::test]
    async fn test_pressure_is_pure() {
        let (_dir, monitor) = temp_monitor(10).await;
        monitor.charge(8).await.unwrap();

        // Repeated calls with unchanged state agree.
        let first = monitor.pressure();
        for _ in 0..10 {
            assert_eq!(monitor.pressure(), first);
        }
    }

    #[tokio::test]
    async fn test_ceiling_overrun_is_not_an_error() {
        let (_dir, monitor) = temp_monitor(4).await;
        let total = monitor.charge(10).await.unwrap();
        assert_eq!(total, 10);
        assert_eq!(monitor.pressure(), Pressure::Compact);
    }

    #[tokio::test]
    async fn test_resume_reloads_persisted_spend() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("state.db")).unwrap();

        {
            let monitor =
                BudgetMonitor::new(store.clone(), "s-1", BudgetConfig::default()).unwrap();
            monitor.charge(42).await.unwrap();
        }

        let resumed = BudgetMonitor::resume(store, "s-1", BudgetConfig::default())
            .await
            .unwrap();
        assert_eq!(resumed.accumulated(), 42);
    }

    #[tokio::test]
    async fn test_zero_ceiling_rejected() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("state.db")).unwrap();
        let result = BudgetMonitor::new(
            store,
            "s-1",
            BudgetConfig {
                ceiling: 0,
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }
}
