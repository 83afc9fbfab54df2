use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::budget::BudgetConfig;
use crate::error::{ForemanError, Result};
use crate::selector::SelectorConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForemanConfig {
    pub state: StateConfig,
    pub seed: SeedPathConfig,
    pub selector: SelectorConfig,
    pub budget: BudgetConfig,
    pub dispatcher: crate::dispatch::DispatcherConfig,
    pub output: crate::output::OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub db_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".foreman/state.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedPathConfig {
    pub seed_path: PathBuf,
    /// Optional documentation hint sheet; compared for advisories only.
    pub hints_path: Option<PathBuf>,
}

impl Default for SeedPathConfig {
    fn default() -> Self {
        Self {
            seed_path: PathBuf::from(".foreman/seed.toml"),
            hints_path: None,
        }
    }
}

impl ForemanConfig {
    pub async fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| ForemanError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.budget.ceiling == 0 {
            errors.push("budget ceiling must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.budget.elevated_ratio) {
            errors.push("budget elevated_ratio must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.budget.compact_ratio) {
            errors.push("budget compact_ratio must be between 0.0 and 1.0");
        }
        if self.budget.elevated_ratio >= self.budget.compact_ratio {
            errors.push("budget elevated_ratio must be less than compact_ratio");
        }

        if self.selector.default_failure_threshold == 0 {
            errors.push("selector default_failure_threshold must be greater than 0");
        }

        if self.dispatcher.max_parallel_groups == 0 {
            errors.push("dispatcher max_parallel_groups must be greater than 0");
        }
        if self.dispatcher.retry_ceiling == 0 {
            errors.push("dispatcher retry_ceiling must be greater than 0");
        }
        if self.dispatcher.group_timeout_secs == 0 {
            errors.push("dispatcher group_timeout_secs must be greater than 0");
        }
        // Dispatch and report actions are never free; a zero cost would
        // make them invisible to the budget.
        if self.dispatcher.dispatch_cost == 0 {
            errors.push("dispatcher dispatch_cost must be greater than 0");
        }
        if self.dispatcher.report_cost == 0 {
            errors.push("dispatcher report_cost must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ForemanError::Config(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ForemanConfig::default();
        config.validate().unwrap();

        assert_eq!(config.selector.default_failure_threshold, 2);
        assert_eq!(config.dispatcher.retry_ceiling, 3);
        assert_eq!(config.dispatcher.group_timeout_secs, 300);
        assert!((config.budget.elevated_ratio - 0.75).abs() < f32::EPSILON);
        assert!((config.budget.compact_ratio - 0.90).abs() < f32::EPSILON);
    }

    #[test]
    fn test_validate_collects_violations() {
        let mut config = ForemanConfig::default();
        config.budget.ceiling = 0;
        config.dispatcher.retry_ceiling = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ceiling"));
        assert!(err.contains("retry_ceiling"));
    }

    #[test]
    fn test_breakpoint_ordering_enforced() {
        let mut config = ForemanConfig::default();
        config.budget.elevated_ratio = 0.95;
        config.budget.compact_ratio = 0.90;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ForemanConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.dispatcher.max_parallel_groups, 4);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();

        let mut config = ForemanConfig::default();
        config.budget.ceiling = 64;
        config.save(dir.path()).await.unwrap();

        let loaded = ForemanConfig::load(dir.path()).await.unwrap();
        assert_eq!(loaded.budget.ceiling, 64);
    }
}
