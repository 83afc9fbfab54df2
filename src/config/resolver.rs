//! Precedence-ordered configuration resolution.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::hints::{Advisory, HintSheet};
use super::seed::{SeedConfig, SeedLookup, ToolMode};
use crate::error::{ForemanError, Result};
use crate::selector::TierAssignments;

pub const KEY_TIERS: &str = "tiers";
pub const KEY_ROUTING: &str = "routing";
pub const KEY_TOOL_MODE: &str = "tool_mode";

/// Resolves configuration by a fixed precedence chain: live store entry,
/// then seed file entry. The first successful seed fallback writes the
/// value back into the store, so later lookups are answered there and
/// stay consistent across the session.
///
/// The hint sheet is not part of the chain: it does not implement
/// [`SeedLookup`] and is only compared against resolved values to produce
/// advisories.
pub struct ConfigResolver {
    store: crate::state::StateStore,
    session_id: String,
    seed: SeedConfig,
}

impl ConfigResolver {
    pub fn new(
        store: crate::state::StateStore,
        session_id: impl Into<String>,
        seed: SeedConfig,
    ) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            seed,
        }
    }

    pub async fn resolve(&self, key: &str) -> Result<serde_json::Value> {
        let store_key = format!("config/{}", key);

        if let Some(raw) = self.store.get(&self.session_id, &store_key).await? {
            debug!(key, "Resolved from store");
            return Ok(serde_json::from_str(&raw)?);
        }

        if let Some(value) = self.seed.entry(key) {
            // Seed-then-cache: persist the fallback so every later lookup
            // hits the store.
            self.store
                .put(&self.session_id, &store_key, &serde_json::to_string(&value)?)
                .await?;
            debug!(key, "Resolved from seed and cached into store");
            return Ok(value);
        }

        Err(ForemanError::ConfigMissing(key.to_string()))
    }

    pub async fn tier_assignments(&self) -> Result<TierAssignments> {
        Ok(serde_json::from_value(self.resolve(KEY_TIERS).await?)?)
    }

    pub async fn routing(&self) -> Result<HashMap<String, String>> {
        Ok(serde_json::from_value(self.resolve(KEY_ROUTING).await?)?)
    }

    pub async fn tool_mode(&self) -> Result<ToolMode> {
        Ok(serde_json::from_value(self.resolve(KEY_TOOL_MODE).await?)?)
    }

    /// Compares the hint sheet against the currently resolvable values and
    /// logs each mismatch. Advisories never affect resolution output.
    pub async fn check_hints(&self, hints: &HintSheet) -> Result<Vec<Advisory>> {
        if hints.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved = Vec::new();
        for key in [KEY_TIERS, KEY_ROUTING, KEY_TOOL_MODE] {
            match self.resolve(key).await {
                Ok(value) => {
                    let rendered = match &value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    resolved.push((key.to_string(), rendered));
                }
                Err(ForemanError::ConfigMissing(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        let advisories = hints.advisories(&resolved);
        for advisory in &advisories {
            warn!(key = %advisory.key, "{}", advisory);
        }
        Ok(advisories)
    }
}
