//! Documentation-only hint sheet.
//!
//! Hints mirror what the seed is expected to say, for human readers. They
//! are not a configuration source: this type does not implement
//! [`SeedLookup`](super::seed::SeedLookup), so the resolver cannot consult
//! it even by accident. A mismatch between a hint and a resolved value is
//! cosmetic and surfaces only as an advisory.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tokio::fs;

use crate::error::Result;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HintSheet {
    #[serde(flatten)]
    entries: HashMap<String, String>,
}

/// A cosmetic disagreement between the hint sheet and a resolved value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub key: String,
    pub hint: String,
    pub resolved: String,
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hint for '{}' says {:?} but resolution produced {:?}",
            self.key, self.hint, self.resolved
        )
    }
}

impl HintSheet {
    /// Loads the sheet from an optional TOML file. A missing file yields
    /// an empty sheet; hints are never required.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).await?;
        Ok(toml::from_str(&content)?)
    }

    pub fn from_entries(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compares the sheet against already-resolved values. The resolved
    /// values are inputs here; the sheet never participates in producing
    /// them.
    pub fn advisories(&self, resolved: &[(String, String)]) -> Vec<Advisory> {
        resolved
            .iter()
            .filter_map(|(key, value)| {
                let hint = self.entries.get(key)?;
                if hint == value {
                    None
                } else {
                    Some(Advisory {
                        key: key.clone(),
                        hint: hint.clone(),
                        resolved: value.clone(),
                    })
                }
            })
            .collect()
    }
}
