//! Settings for the pushdown analysis.
//!
//! Loaded from a TOML file (or left at defaults) and passed explicitly to
//! [`crate::planner::PushdownAnalyzer`]. Unknown keys are rejected so a
//! typo does not silently fall back to a default.
//!
//! ```toml
//! enabled = true
//! union_pushdown = true
//! merge_strategy = "union-find"
//! log_equivalence_classes = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ColocationError;
use crate::planner::merge::MergeStrategy;

/// Analysis settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PushdownSettings {
    /// Master switch. When off every query is reported as not safe to
    /// push down.
    pub enabled: bool,

    /// Whether a top-level UNION whose branches expose their partition keys
    /// at the same position may be pushed down when the join analysis
    /// alone does not prove safety.
    pub union_pushdown: bool,

    /// Algorithm used to close the pooled equivalence classes.
    pub merge_strategy: MergeStrategy,

    /// Emit the merged equivalence class in debug logs.
    pub log_equivalence_classes: bool,
}

impl Default for PushdownSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            union_pushdown: true,
            merge_strategy: MergeStrategy::RestartScan,
            log_equivalence_classes: false,
        }
    }
}

impl PushdownSettings {
    /// Parse settings from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ColocationError> {
        toml::from_str(text).map_err(|e| ColocationError::ConfigError(e.to_string()))
    }

    /// Read and parse a settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ColocationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ColocationError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Returns whether the analysis is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns whether the UNION fallback path is allowed.
    pub fn union_pushdown(&self) -> bool {
        self.union_pushdown
    }

    /// Returns the merge strategy.
    pub fn merge_strategy(&self) -> MergeStrategy {
        self.merge_strategy
    }

    /// Returns whether merged classes are logged.
    pub fn log_equivalence_classes(&self) -> bool {
        self.log_equivalence_classes
    }
}
