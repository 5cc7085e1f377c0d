//! Engine configuration.
//!
//! Both sections are plain values threaded explicitly into the entry points:
//! [`ResolveOptions`] into grammar resolution, [`ParseOptions`] into each
//! parse. Loadable from TOML:
//!
//! ```toml
//! [resolve]
//! optimize_parsing = true
//! accelerator_threshold = 5
//!
//! [parse]
//! max_errors = 100
//! name_conflict = "generate_conflict_name"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resolve: ResolveOptions,
    pub parse: ParseOptions,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

/// Options for grammar resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    /// Build per-byte accelerator tables for large alternations.
    pub optimize_parsing: bool,
    /// Minimum branch count before an alternation gets an accelerator.
    pub accelerator_threshold: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            optimize_parsing: true,
            accelerator_threshold: 5,
        }
    }
}

/// What `new` does when the target type name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameConflictPolicy {
    /// The create fails to match.
    #[default]
    Reject,
    /// The existing entry is replaced.
    AllowRedefinition,
    /// The new entry gets a unique name and is flagged as a duplicate.
    GenerateConflictName,
}

/// Options for one parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Root-level errors recorded before further ones are dropped.
    pub max_errors: usize,
    /// How many times one resolved path may be pushed as a source.
    pub max_reinclude_count: usize,
    /// Node pool ceiling; exceeding it aborts the parse.
    pub max_nodes: usize,
    /// Tokens kept for backtracking within one root command.
    pub recall_size: usize,
    pub name_conflict: NameConflictPolicy,
    /// Treat the closing literal of `{ "a" ... "end_a" }` as a terminator
    /// while the interior elements read.
    pub block_terminators: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            max_errors: 100,
            max_reinclude_count: 10,
            max_nodes: 4_000_000,
            recall_size: 4096,
            name_conflict: NameConflictPolicy::Reject,
            block_terminators: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert!(cfg.resolve.optimize_parsing);
        assert_eq!(cfg.parse.max_reinclude_count, 10);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = EngineConfig::from_toml_str(
            "[resolve]\noptimize_parsing = false\n[parse]\nname_conflict = \"generate_conflict_name\"\n",
        )
        .unwrap();
        assert!(!cfg.resolve.optimize_parsing);
        assert_eq!(cfg.resolve.accelerator_threshold, 5);
        assert_eq!(
            cfg.parse.name_conflict,
            NameConflictPolicy::GenerateConflictName
        );
        assert_eq!(cfg.parse.max_errors, 100);
    }

    #[test]
    fn bad_toml_is_reported() {
        let err = EngineConfig::from_toml_str("[parse]\nmax_errors = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn toml_round_trip_preserves_values() {
        let mut cfg = EngineConfig::default();
        cfg.parse.recall_size = 64;
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), cfg);
    }
}
