//! Engine settings, layered from defaults, an optional TOML file and
//! `CALC_ENGINE_*` environment variables.
use crate::compute::Limits;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File read by [`EngineConfig::load`] when present in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "calc_engine.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Loop iterations allowed per formula evaluation.
    pub max_iterations: u64,
    pub max_call_depth: usize,
    /// Memoize compiled formulas across executions.
    pub cache_formulas: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self { max_iterations: limits.max_iterations, max_call_depth: limits.max_call_depth, cache_formulas: true }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE))
            .merge(Env::prefixed("CALC_ENGINE_"))
            .extract()
    }

    /// Defaults overridden by the given TOML file only.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
    }

    pub fn limits(&self) -> Limits {
        Limits { max_iterations: self.max_iterations, max_call_depth: self.max_call_depth }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_evaluator_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.limits(), Limits::default());
        assert!(config.cache_formulas);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_iterations = 500\ncache_formulas = false").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_iterations, 500);
        assert!(!config.cache_formulas);
        assert_eq!(config.max_call_depth, 64);
    }

    #[test]
    fn test_bad_value_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_iterations = \"many\"").unwrap();
        assert!(EngineConfig::from_file(file.path()).is_err());
    }
}
