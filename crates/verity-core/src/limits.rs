//! Generation configuration and its limits.
//!
//! Every knob of the pipeline lives in one serde-loadable structure. Missing
//! fields take their defaults, so a partial JSON document is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use verity_compiler::AnalyzerConfig;
use verity_explore::{ExploreConfig, SolverConfig};
use verity_sandbox::SandboxConfig;

/// Configuration for generating test suites for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub analyzer: AnalyzerConfig,
    pub explore: ExploreConfig,
    pub solver: SolverConfig,
    pub sandbox: SandboxConfig,
    /// Largest accepted module source, in bytes.
    pub max_source_bytes: usize,
    /// Explore the functions of a module concurrently.
    pub parallel_functions: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            explore: ExploreConfig::default(),
            solver: SolverConfig::default(),
            sandbox: SandboxConfig::default(),
            max_source_bytes: 1024 * 1024, // 1 MB
            parallel_functions: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A request rejected before any work starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimitViolation {
    #[error("Source too large ({size} bytes, max {max})")]
    SourceTooLarge { size: usize, max: usize },
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

impl GenerationConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("explore.max_paths", self.explore.max_paths as u64)?;
        positive("explore.max_depth", self.explore.max_depth as u64)?;
        positive("explore.workers", self.explore.workers as u64)?;
        positive("explore.queue_capacity", self.explore.queue_capacity as u64)?;
        positive("explore.max_path_steps", self.explore.max_path_steps as u64)?;
        positive("solver.timeout_ms", self.solver.timeout_ms)?;
        positive("solver.max_sat_calls", self.solver.max_sat_calls)?;
        positive("solver.max_candidates", self.solver.max_candidates as u64)?;
        positive("sandbox.fuel_per_call", self.sandbox.fuel_per_call)?;
        positive("sandbox.wall_ms", self.sandbox.wall_ms)?;
        positive("analyzer.default_loop_bound", self.analyzer.default_loop_bound as u64)?;
        if self.analyzer.max_loop_bound < self.analyzer.default_loop_bound {
            return Err(ConfigError::Invalid {
                field: "analyzer.max_loop_bound",
                reason: format!(
                    "{} is below the default loop bound {}",
                    self.analyzer.max_loop_bound, self.analyzer.default_loop_bound
                ),
            });
        }
        Ok(())
    }

    pub fn check_source(&self, source: &str) -> Result<(), LimitViolation> {
        if source.len() > self.max_source_bytes {
            return Err(LimitViolation::SourceTooLarge {
                size: source.len(),
                max: self.max_source_bytes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GenerationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.explore.seed, 42);
        assert!(config.parallel_functions);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"explore": {"max_paths": 12}, "sandbox": {"wall_ms": 50}}"#;
        let config = GenerationConfig::from_json(json).unwrap();
        assert_eq!(config.explore.max_paths, 12);
        assert_eq!(config.explore.workers, ExploreConfig::default().workers);
        assert_eq!(config.sandbox.wall_ms, 50);
        assert_eq!(config.solver, SolverConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = GenerationConfig::from_json(r#"{"explore": {"workers": 0}}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "explore.workers",
                ..
            }
        ));
        let err =
            GenerationConfig::from_json(r#"{"analyzer": {"default_loop_bound": 9}}"#).unwrap_err();
        assert!(err.to_string().contains("analyzer.max_loop_bound"));
        let err = GenerationConfig::from_json(r#"{"solver": {"max_sat_calls": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("solver.max_sat_calls"));
        assert!(matches!(GenerationConfig::from_json("{"), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_source_limit() {
        let config = GenerationConfig {
            max_source_bytes: 4,
            ..Default::default()
        };
        assert!(config.check_source("x = 1").is_err());
        assert!(config.check_source("x=1").is_ok());
    }
}
