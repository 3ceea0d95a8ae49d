//! Hierarchical configuration loading (`spec.md` §6).
//!
//! Precedence (lowest to highest):
//! 1. Programmatic defaults (`Config::default()`).
//! 2. `casys-pml.toml` in the current directory, if present.
//! 3. Environment variables prefixed `CASYS_PML_`, `__`-nested (e.g.
//!    `CASYS_PML_EXECUTION__RETRY_MAX=5`).
//!
//! Ported from the teacher's `ConfigLoader` (`figment` merge chain), with
//! the file format switched from YAML to TOML — the teacher's own
//! `services/config.rs` already parses TOML directly for simpler cases,
//! and `toml` sits in this crate's manifest for that reason.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("db_path must not be empty")]
    EmptyDbPath,

    #[error("embedding.dim must be positive")]
    InvalidEmbeddingDim,

    #[error("execution.max_parallel_tasks_per_dag must be positive")]
    InvalidParallelism,

    #[error("search.hybrid_alpha_default must be within [0.0, 1.0]")]
    InvalidAlpha,

    #[error("search.capability_match_threshold must be within [0.0, 1.0]")]
    InvalidMatchThreshold,

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `casys-pml.toml` (if present) merged over
    /// defaults, then over `CASYS_PML_*` environment variables.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("casys-pml.toml"))
            .merge(Env::prefixed("CASYS_PML_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let path = path.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.db_path.is_empty() {
            return Err(ConfigError::EmptyDbPath);
        }
        if config.embedding.dim == 0 {
            return Err(ConfigError::InvalidEmbeddingDim);
        }
        if config.execution.max_parallel_tasks_per_dag == 0 {
            return Err(ConfigError::InvalidParallelism);
        }
        if !(0.0..=1.0).contains(&config.search.hybrid_alpha_default) {
            return Err(ConfigError::InvalidAlpha);
        }
        if !(0.0..=1.0).contains(&config.search.capability_match_threshold) {
            return Err(ConfigError::InvalidMatchThreshold);
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn toml_fragment_overrides_merge_over_defaults() {
        let toml_fragment = r#"
            db_path = "/var/lib/casys/pml.db"

            [search]
            hybrid_alpha_default = 0.75
        "#;
        let parsed: Config = toml::from_str(toml_fragment).unwrap();
        assert_eq!(parsed.db_path, "/var/lib/casys/pml.db");
        assert!((parsed.search.hybrid_alpha_default - 0.75).abs() < f32::EPSILON);
        ConfigLoader::validate(&parsed).unwrap();
    }

    #[test]
    fn empty_db_path_is_rejected() {
        let mut config = Config::default();
        config.db_path = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyDbPath)));
    }

    #[test]
    fn out_of_range_alpha_is_rejected() {
        let mut config = Config::default();
        config.search.hybrid_alpha_default = 1.5;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidAlpha)));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }
}
