//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::EngineConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid pool_size: {0}. Must be at least 1")]
    InvalidPoolSize(u32),

    #[error("Database url cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid workers: {0}. Must be between 1 and 256")]
    InvalidWorkers(usize),

    #[error("Invalid queue_capacity: {0}. Must be at least 1")]
    InvalidQueueCapacity(usize),

    #[error("Invalid batch_size: {0}. Must be at least 1")]
    InvalidBatchSize(u32),

    #[error("Invalid regression_factor: {0}. Must be greater than 1.0")]
    InvalidRegressionFactor(f64),

    #[error(
        "Invalid retention: archive_after_days ({archive}) must not exceed delete_after_days ({delete})"
    )]
    InvalidRetention { archive: u32, delete: u32 },
}

/// Configuration loader.
///
/// Precedence (lowest to highest):
/// 1. Programmatic defaults
/// 2. `accolade.yaml` in the working directory
/// 3. Environment variables (`ACCOLADE_` prefix, `__` as separator)
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file("accolade.yaml"))
            .merge(Env::prefixed("ACCOLADE_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
        if config.database.url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if config.database.pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize(config.database.pool_size));
        }
        if config.engine.workers == 0 || config.engine.workers > 256 {
            return Err(ConfigError::InvalidWorkers(config.engine.workers));
        }
        if config.engine.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity(config.engine.queue_capacity));
        }
        if config.engine.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(config.engine.batch_size));
        }
        if config.events.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(config.events.batch_size));
        }
        if config.events.archive_after_days > 0
            && config.events.delete_after_days > 0
            && config.events.archive_after_days > config.events.delete_after_days
        {
            return Err(ConfigError::InvalidRetention {
                archive: config.events.archive_after_days,
                delete: config.events.delete_after_days,
            });
        }
        if config.observability.regression_factor <= 1.0 {
            return Err(ConfigError::InvalidRegressionFactor(
                config.observability.regression_factor,
            ));
        }
        Ok(())
    }
}
