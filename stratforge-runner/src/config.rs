//! Pipeline configuration, loaded from TOML.
//!
//! Everything has a serde default so a minimal config file only names the
//! date range; the rest falls back to the documented defaults.

use crate::ranker::RankerConfig;
use crate::retry::RetryPolicy;
use crate::validator::{ConsistencyThresholds, RegimeConfig, SplitPolicy};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stratforge_core::DateRange;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config is invalid: {0}")]
    Invalid(String),
}

/// Remote service connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Environment variable holding the API token; the token itself never
    /// lives in the config file.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_token_env() -> String {
    "STRATFORGE_API_TOKEN".to_string()
}

/// Runner timing and quota settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Requests allowed per rolling minute, shared across all jobs.
    #[serde(default = "default_quota")]
    pub requests_per_minute: usize,
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_quota() -> usize {
    30
}

fn default_poll_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    1800
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_quota(),
            poll_interval_secs: default_poll_secs(),
            job_timeout_secs: default_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    // Scalar fields first: the TOML serializer requires values before tables.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Reference index symbol for regime labels.
    #[serde(default = "default_reference_index")]
    pub reference_index: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_registry_dir")]
    pub registry_dir: PathBuf,

    pub service: ServiceConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub split: SplitPolicy,
    #[serde(default)]
    pub consistency: ConsistencyThresholds,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub ranker: RankerConfig,
}

fn default_reference_index() -> String {
    "SPY".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_registry_dir() -> PathBuf {
    PathBuf::from("registry")
}

impl PipelineConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    pub fn date_range(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.start_date >= self.end_date {
            return Err(ConfigError::Invalid(format!(
                "start_date {} is not before end_date {}",
                self.start_date, self.end_date
            )));
        }
        if self.runner.requests_per_minute == 0 {
            return Err(ConfigError::Invalid("requests_per_minute must be positive".into()));
        }
        Ok(())
    }
}
