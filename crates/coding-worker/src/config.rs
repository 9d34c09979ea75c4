//! Worker configuration: a TOML file with optional sections, then a handful
//! of environment overrides, then validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use coordination::generation::GeneratorConfig;
use coordination::queue::QueueConfig;
use coordination::resilience::RetryPolicy;
use coordination::verifier::VerifierConfig;
use serde::{Deserialize, Serialize};

use crate::github_bridge::GithubConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/worker.toml";

fn default_worker_id() -> String {
    "coding-worker".to_string()
}

fn default_receive_error_delay_secs() -> u64 {
    5
}

/// `[worker]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
    /// Pause after a failed receive before polling again.
    #[serde(default = "default_receive_error_delay_secs")]
    pub receive_error_delay_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            receive_error_delay_secs: default_receive_error_delay_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    10
}

fn default_multiplier() -> f64 {
    1.0
}

/// `[retry]` section. Fixed 10s delay unless configured otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_secs: default_backoff_secs(),
            max_backoff_secs: default_backoff_secs(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.initial_backoff_secs),
            Duration::from_secs(self.max_backoff_secs),
            self.multiplier,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl WorkerConfig {
    /// Load `path` (or [`DEFAULT_CONFIG_PATH`] if it exists), apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    tracing::info!("No config file found, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML")
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` (an environment in production, a map in
    /// tests). Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("WORKER_QUEUE_URL") {
            self.queue.url = Some(url);
        }
        if let Some(value) = get("WORKER_USE_MOCK") {
            self.queue.use_mock = parse_bool(&value)
                .with_context(|| format!("WORKER_USE_MOCK: invalid boolean `{value}`"))?;
        }
        if let Some(token) = get("GITHUB_TOKEN").or_else(|| get("GH_TOKEN")) {
            self.github.token = Some(token);
        }
        if let Some(id) = get("WORKER_ID") {
            self.worker.worker_id = id;
        }
        if let Some(value) = get("WORKER_MAX_RETRIES") {
            self.retry.max_retries = value
                .trim()
                .parse()
                .with_context(|| format!("WORKER_MAX_RETRIES: invalid count `{value}`"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.queue.use_mock && self.queue.url.as_deref().map_or(true, str::is_empty) {
            bail!("queue.url is required when queue.use_mock = false");
        }
        if self.queue.buffer_capacity == 0 {
            bail!("queue.buffer_capacity must be at least 1");
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            bail!("retry.multiplier must be >= 1.0, got {}", self.retry.multiplier);
        }
        if self.retry.max_backoff_secs < self.retry.initial_backoff_secs {
            bail!(
                "retry.max_backoff_secs ({}) must be >= retry.initial_backoff_secs ({})",
                self.retry.max_backoff_secs,
                self.retry.initial_backoff_secs
            );
        }
        if self.generator.max_fix_attempts == 0 {
            bail!("generator.max_fix_attempts must be at least 1");
        }
        for model in &self.generator.models {
            if model.name.trim().is_empty() {
                bail!("generator.models: model name must not be empty");
            }
            if model.timeout_seconds == 0 {
                bail!("generator.models: timeout_seconds for {} must be > 0", model.name);
            }
        }
        self.verifier.validate().context("verifier")?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    pub fn receive_error_delay(&self) -> Duration {
        Duration::from_secs(self.worker.receive_error_delay_secs)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
