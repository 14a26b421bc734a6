//! Configuration for fanout.
//!
//! Loaded from a TOML file under the platform config dir, with every field
//! defaulted so an absent file or sparse file still yields a working
//! configuration. Validation runs once at load time.

use crate::types::RetryPolicy;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level fanout configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FanoutConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub aws: AwsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum per-target records retained in the results history file.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Additional attempts after the first per target.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff wait in seconds; the wait grows linearly per attempt.
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    /// Cap on the backoff wait in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    /// Targets executed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Interval between status polls in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Wall-clock budget for one attempt in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            concurrency: default_concurrency(),
            poll_interval_secs: default_poll_interval(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Named profile passed to the AWS CLI; None uses the ambient default.
    #[serde(default)]
    pub profile: Option<String>,
    /// Region passed to the AWS CLI; None uses the ambient default.
    #[serde(default)]
    pub region: Option<String>,
    /// Run document for Linux targets.
    #[serde(default = "default_linux_document")]
    pub linux_document: String,
    /// Run document for Windows targets.
    #[serde(default = "default_windows_document")]
    pub windows_document: String,
    /// AWS CLI executable.
    #[serde(default = "default_cli_path")]
    pub cli_path: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            profile: None,
            region: None,
            linux_document: default_linux_document(),
            windows_document: default_windows_document(),
            cli_path: default_cli_path(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_limit() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    10
}

fn default_max_delay() -> u64 {
    60
}

fn default_concurrency() -> usize {
    5
}

fn default_poll_interval() -> u64 {
    3
}

fn default_command_timeout() -> u64 {
    120
}

fn default_linux_document() -> String {
    "AWS-RunShellScript".to_string()
}

fn default_windows_document() -> String {
    "AWS-RunPowerShellScript".to_string()
}

fn default_cli_path() -> String {
    "aws".to_string()
}

impl FanoutConfig {
    /// Default config file path: `<config dir>/fanout/config.toml`, with a
    /// `FANOUT_CONFIG` env override.
    pub fn default_path() -> PathBuf {
        if let Ok(custom) = std::env::var("FANOUT_CONFIG") {
            return PathBuf::from(custom);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fanout")
            .join("config.toml")
    }

    /// Load from the default path; a missing file yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load from an explicit path; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine would refuse anyway, before any
    /// batch starts.
    pub fn validate(&self) -> Result<()> {
        if self.batch.concurrency == 0 {
            bail!("batch.concurrency must be at least 1");
        }
        if self.batch.command_timeout_secs == 0 {
            bail!("batch.command_timeout_secs must be at least 1");
        }
        if self.batch.poll_interval_secs == 0 {
            bail!("batch.poll_interval_secs must be at least 1");
        }
        if self.batch.base_delay_secs > self.batch.max_delay_secs {
            bail!(
                "batch.base_delay_secs ({}) exceeds batch.max_delay_secs ({})",
                self.batch.base_delay_secs,
                self.batch.max_delay_secs
            );
        }
        Ok(())
    }

    /// Retry policy assembled from the batch section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.batch.max_retries,
            base_delay: Duration::from_secs(self.batch.base_delay_secs),
            max_delay: Duration::from_secs(self.batch.max_delay_secs),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.batch.command_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.batch.poll_interval_secs)
    }
}
