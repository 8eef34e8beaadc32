//! Configuration for the tunnelwatch binary.
//!
//! Layers built-in defaults, an optional `config.toml` and `TUNNELWATCH_*`
//! environment variables, validates the result and translates it into a
//! `tunnelwatch_core::OrchestratorConfig`. The file is only ever read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tunnelwatch_api::ActivationRetry;
use tunnelwatch_core::{OrchestratorConfig, StatsSource};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "TUNNELWATCH_CONFIG";

const ENV_PREFIX: &str = "TUNNELWATCH_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub polling: Polling,
    #[serde(default)]
    pub bandwidth: Bandwidth,
    #[serde(default)]
    pub latency: Latency,
    #[serde(default)]
    pub log: Log,
}

/// `[polling]`: daemon session refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Polling {
    /// Session list refresh (seconds).
    #[serde(default = "default_poll_secs")]
    pub interval_secs: u64,

    /// Elapsed-time refresh (seconds).
    #[serde(default = "default_timer_secs")]
    pub timer_secs: u64,

    /// Attempts while the configuration service is starting.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_secs(),
            timer_secs: default_timer_secs(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_poll_secs() -> u64 {
    5
}
fn default_timer_secs() -> u64 {
    1
}
fn default_retry_attempts() -> u32 {
    6
}
fn default_retry_delay_ms() -> u64 {
    1000
}

/// `[bandwidth]`: per-session statistics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Bandwidth {
    #[serde(default = "default_bandwidth_secs")]
    pub interval_secs: u64,

    /// `daemon`, `sysfs` or `auto`.
    #[serde(default)]
    pub source: StatsSource,

    /// Samples kept per session.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
}

impl Default for Bandwidth {
    fn default() -> Self {
        Self {
            interval_secs: default_bandwidth_secs(),
            source: StatsSource::default(),
            capacity: default_capacity(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

fn default_bandwidth_secs() -> u64 {
    2
}
fn default_capacity() -> usize {
    tunnelwatch_core::bandwidth::DEFAULT_CAPACITY
}
fn default_sysfs_root() -> PathBuf {
    PathBuf::from(tunnelwatch_core::bandwidth::DEFAULT_SYSFS_ROOT)
}

/// `[latency]`: round-trip probing of the connected remote.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Latency {
    /// 0 disables probing.
    #[serde(default)]
    pub interval_secs: u64,

    #[serde(default = "default_latency_timeout_ms")]
    pub timeout_ms: u32,
}

impl Default for Latency {
    fn default() -> Self {
        Self {
            interval_secs: 0,
            timeout_ms: default_latency_timeout_ms(),
        }
    }
}

fn default_latency_timeout_ms() -> u32 {
    2000
}

/// `[log]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Log {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

// ── Validation & translation ────────────────────────────────────────

impl Config {
    /// Reject values that would stall or break the orchestrator.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("polling.interval_secs", self.polling.interval_secs),
            ("polling.timer_secs", self.polling.timer_secs),
            ("bandwidth.interval_secs", self.bandwidth.interval_secs),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Validation {
                    field: field.into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if self.bandwidth.capacity == 0 {
            return Err(ConfigError::Validation {
                field: "bandwidth.capacity".into(),
                reason: "must hold at least one sample".into(),
            });
        }
        if self.polling.retry_attempts == 0 {
            return Err(ConfigError::Validation {
                field: "polling.retry_attempts".into(),
                reason: "must allow at least one attempt".into(),
            });
        }
        Ok(())
    }

    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: Duration::from_secs(self.polling.interval_secs),
            timer_interval: Duration::from_secs(self.polling.timer_secs),
            bandwidth_interval: Duration::from_secs(self.bandwidth.interval_secs),
            latency_interval: Duration::from_secs(self.latency.interval_secs),
            latency_timeout_ms: self.latency.timeout_ms,
            stats_source: self.bandwidth.source,
            ring_capacity: self.bandwidth.capacity,
            sysfs_root: self.bandwidth.sysfs_root.clone(),
            activation_retry: ActivationRetry {
                attempts: self.polling.retry_attempts,
                delay: Duration::from_millis(self.polling.retry_delay_ms),
            },
        }
    }

    /// The effective configuration as TOML, for display.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// `$TUNNELWATCH_CONFIG`, else `config.toml` in the platform config dir.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("com", "tunnelwatch", "tunnelwatch").map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tunnelwatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path` (if present), then
/// `TUNNELWATCH_<SECTION>__<KEY>` environment variables.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate the configuration at `path`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the configuration from [`config_path()`].
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}
