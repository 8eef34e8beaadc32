// ── Runtime orchestrator configuration ──
//
// Polling cadence and monitor tuning for the `Orchestrator`. The binary
// builds one of these from `tunnelwatch-config`; core never reads files.

use std::path::PathBuf;
use std::time::Duration;

use tunnelwatch_api::ActivationRetry;

use crate::bandwidth::{DEFAULT_CAPACITY, DEFAULT_SYSFS_ROOT, StatsSource};

/// Tuning for a single `Orchestrator`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Session list refresh.
    pub poll_interval: Duration,
    /// Elapsed-text tick. Reads local clocks only.
    pub timer_interval: Duration,
    /// One statistics update per monitor.
    pub bandwidth_interval: Duration,
    /// Latency probe cadence. Zero disables probing.
    pub latency_interval: Duration,
    /// ping deadline in milliseconds.
    pub latency_timeout_ms: u32,
    pub stats_source: StatsSource,
    /// Samples kept per monitor.
    pub ring_capacity: usize,
    pub sysfs_root: PathBuf,
    /// How long `ConfigClient::list` waits for the configuration service.
    pub activation_retry: ActivationRetry,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timer_interval: Duration::from_secs(1),
            bandwidth_interval: Duration::from_secs(2),
            latency_interval: Duration::ZERO,
            latency_timeout_ms: 2000,
            stats_source: StatsSource::Auto,
            ring_capacity: DEFAULT_CAPACITY,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            activation_retry: ActivationRetry::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn latency_enabled(&self) -> bool {
        !self.latency_interval.is_zero()
    }
}
