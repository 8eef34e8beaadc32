// ── Per-session bandwidth monitor ──
//
// Fixed-capacity ring of cumulative counter samples, read either from the
// daemon's `statistics` property or from the interface counters in sysfs.
// Rates are derived from the two newest samples; totals are measured from
// the first sample after creation or `reset()`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use tunnelwatch_api::{BusTransport, SessionClient};

use crate::error::CoreError;

/// Ring size for live rate display.
pub const DEFAULT_CAPACITY: usize = 60;

/// Where interface counters live.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/net";

/// Where a monitor reads its counters from.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum StatsSource {
    /// The session's `statistics` property.
    Daemon,
    /// `/sys/class/net/<device>/statistics/*`.
    Sysfs,
    /// Daemon first, sysfs if that fails.
    #[default]
    Auto,
}

/// One reading of the cumulative counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthSample {
    /// Unix time in seconds.
    pub timestamp: i64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets_in: u64,
    pub packets_out: u64,
    pub errors_in: u64,
    pub errors_out: u64,
    pub dropped_in: u64,
    pub dropped_out: u64,
}

/// Rates over the newest interval plus totals since the baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandwidthRate {
    pub download_bps: f64,
    pub upload_bps: f64,
    pub total_downloaded: u64,
    pub total_uploaded: u64,
}

/// Counter history for one session.
#[derive(Debug, Clone)]
pub struct BandwidthMonitor {
    session_id: String,
    device: String,
    source: StatsSource,
    sysfs_root: PathBuf,
    capacity: usize,
    ring: Vec<BandwidthSample>,
    write_index: usize,
    start_time: Option<i64>,
    baseline: Option<BandwidthSample>,
    last_source: Option<StatsSource>,
}

impl BandwidthMonitor {
    /// A capacity of zero is treated as one.
    pub fn new(
        session_id: impl Into<String>,
        device: impl Into<String>,
        source: StatsSource,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            session_id: session_id.into(),
            device: device.into(),
            source,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            capacity,
            ring: Vec::with_capacity(capacity),
            write_index: 0,
            start_time: None,
            baseline: None,
            last_source: None,
        }
    }

    /// Read interface counters below `root` instead of `/sys/class/net`.
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// The daemon often reports the device name only once the tunnel is up.
    pub fn set_device(&mut self, device: impl Into<String>) {
        self.device = device.into();
    }

    pub fn source(&self) -> StatsSource {
        self.source
    }

    /// Which source produced the newest sample.
    pub fn stats_source_used(&self) -> Option<StatsSource> {
        self.last_source
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sample_count(&self) -> usize {
        self.ring.len()
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn baseline(&self) -> Option<&BandwidthSample> {
        self.baseline.as_ref()
    }

    /// Timestamp of the baseline sample.
    pub fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    /// Seconds since the baseline, as of `now`.
    pub fn uptime_secs(&self, now: i64) -> Option<i64> {
        self.start_time.map(|start| (now - start).max(0))
    }

    fn newest_index(&self) -> Option<usize> {
        if self.ring.is_empty() {
            return None;
        }
        Some((self.write_index + self.capacity - 1) % self.capacity)
    }

    pub fn latest(&self) -> Option<&BandwidthSample> {
        self.newest_index().and_then(|i| self.ring.get(i))
    }

    // ── Sampling ────────────────────────────────────────────────────

    /// Append a sample, evicting the oldest once the ring is full. The
    /// first sample becomes the baseline.
    pub fn record(&mut self, sample: BandwidthSample) {
        if self.ring.len() < self.capacity {
            self.ring.push(sample);
        } else if let Some(slot) = self.ring.get_mut(self.write_index) {
            *slot = sample;
        }
        self.write_index = (self.write_index + 1) % self.capacity;

        if self.baseline.is_none() {
            self.baseline = Some(sample);
            self.start_time = Some(sample.timestamp);
        }
    }

    /// Read one sample from the configured source and record it.
    pub async fn update<T: BusTransport>(
        &mut self,
        sessions: &SessionClient<T>,
    ) -> Result<BandwidthSample, CoreError> {
        let now = chrono::Utc::now().timestamp();
        let (sample, used) = match self.source {
            StatsSource::Daemon => (self.read_daemon(sessions, now).await?, StatsSource::Daemon),
            StatsSource::Sysfs => (self.read_sysfs(now)?, StatsSource::Sysfs),
            StatsSource::Auto => match self.read_daemon(sessions, now).await {
                Ok(sample) => (sample, StatsSource::Daemon),
                Err(daemon_err @ CoreError::NotSupported { .. }) => {
                    debug!(
                        session_id = %self.session_id,
                        error = %daemon_err,
                        "daemon statistics unavailable, trying sysfs"
                    );
                    let sample = self.read_sysfs(now).map_err(|sysfs_err| CoreError::NotSupported {
                        message: format!(
                            "no statistics source for {}: {daemon_err}; {sysfs_err}",
                            self.session_id
                        ),
                    })?;
                    (sample, StatsSource::Sysfs)
                }
                // A broken bus is not a missing feature.
                Err(other) => return Err(other),
            },
        };

        self.last_source = Some(used);
        self.record(sample);
        Ok(sample)
    }

    async fn read_daemon<T: BusTransport>(
        &self,
        sessions: &SessionClient<T>,
        now: i64,
    ) -> Result<BandwidthSample, CoreError> {
        let stats = sessions.get_statistics(&self.session_id).await?;
        Ok(BandwidthSample {
            timestamp: now,
            bytes_in: stats.bytes_in,
            bytes_out: stats.bytes_out,
            packets_in: stats.packets_in,
            packets_out: stats.packets_out,
            ..BandwidthSample::default()
        })
    }

    fn read_sysfs(&self, now: i64) -> Result<BandwidthSample, CoreError> {
        if self.device.is_empty() {
            return Err(CoreError::Stats {
                message: format!("session {} has no device yet", self.session_id),
            });
        }
        let dir = self.sysfs_root.join(&self.device).join("statistics");

        let bytes_in = read_counter(&dir, "rx_bytes").map_err(|e| CoreError::Stats {
            message: format!("{}: {e}", dir.join("rx_bytes").display()),
        })?;
        let optional = |name: &str| match read_counter(&dir, name) {
            Ok(value) => value,
            Err(e) => {
                warn!(device = %self.device, counter = name, error = %e, "optional counter unavailable");
                0
            }
        };

        Ok(BandwidthSample {
            timestamp: now,
            bytes_in,
            bytes_out: optional("tx_bytes"),
            packets_in: optional("rx_packets"),
            packets_out: optional("tx_packets"),
            errors_in: optional("rx_errors"),
            errors_out: optional("tx_errors"),
            dropped_in: optional("rx_dropped"),
            dropped_out: optional("tx_dropped"),
        })
    }

    // ── Derived values ──────────────────────────────────────────────

    /// Rate over the newest interval; `None` with fewer than two samples.
    ///
    /// Counter decreases (interface recreated) count by magnitude in the
    /// rate. Totals are not corrected and dip until [`reset`](Self::reset).
    pub fn get_rate(&self) -> Option<BandwidthRate> {
        let samples = self.get_samples(2);
        let [latest, prev] = samples.as_slice() else {
            return None;
        };
        let baseline = self.baseline.unwrap_or(*prev);

        let dt = (latest.timestamp - prev.timestamp).max(1);
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let per_sec = |diff: u64| diff as f64 / dt as f64;

        Some(BandwidthRate {
            download_bps: per_sec(latest.bytes_in.abs_diff(prev.bytes_in)),
            upload_bps: per_sec(latest.bytes_out.abs_diff(prev.bytes_out)),
            total_downloaded: latest.bytes_in.saturating_sub(baseline.bytes_in),
            total_uploaded: latest.bytes_out.saturating_sub(baseline.bytes_out),
        })
    }

    /// Up to `max` samples, newest first.
    pub fn get_samples(&self, max: usize) -> Vec<BandwidthSample> {
        let Some(newest) = self.newest_index() else {
            return Vec::new();
        };
        let count = max.min(self.ring.len());
        (0..count)
            .filter_map(|back| {
                let idx = (newest + self.capacity - back) % self.capacity;
                self.ring.get(idx).copied()
            })
            .collect()
    }

    /// Drop every sample and the baseline; the next sample rebases totals.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.write_index = 0;
        self.start_time = None;
        self.baseline = None;
        self.last_source = None;
    }
}

fn read_counter(dir: &Path, name: &str) -> Result<u64, std::io::Error> {
    let raw = fs::read_to_string(dir.join(name))?;
    raw.trim()
        .parse::<u64>()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tunnelwatch_api::mock::MockBus;
    use tunnelwatch_api::names::PROP_STATISTICS;

    use super::*;

    const S1: &str = "/net/openvpn/v3/sessions/s1";

    fn sample(timestamp: i64, bytes_in: u64, bytes_out: u64) -> BandwidthSample {
        BandwidthSample {
            timestamp,
            bytes_in,
            bytes_out,
            ..BandwidthSample::default()
        }
    }

    fn monitor(capacity: usize) -> BandwidthMonitor {
        BandwidthMonitor::new(S1, "tun0", StatsSource::Auto, capacity)
    }

    fn write_sysfs(root: &Path, device: &str, counters: &[(&str, u64)]) {
        let dir = root.join(device).join("statistics");
        fs::create_dir_all(&dir).unwrap();
        for (name, value) in counters {
            fs::write(dir.join(name), format!("{value}\n")).unwrap();
        }
    }

    fn daemon_stats(bytes_in: i64, bytes_out: i64) -> HashMap<String, i64> {
        [
            ("BYTES_IN".to_owned(), bytes_in),
            ("BYTES_OUT".to_owned(), bytes_out),
            ("PACKETS_IN".to_owned(), 1),
            ("PACKETS_OUT".to_owned(), 2),
        ]
        .into_iter()
        .collect()
    }

    // ── Ring ────────────────────────────────────────────────────────

    #[test]
    fn first_sample_sets_baseline_and_start_time() {
        let mut m = monitor(4);
        assert!(!m.has_baseline());
        m.record(sample(100, 10, 20));
        m.record(sample(102, 30, 40));
        assert_eq!(m.start_time(), Some(100));
        assert_eq!(m.baseline().unwrap().bytes_in, 10);
        assert_eq!(m.latest().unwrap().timestamp, 102);
    }

    #[test]
    fn ring_evicts_oldest_and_caps_count() {
        let mut m = monitor(3);
        for t in 0..5 {
            m.record(sample(t, 0, 0));
        }
        assert_eq!(m.sample_count(), 3);
        let stamps: Vec<i64> = m.get_samples(10).iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![4, 3, 2]);
        // Baseline survives eviction.
        assert_eq!(m.start_time(), Some(0));
    }

    #[test]
    fn samples_newest_first_before_wrap() {
        let mut m = monitor(8);
        for t in [10, 11, 12] {
            m.record(sample(t, 0, 0));
        }
        let stamps: Vec<i64> = m.get_samples(2).iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![12, 11]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut m = monitor(0);
        m.record(sample(1, 0, 0));
        m.record(sample(2, 0, 0));
        assert_eq!(m.capacity(), 1);
        assert_eq!(m.sample_count(), 1);
        assert_eq!(m.latest().unwrap().timestamp, 2);
    }

    // ── Rates ───────────────────────────────────────────────────────

    #[test]
    fn rate_needs_two_samples() {
        let mut m = monitor(4);
        assert!(m.get_rate().is_none());
        m.record(sample(0, 0, 0));
        assert!(m.get_rate().is_none());
    }

    #[test]
    fn rate_over_newest_interval() {
        let mut m = monitor(4);
        m.record(sample(100, 1_000, 500));
        m.record(sample(102, 3_000, 1_500));
        m.record(sample(106, 7_000, 2_300));

        let rate = m.get_rate().unwrap();
        assert_eq!(rate.download_bps, 1_000.0);
        assert_eq!(rate.upload_bps, 200.0);
        assert_eq!(rate.total_downloaded, 6_000);
        assert_eq!(rate.total_uploaded, 1_800);
    }

    #[test]
    fn equal_timestamps_clamp_dt_to_one_second() {
        let mut m = monitor(4);
        m.record(sample(100, 0, 0));
        m.record(sample(100, 500, 0));
        let rate = m.get_rate().unwrap();
        assert!(rate.download_bps.is_finite());
        assert_eq!(rate.download_bps, 500.0);
    }

    #[test]
    fn counter_reset_uses_magnitude_and_dips_totals() {
        let mut m = monitor(4);
        m.record(sample(0, 1_000_000, 0));
        m.record(sample(2, 1_000_100, 0));
        m.record(sample(4, 50, 0));

        let rate = m.get_rate().unwrap();
        assert_eq!(rate.download_bps, (1_000_100.0 - 50.0) / 2.0);
        assert!(rate.download_bps >= 0.0);
        assert_eq!(rate.total_downloaded, 0, "totals dip instead of wrapping");

        m.reset();
        assert_eq!(m.sample_count(), 0);
        assert!(!m.has_baseline());
        m.record(sample(6, 50, 0));
        m.record(sample(8, 250, 0));
        assert_eq!(m.get_rate().unwrap().total_downloaded, 200);
    }

    // ── Sources ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn sysfs_source_reads_all_counters() {
        let root = tempfile::tempdir().unwrap();
        write_sysfs(
            root.path(),
            "tun0",
            &[
                ("rx_bytes", 100),
                ("tx_bytes", 200),
                ("rx_packets", 3),
                ("tx_packets", 4),
                ("rx_errors", 5),
                ("tx_errors", 6),
                ("rx_dropped", 7),
                ("tx_dropped", 8),
            ],
        );
        let bus = Arc::new(MockBus::new());
        let sessions = SessionClient::new(bus);
        let mut m = BandwidthMonitor::new(S1, "tun0", StatsSource::Sysfs, 4)
            .with_sysfs_root(root.path());

        let s = m.update(&sessions).await.unwrap();
        assert_eq!(
            (s.bytes_in, s.bytes_out, s.errors_in, s.dropped_out),
            (100, 200, 5, 8)
        );
        assert_eq!(m.stats_source_used(), Some(StatsSource::Sysfs));
    }

    #[tokio::test]
    async fn sysfs_optional_counters_default_to_zero() {
        let root = tempfile::tempdir().unwrap();
        write_sysfs(root.path(), "tun0", &[("rx_bytes", 42)]);
        let sessions = SessionClient::new(Arc::new(MockBus::new()));
        let mut m = BandwidthMonitor::new(S1, "tun0", StatsSource::Sysfs, 4)
            .with_sysfs_root(root.path());

        let s = m.update(&sessions).await.unwrap();
        assert_eq!((s.bytes_in, s.bytes_out, s.errors_in), (42, 0, 0));
    }

    #[tokio::test]
    async fn sysfs_requires_rx_bytes() {
        let root = tempfile::tempdir().unwrap();
        write_sysfs(root.path(), "tun0", &[("tx_bytes", 42)]);
        let sessions = SessionClient::new(Arc::new(MockBus::new()));
        let mut m = BandwidthMonitor::new(S1, "tun0", StatsSource::Sysfs, 4)
            .with_sysfs_root(root.path());

        let result = m.update(&sessions).await;
        assert!(matches!(result, Err(CoreError::Stats { .. })), "got: {result:?}");
        assert_eq!(m.sample_count(), 0);
    }

    #[tokio::test]
    async fn daemon_source_leaves_error_counters_zero() {
        let bus = Arc::new(MockBus::new());
        bus.set_property(S1, PROP_STATISTICS, daemon_stats(1_000, 2_000));
        let sessions = SessionClient::new(Arc::clone(&bus));
        let mut m = BandwidthMonitor::new(S1, "tun0", StatsSource::Daemon, 4);

        let s = m.update(&sessions).await.unwrap();
        assert_eq!((s.bytes_in, s.bytes_out, s.packets_out), (1_000, 2_000, 2));
        assert_eq!((s.errors_in, s.dropped_in), (0, 0));
        assert_eq!(m.stats_source_used(), Some(StatsSource::Daemon));
    }

    #[tokio::test]
    async fn daemon_only_mode_never_falls_back() {
        let root = tempfile::tempdir().unwrap();
        write_sysfs(root.path(), "tun0", &[("rx_bytes", 42)]);
        let sessions = SessionClient::new(Arc::new(MockBus::new()));
        let mut m = BandwidthMonitor::new(S1, "tun0", StatsSource::Daemon, 4)
            .with_sysfs_root(root.path());

        let result = m.update(&sessions).await;
        assert!(matches!(result, Err(CoreError::NotSupported { .. })), "got: {result:?}");
    }

    #[tokio::test]
    async fn auto_prefers_daemon_then_falls_back_to_sysfs() {
        let root = tempfile::tempdir().unwrap();
        write_sysfs(root.path(), "tun0", &[("rx_bytes", 42), ("tx_bytes", 43)]);
        let bus = Arc::new(MockBus::new());
        bus.set_property(S1, PROP_STATISTICS, daemon_stats(1_000, 2_000));
        let sessions = SessionClient::new(Arc::clone(&bus));
        let mut m = monitor(4).with_sysfs_root(root.path());

        assert_eq!(m.update(&sessions).await.unwrap().bytes_in, 1_000);
        assert_eq!(m.stats_source_used(), Some(StatsSource::Daemon));

        bus.remove_property(S1, PROP_STATISTICS);
        assert_eq!(m.update(&sessions).await.unwrap().bytes_in, 42);
        assert_eq!(m.stats_source_used(), Some(StatsSource::Sysfs));
    }

    #[tokio::test]
    async fn auto_does_not_hide_a_dead_bus_behind_sysfs() {
        let root = tempfile::tempdir().unwrap();
        write_sysfs(root.path(), "tun0", &[("rx_bytes", 42)]);
        let bus = Arc::new(MockBus::new());
        bus.fail_property(
            S1,
            PROP_STATISTICS,
            tunnelwatch_api::Error::BusUnavailable("connection reset".into()),
        );
        let sessions = SessionClient::new(Arc::clone(&bus));
        let mut m = monitor(4).with_sysfs_root(root.path());

        let result = m.update(&sessions).await;
        assert!(matches!(result, Err(CoreError::BusUnavailable { .. })), "got: {result:?}");
        assert_eq!(m.sample_count(), 0);
    }

    #[tokio::test]
    async fn auto_without_any_source_is_not_supported() {
        let root = tempfile::tempdir().unwrap();
        let sessions = SessionClient::new(Arc::new(MockBus::new()));
        let mut m = monitor(4).with_sysfs_root(root.path());

        let result = m.update(&sessions).await;
        assert!(matches!(result, Err(CoreError::NotSupported { .. })), "got: {result:?}");
    }

    #[test]
    fn source_parses_case_insensitively() {
        assert_eq!("SYSFS".parse::<StatsSource>().unwrap(), StatsSource::Sysfs);
        assert_eq!(StatsSource::Auto.to_string(), "auto");
    }
}
