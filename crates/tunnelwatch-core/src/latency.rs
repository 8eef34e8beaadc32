// ── Latency probe ──
//
// Runs `ping -c 1 -W <secs> <host>` as a child process and extracts the
// round-trip time. The child's output is read asynchronously so the
// event loop never blocks on it.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

/// Grace period on top of ping's own deadline before the child is killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

const TIMEOUT_MARKERS: &[&str] = &["Destination Host Unreachable", "100% packet loss"];
const DNS_MARKERS: &[&str] = &["unknown host", "Name or service not known"];

/// Why a latency probe produced no measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyError {
    #[error("Timeout")]
    Timeout,
    #[error("DNS Error")]
    Dns,
    #[error("Permission Denied")]
    Permission,
    #[error("Parse Error")]
    Parse,
    #[error("Execution Error")]
    Exec,
}

/// ping's `-W` argument: milliseconds rounded up to whole seconds, at least 1.
pub fn timeout_secs(timeout_ms: u32) -> u32 {
    timeout_ms.div_ceil(1000).max(1)
}

/// Strip a trailing `:port` from `host:port` (and brackets from `[v6]:port`).
pub fn extract_hostname(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    match address.split_once(':') {
        Some((host, port)) if !port.contains(':') => host,
        _ => address,
    }
}

/// Extract a round-trip time in whole milliseconds from ping output.
///
/// Error markers are checked first. The `rtt min/avg/max/mdev` summary
/// average is preferred over the first per-reply `time=` value.
pub fn parse_ping_output(output: &str) -> Result<u32, LatencyError> {
    if TIMEOUT_MARKERS.iter().any(|m| output.contains(m)) {
        return Err(LatencyError::Timeout);
    }
    if DNS_MARKERS.iter().any(|m| output.contains(m)) {
        return Err(LatencyError::Dns);
    }

    let summary_avg = output.lines().find_map(|line| {
        let (_, values) = line.split_once("rtt min/avg/max/mdev = ")?;
        values.split('/').nth(1)?.trim().parse::<f64>().ok()
    });
    let first_reply = || {
        output.lines().find_map(|line| {
            let (_, rest) = line.split_once("time=")?;
            let number: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            number.parse::<f64>().ok()
        })
    };

    summary_avg
        .or_else(first_reply)
        .and_then(round_ms)
        .ok_or(LatencyError::Parse)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
fn round_ms(ms: f64) -> Option<u32> {
    // Range-checked above the cast.
    (ms.is_finite() && ms >= 0.0 && ms < f64::from(u32::MAX)).then(|| ms.round() as u32)
}

/// Configurable ping runner.
#[derive(Debug, Clone)]
pub struct LatencyProbe {
    program: String,
    timeout_ms: u32,
}

impl Default for LatencyProbe {
    fn default() -> Self {
        Self {
            program: "ping".into(),
            timeout_ms: 2000,
        }
    }
}

impl LatencyProbe {
    pub fn new(timeout_ms: u32) -> Self {
        Self {
            timeout_ms,
            ..Self::default()
        }
    }

    /// Run a different executable with ping's arguments.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Measure the round-trip time to `host` in milliseconds.
    pub async fn probe(&self, host: &str) -> Result<u32, LatencyError> {
        let host = extract_hostname(host);
        let secs = timeout_secs(self.timeout_ms);
        trace!(host, secs, program = %self.program, "spawning latency probe");

        let child = Command::new(&self.program)
            .args(["-c", "1", "-W", &secs.to_string(), host])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                debug!(error = %e, program = %self.program, "latency probe failed to start");
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    LatencyError::Permission
                } else {
                    LatencyError::Exec
                }
            })?;

        let deadline = Duration::from_secs(u64::from(secs)) + KILL_GRACE;
        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| LatencyError::Timeout)?
            .map_err(|_| LatencyError::Exec)?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if text.contains("Permission denied") || text.contains("Operation not permitted") {
            return Err(LatencyError::Permission);
        }

        match parse_ping_output(&text) {
            Err(LatencyError::Parse) if !output.status.success() => Err(LatencyError::Timeout),
            other => {
                debug!(host, result = ?other, "latency probe finished");
                other
            }
        }
    }
}

/// One-shot probe with the system `ping`.
pub async fn probe_latency(host: &str, timeout_ms: u32) -> Result<u32, LatencyError> {
    LatencyProbe::new(timeout_ms).probe(host).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const LINUX_PING: &str = "\
PING vpn.example.net (203.0.113.5) 56(84) bytes of data.
64 bytes from 203.0.113.5: icmp_seq=1 ttl=54 time=23.6 ms

--- vpn.example.net ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 23.412/23.587/23.601/0.000 ms
";

    #[test]
    fn timeout_rounds_up_to_seconds() {
        assert_eq!(timeout_secs(0), 1);
        assert_eq!(timeout_secs(1), 1);
        assert_eq!(timeout_secs(1000), 1);
        assert_eq!(timeout_secs(1001), 2);
        assert_eq!(timeout_secs(2500), 3);
    }

    #[test]
    fn summary_average_wins() {
        assert_eq!(parse_ping_output(LINUX_PING), Ok(24));
    }

    #[test]
    fn falls_back_to_first_reply_time() {
        let out = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=7.4 ms\n64 bytes: time=99 ms\n";
        assert_eq!(parse_ping_output(out), Ok(7));
    }

    #[test]
    fn error_markers() {
        assert_eq!(
            parse_ping_output("From 10.0.0.1 icmp_seq=1 Destination Host Unreachable"),
            Err(LatencyError::Timeout)
        );
        assert_eq!(
            parse_ping_output("1 packets transmitted, 0 received, 100% packet loss"),
            Err(LatencyError::Timeout)
        );
        assert_eq!(
            parse_ping_output("ping: nowhere.invalid: Name or service not known"),
            Err(LatencyError::Dns)
        );
        assert_eq!(parse_ping_output("ping: unknown host nowhere"), Err(LatencyError::Dns));
        assert_eq!(parse_ping_output("garbage"), Err(LatencyError::Parse));
    }

    #[test]
    fn error_strings() {
        assert_eq!(LatencyError::Timeout.to_string(), "Timeout");
        assert_eq!(LatencyError::Dns.to_string(), "DNS Error");
        assert_eq!(LatencyError::Permission.to_string(), "Permission Denied");
        assert_eq!(LatencyError::Parse.to_string(), "Parse Error");
        assert_eq!(LatencyError::Exec.to_string(), "Execution Error");
    }

    #[test]
    fn hostname_extraction() {
        assert_eq!(extract_hostname("vpn.example.net:1194"), "vpn.example.net");
        assert_eq!(extract_hostname("vpn.example.net"), "vpn.example.net");
        assert_eq!(extract_hostname("[2001:db8::1]:1194"), "2001:db8::1");
        assert_eq!(extract_hostname("2001:db8::1"), "2001:db8::1");
    }

    #[tokio::test]
    async fn missing_program_is_exec_error() {
        let probe = LatencyProbe::new(1000).with_program("/nonexistent/tunnelwatch-ping");
        assert_eq!(probe.probe("localhost").await, Err(LatencyError::Exec));
    }

    #[tokio::test]
    async fn failing_child_without_output_is_timeout() {
        let probe = LatencyProbe::new(1000).with_program("false");
        assert_eq!(probe.probe("localhost").await, Err(LatencyError::Timeout));
    }

    #[tokio::test]
    async fn reads_child_stdout() {
        // `echo` prints its arguments, including the host we pass.
        let probe = LatencyProbe::new(1000).with_program("echo");
        assert_eq!(probe.probe("time=12.6").await, Ok(13));
    }
}
