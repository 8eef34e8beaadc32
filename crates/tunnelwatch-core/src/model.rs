// ── Observation model ──
//
// Immutable views published by the `Orchestrator`. Consumers receive
// these through a `watch` channel and never touch the live FSM or
// monitor maps.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tunnelwatch_api::{Profile, Session};

use crate::bandwidth::{BandwidthRate, StatsSource};
use crate::fsm::{ButtonStates, ConnectionState};
use crate::latency::LatencyError;

/// A profile together with its FSM state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileView {
    pub profile: Profile,
    pub state: ConnectionState,
    pub buttons: ButtonStates,
    /// Some session reports this profile's name as its `config_name`.
    pub in_use: bool,
    pub session_id: Option<String>,
}

/// Outcome of the latest latency probe for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyReading {
    Millis(u32),
    Failed(LatencyError),
}

impl fmt::Display for LatencyReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{ms} ms"),
            Self::Failed(err) => write!(f, "{err}"),
        }
    }
}

/// A live session with everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session: Session,
    pub state: ConnectionState,
    /// Compact time since the session was created.
    pub elapsed: String,
    /// Seconds since the bandwidth baseline.
    pub uptime_secs: Option<i64>,
    pub rate: Option<BandwidthRate>,
    pub stats_source: Option<StatsSource>,
    pub latency: Option<LatencyReading>,
}

/// Totals across every monitored session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateRate {
    pub download_bps: f64,
    pub upload_bps: f64,
    pub active_sessions: usize,
    pub longest_uptime_secs: Option<i64>,
}

impl AggregateRate {
    pub fn from_sessions(sessions: &[SessionView]) -> Self {
        sessions.iter().fold(
            Self {
                active_sessions: sessions.len(),
                ..Self::default()
            },
            |mut acc, view| {
                if let Some(rate) = view.rate {
                    acc.download_bps += rate.download_bps;
                    acc.upload_bps += rate.upload_bps;
                }
                acc.longest_uptime_secs = acc.longest_uptime_secs.max(view.uptime_secs);
                acc
            },
        )
    }
}

/// Everything a UI needs to render one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub profiles: Vec<ProfileView>,
    pub sessions: Vec<SessionView>,
    pub aggregate: AggregateRate,
    pub taken_at: DateTime<Utc>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            sessions: Vec::new(),
            aggregate: AggregateRate::default(),
            taken_at: Utc::now(),
        }
    }
}

impl Snapshot {
    pub fn profile(&self, name: &str) -> Option<&ProfileView> {
        self.profiles.iter().find(|p| p.profile.name == name)
    }

    pub fn session_for(&self, profile: &str) -> Option<&SessionView> {
        self.sessions
            .iter()
            .find(|s| s.session.config_name == profile)
    }
}

/// Notifications broadcast by the `Orchestrator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    StateChanged {
        profile: String,
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Surfaced once per session.
    AuthRequired {
        profile: String,
        session_id: String,
        url: String,
    },
    Error {
        message: String,
    },
}
