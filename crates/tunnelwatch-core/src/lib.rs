//! Connection logic between `tunnelwatch-api` and UI consumers.
//!
//! - **[`Orchestrator`]**: root object owning the bus clients, one
//!   [`ConnectionFsm`] per profile and one [`BandwidthMonitor`] per session.
//!   [`start()`](Orchestrator::start) polls once and spawns the periodic
//!   tasks; consumers read [`Snapshot`]s from a `watch` channel and
//!   [`OrchestratorEvent`]s from a `broadcast` channel.
//!
//! - **State derivation** ([`derive_state`]): fuses the status code pair,
//!   the user-input queue and the connection tuple into one
//!   [`ConnectionState`] through a fixed precedence ladder.
//!
//! - **[`ConnectionFsm`]**: table-driven state machine whose state maps to
//!   a set of enabled actions ([`button_states`]).
//!
//! - **[`BandwidthMonitor`]**: ring of cumulative counter samples read from
//!   the daemon or sysfs, with rates over irregular timestamps.
//!
//! - **Latency probe** ([`probe_latency`]): asynchronous `ping` child
//!   process with parsed round-trip times.

pub mod bandwidth;
pub mod config;
pub mod deriver;
pub mod error;
pub mod format;
pub mod fsm;
pub mod latency;
pub mod model;
pub mod orchestrator;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bandwidth::{BandwidthMonitor, BandwidthRate, BandwidthSample, StatsSource};
pub use config::OrchestratorConfig;
pub use deriver::{StateInputs, derive_state, session_state};
pub use error::CoreError;
pub use format::format_elapsed;
pub use fsm::{ButtonStates, ConnectionFsm, ConnectionState, FsmEvent, Outcome, button_states};
pub use latency::{LatencyError, LatencyProbe, probe_latency};
pub use model::{
    AggregateRate, LatencyReading, OrchestratorEvent, ProfileView, SessionView, Snapshot,
};
pub use orchestrator::Orchestrator;
