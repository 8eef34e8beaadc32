// ── Connection state machine ──
//
// One FSM per known profile. Transitions come from a fixed table; events
// with no entry for the current state are logged and dropped, so repeated
// identical observations from polling are no-ops.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use tracing::{debug, info, warn};

/// Connection state of a profile.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Paused,
    AuthRequired,
    Error,
}

/// Inputs to the FSM: user requests and daemon observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "snake_case")]
pub enum FsmEvent {
    ConnectRequested,
    SessionConnecting,
    SessionConnected,
    SessionPaused,
    SessionResumed,
    SessionAuthRequired,
    SessionError,
    SessionDisconnected,
    DisconnectRequested,
    SessionReconnecting,
}

use ConnectionState as S;
use FsmEvent as E;

/// `(from, event, to)`: the complete transition table.
pub const TRANSITIONS: &[(ConnectionState, FsmEvent, ConnectionState)] = &[
    // Disconnected accepts any observation as a one-step resync.
    (S::Disconnected, E::ConnectRequested, S::Connecting),
    (S::Disconnected, E::SessionConnecting, S::Connecting),
    (S::Disconnected, E::SessionConnected, S::Connected),
    (S::Disconnected, E::SessionPaused, S::Paused),
    (S::Disconnected, E::SessionAuthRequired, S::AuthRequired),
    (S::Disconnected, E::SessionError, S::Error),
    (S::Disconnected, E::SessionDisconnected, S::Disconnected),
    // Connecting
    (S::Connecting, E::SessionConnecting, S::Connecting),
    (S::Connecting, E::SessionConnected, S::Connected),
    (S::Connecting, E::SessionAuthRequired, S::AuthRequired),
    (S::Connecting, E::SessionError, S::Error),
    (S::Connecting, E::SessionDisconnected, S::Disconnected),
    (S::Connecting, E::DisconnectRequested, S::Disconnected),
    // Connected
    (S::Connected, E::SessionConnected, S::Connected),
    (S::Connected, E::SessionPaused, S::Paused),
    (S::Connected, E::SessionReconnecting, S::Reconnecting),
    (S::Connected, E::SessionError, S::Error),
    (S::Connected, E::SessionDisconnected, S::Disconnected),
    (S::Connected, E::DisconnectRequested, S::Disconnected),
    // Paused
    (S::Paused, E::SessionPaused, S::Paused),
    (S::Paused, E::SessionResumed, S::Connected),
    (S::Paused, E::SessionConnected, S::Connected),
    (S::Paused, E::SessionError, S::Error),
    (S::Paused, E::SessionDisconnected, S::Disconnected),
    (S::Paused, E::DisconnectRequested, S::Disconnected),
    // AuthRequired
    (S::AuthRequired, E::SessionAuthRequired, S::AuthRequired),
    (S::AuthRequired, E::SessionConnecting, S::Connecting),
    (S::AuthRequired, E::SessionConnected, S::Connected),
    (S::AuthRequired, E::SessionError, S::Error),
    (S::AuthRequired, E::SessionDisconnected, S::Disconnected),
    (S::AuthRequired, E::DisconnectRequested, S::Disconnected),
    // Error
    (S::Error, E::SessionError, S::Error),
    (S::Error, E::ConnectRequested, S::Connecting),
    (S::Error, E::SessionConnecting, S::Connecting),
    (S::Error, E::SessionConnected, S::Connected),
    (S::Error, E::SessionDisconnected, S::Disconnected),
    (S::Error, E::DisconnectRequested, S::Disconnected),
    // Reconnecting
    (S::Reconnecting, E::SessionReconnecting, S::Reconnecting),
    (S::Reconnecting, E::SessionConnected, S::Connected),
    (S::Reconnecting, E::SessionAuthRequired, S::AuthRequired),
    (S::Reconnecting, E::SessionError, S::Error),
    (S::Reconnecting, E::SessionDisconnected, S::Disconnected),
    (S::Reconnecting, E::DisconnectRequested, S::Disconnected),
];

/// Table lookup: where `event` takes `state`, if anywhere.
pub fn next_state(state: ConnectionState, event: FsmEvent) -> Option<ConnectionState> {
    TRANSITIONS
        .iter()
        .find(|(from, ev, _)| *from == state && *ev == event)
        .map(|(_, _, to)| *to)
}

/// What `process_event` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A defined self-transition.
    Unchanged,
    /// No transition defined; the event was dropped.
    Ignored,
}

/// The state machine for a single profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFsm {
    profile: String,
    state: ConnectionState,
}

impl ConnectionFsm {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn buttons(&self) -> ButtonStates {
        button_states(self.state)
    }

    /// Apply `event` through the transition table.
    pub fn process_event(&mut self, event: FsmEvent) -> Outcome {
        let from = self.state;
        match next_state(from, event) {
            Some(to) if to == from => {
                debug!("FSM '{}': {from} + {event} (no change)", self.profile);
                Outcome::Unchanged
            }
            Some(to) => {
                info!("FSM '{}': {from} + {event} -> {to}", self.profile);
                self.state = to;
                Outcome::Changed { from, to }
            }
            None => {
                warn!(
                    "FSM '{}': invalid transition {from} + {event} (ignored)",
                    self.profile
                );
                Outcome::Ignored
            }
        }
    }

    /// Overwrite the state without consulting the table.
    ///
    /// Only for resyncing after the FSM and the daemon have diverged.
    pub fn force_state(&mut self, state: ConnectionState) -> Outcome {
        let from = self.state;
        if from == state {
            return Outcome::Unchanged;
        }
        warn!(
            "FSM '{}': Force-syncing {from} -> {state} (D-Bus reality override)",
            self.profile
        );
        self.state = state;
        Outcome::Changed { from, to: state }
    }
}

// ── Action enablement ───────────────────────────────────────────────

/// Which user actions are available in a given state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ButtonStates {
    pub connect: bool,
    pub disconnect: bool,
    pub pause: bool,
    pub resume: bool,
    pub authenticate: bool,
}

const NO_ACTIONS: ButtonStates = ButtonStates {
    connect: false,
    disconnect: false,
    pause: false,
    resume: false,
    authenticate: false,
};

/// Static state → enabled-actions table.
pub const fn button_states(state: ConnectionState) -> ButtonStates {
    match state {
        S::Disconnected => ButtonStates {
            connect: true,
            ..NO_ACTIONS
        },
        S::Connecting | S::Reconnecting => ButtonStates {
            disconnect: true,
            ..NO_ACTIONS
        },
        S::Connected => ButtonStates {
            disconnect: true,
            pause: true,
            ..NO_ACTIONS
        },
        S::Paused => ButtonStates {
            disconnect: true,
            resume: true,
            ..NO_ACTIONS
        },
        S::AuthRequired => ButtonStates {
            disconnect: true,
            authenticate: true,
            ..NO_ACTIONS
        },
        S::Error => ButtonStates {
            connect: true,
            disconnect: true,
            ..NO_ACTIONS
        },
    }
}

/// The daemon observation that corresponds to having derived `state`.
pub const fn observation_for(state: ConnectionState) -> FsmEvent {
    match state {
        S::Disconnected => E::SessionDisconnected,
        S::Connecting => E::SessionConnecting,
        S::Connected => E::SessionConnected,
        S::Reconnecting => E::SessionReconnecting,
        S::Paused => E::SessionPaused,
        S::AuthRequired => E::SessionAuthRequired,
        S::Error => E::SessionError,
    }
}
