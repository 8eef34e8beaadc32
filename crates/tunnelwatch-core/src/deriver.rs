// ── Session state derivation ──
//
// Fuses one daemon observation of a session (status triple, user-input
// queue, connection tuple) into a single `ConnectionState`. Pure: the
// same inputs always give the same state.

use tunnelwatch_api::Session;

use crate::fsm::ConnectionState;

/// Status group for connection events.
pub const STATUS_MAJOR_CONNECTION: u32 = 2;
/// Status group the daemon uses for paused sessions.
pub const STATUS_MAJOR_PAUSE: u32 = 4;
pub const STATUS_MINOR_PAUSING: u32 = 13;
pub const STATUS_MINOR_PAUSED: u32 = 14;

const ERROR_MARKERS: &[&str] = &["failed", "Failed", "Error"];
const AUTH_MARKERS: &[&str] = &["authentication required", "Web authentication", "https://"];

/// Everything the deriver looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInputs<'a> {
    pub major: u32,
    pub minor: u32,
    pub message: &'a str,
    /// `connected_to` returned a non-empty transport/host/port.
    pub has_connection_tuple: bool,
    /// The user-input queue holds a web-authentication request.
    pub auth_pending: bool,
}

impl<'a> StateInputs<'a> {
    pub fn from_session(session: &'a Session) -> Self {
        Self {
            major: session.status.major,
            minor: session.status.minor,
            message: &session.status.message,
            has_connection_tuple: session.connected_to.is_some(),
            auth_pending: session.auth_pending(),
        }
    }

    fn is_paused(&self) -> bool {
        self.major == STATUS_MAJOR_PAUSE
            || (self.major == STATUS_MAJOR_CONNECTION
                && matches!(self.minor, STATUS_MINOR_PAUSING | STATUS_MINOR_PAUSED))
    }
}

/// Derive a state; the first matching rule wins.
///
/// Pause detection runs before the connection-tuple check because paused
/// sessions keep their tuple.
pub fn derive_state(inputs: &StateInputs<'_>) -> ConnectionState {
    let message = inputs.message;

    if inputs.auth_pending {
        return ConnectionState::AuthRequired;
    }
    if inputs.is_paused() {
        return ConnectionState::Paused;
    }
    if inputs.has_connection_tuple {
        return ConnectionState::Connected;
    }
    if contains_any(message, ERROR_MARKERS) {
        return ConnectionState::Error;
    }
    if inputs.major == STATUS_MAJOR_CONNECTION {
        return ConnectionState::Connecting;
    }

    if contains_any(message, AUTH_MARKERS) {
        ConnectionState::AuthRequired
    } else if message.contains("Connecting") {
        ConnectionState::Connecting
    } else if message.contains("Reconnecting") {
        ConnectionState::Reconnecting
    } else if message.contains("Paused") {
        ConnectionState::Paused
    } else {
        ConnectionState::Disconnected
    }
}

/// Shorthand for `derive_state(&StateInputs::from_session(session))`.
pub fn session_state(session: &Session) -> ConnectionState {
    derive_state(&StateInputs::from_session(session))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use tunnelwatch_api::{ConnectionTuple, InputSlot, SessionStatus};

    use super::*;

    fn inputs(major: u32, minor: u32, message: &str) -> StateInputs<'_> {
        StateInputs {
            major,
            minor,
            message,
            has_connection_tuple: false,
            auth_pending: false,
        }
    }

    #[test]
    fn auth_pending_wins_over_everything() {
        let i = StateInputs {
            auth_pending: true,
            has_connection_tuple: true,
            ..inputs(2, 14, "Connection failed")
        };
        assert_eq!(derive_state(&i), ConnectionState::AuthRequired);
    }

    #[test]
    fn paused_beats_connected() {
        for (major, minor) in [(2, 13), (2, 14), (4, 0), (4, 99)] {
            let i = StateInputs {
                has_connection_tuple: true,
                ..inputs(major, minor, "")
            };
            assert_eq!(derive_state(&i), ConnectionState::Paused, "({major}, {minor})");
        }
    }

    #[test]
    fn connection_tuple_means_connected() {
        let i = StateInputs {
            has_connection_tuple: true,
            ..inputs(2, 7, "")
        };
        assert_eq!(derive_state(&i), ConnectionState::Connected);
    }

    #[test]
    fn error_markers_without_tuple() {
        assert_eq!(derive_state(&inputs(2, 5, "Connection failed")), ConnectionState::Error);
        assert_eq!(derive_state(&inputs(3, 0, "Failed to resolve")), ConnectionState::Error);
        assert_eq!(derive_state(&inputs(0, 0, "Error: TLS")), ConnectionState::Error);
    }

    #[test]
    fn connection_group_without_tuple_is_connecting() {
        assert_eq!(derive_state(&inputs(2, 0, "Waiting")), ConnectionState::Connecting);
    }

    #[test]
    fn message_fallbacks() {
        assert_eq!(
            derive_state(&inputs(1, 0, "Web authentication pending")),
            ConnectionState::AuthRequired
        );
        assert_eq!(
            derive_state(&inputs(1, 0, "open https://auth.example.net")),
            ConnectionState::AuthRequired
        );
        assert_eq!(derive_state(&inputs(1, 0, "Connecting to server")), ConnectionState::Connecting);
        assert_eq!(derive_state(&inputs(1, 0, "Reconnecting")), ConnectionState::Reconnecting);
        assert_eq!(derive_state(&inputs(1, 0, "Paused by user")), ConnectionState::Paused);
        assert_eq!(derive_state(&inputs(0, 0, "")), ConnectionState::Disconnected);
    }

    #[test]
    fn derivation_is_idempotent() {
        let i = inputs(2, 14, "paused");
        assert_eq!(derive_state(&i), derive_state(&i));
    }

    #[test]
    fn session_adapter_reads_queue_and_tuple() {
        let mut session = Session {
            id: "/net/openvpn/v3/sessions/s1".into(),
            config_name: "work".into(),
            device_name: "tun0".into(),
            backend_pid: 1,
            created: 0,
            status: SessionStatus {
                major: 2,
                minor: 7,
                message: String::new(),
            },
            connected_to: Some(ConnectionTuple {
                transport: "UDP".into(),
                host: "203.0.113.5".into(),
                port: 1194,
            }),
            pending_inputs: Vec::new(),
        };
        assert_eq!(session_state(&session), ConnectionState::Connected);

        session.pending_inputs.push(InputSlot { kind: 1, group: 3 });
        assert_eq!(session_state(&session), ConnectionState::AuthRequired);
    }
}
