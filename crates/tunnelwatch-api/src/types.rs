// ── Wire and domain types for the OpenVPN3 bus surface ──
//
// The `Raw*` structs mirror property signatures exactly so they can be
// decoded straight out of a variant. The public domain types are what the
// clients hand back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zvariant::{OwnedValue, Type, Value};

/// User-input request type the daemon uses for web authentication.
pub const WEB_AUTH_INPUT_TYPE: u32 = 1;

/// Port assumed when a `remote` directive omits it.
pub const DEFAULT_REMOTE_PORT: u16 = 1194;

// ── Raw property shapes ─────────────────────────────────────────────

/// `status` property, signature `(uus)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Type, Value, OwnedValue)]
pub struct RawStatus {
    pub major: u32,
    pub minor: u32,
    pub message: String,
}

/// `connected_to` property, signature `(ssu)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Type, Value, OwnedValue)]
pub struct RawConnectedTo {
    pub protocol: String,
    pub host: String,
    pub port: u32,
}

/// Reply of `UserInputQueueFetch`, signature `(uuusssb)`.
pub type RawInputRequest = (u32, u32, u32, String, String, String, bool);

// ── Profiles ────────────────────────────────────────────────────────

/// Transport named on a `remote` directive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteTransport {
    #[default]
    Udp,
    Tcp,
}

impl RemoteTransport {
    /// `tcp`, `tcp-client`, `tcp4`, `tcp6` all select TCP; anything else is UDP.
    pub fn from_directive(token: &str) -> Self {
        if token.to_ascii_lowercase().starts_with("tcp") {
            Self::Tcp
        } else {
            Self::Udp
        }
    }
}

/// The first `remote` directive of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    /// `None` when the profile text carries no `remote` line.
    pub host: Option<String>,
    pub port: u16,
    pub transport: RemoteTransport,
}

impl Default for Remote {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_REMOTE_PORT,
            transport: RemoteTransport::Udp,
        }
    }
}

/// A configured VPN tunnel definition stored by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Object path of the configuration object.
    pub id: String,
    pub name: String,
    pub locked_down: bool,
    pub persistent: bool,
    pub remote: Remote,
}

// ── Sessions ────────────────────────────────────────────────────────

/// Raw `(major, minor, message)` status as reported by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub major: u32,
    pub minor: u32,
    pub message: String,
}

impl From<RawStatus> for SessionStatus {
    fn from(raw: RawStatus) -> Self {
        Self {
            major: raw.major,
            minor: raw.minor,
            message: raw.message,
        }
    }
}

/// The `(transport, host, port)` a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTuple {
    pub transport: String,
    pub host: String,
    pub port: u32,
}

impl ConnectionTuple {
    /// Only a fully populated tuple counts; the daemon reports empty
    /// strings and port 0 for unbound sessions.
    pub fn from_raw(raw: RawConnectedTo) -> Option<Self> {
        if raw.protocol.is_empty() || raw.host.is_empty() || raw.port == 0 {
            return None;
        }
        Some(Self {
            transport: raw.protocol,
            host: raw.host,
            port: raw.port,
        })
    }
}

/// A pending `(type, group)` slot of the user-input queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlot {
    pub kind: u32,
    pub group: u32,
}

impl InputSlot {
    pub fn is_web_auth(self) -> bool {
        self.kind == WEB_AUTH_INPUT_TYPE
    }
}

/// A running (or pending) instance of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Object path of the session object.
    pub id: String,
    pub config_name: String,
    pub device_name: String,
    pub backend_pid: u32,
    /// Unix timestamp (seconds) of session creation; 0 if unknown.
    pub created: u64,
    pub status: SessionStatus,
    pub connected_to: Option<ConnectionTuple>,
    pub pending_inputs: Vec<InputSlot>,
}

impl Session {
    /// True iff the user-input queue holds a web-authentication request.
    pub fn auth_pending(&self) -> bool {
        self.pending_inputs.iter().any(|slot| slot.is_web_auth())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if self.created == 0 {
            return None;
        }
        let secs = i64::try_from(self.created).ok()?;
        DateTime::from_timestamp(secs, 0)
    }
}

/// Cumulative counters from the session `statistics` property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets_in: u64,
    pub packets_out: u64,
}
