// ── Core error types ──
//
// User-facing errors from tunnelwatch-core. Bus-level detail (error
// names, reply signatures) is folded into these variants by the
// `From<tunnelwatch_api::Error>` impl; the daemon's own message text is
// kept verbatim.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the OpenVPN3 daemon: {reason}")]
    BusUnavailable { reason: String },

    #[error("OpenVPN3 service {service} is not ready yet")]
    ServiceStarting { service: String },

    // ── Daemon errors ────────────────────────────────────────────────
    #[error("{message}")]
    Rpc { name: String, message: String },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Profile not found: {name}")]
    ProfileNotFound { name: String },

    #[error("No active session for profile '{profile}'")]
    NoSession { profile: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    // ── Statistics ───────────────────────────────────────────────────
    #[error("Not supported: {message}")]
    NotSupported { message: String },

    #[error("Cannot read interface statistics: {message}")]
    Stats { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` if retrying on the next poll tick may help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BusUnavailable { .. } | Self::ServiceStarting { .. })
    }
}

// ── Conversion from bus-layer errors ─────────────────────────────────

impl From<tunnelwatch_api::Error> for CoreError {
    fn from(err: tunnelwatch_api::Error) -> Self {
        match err {
            tunnelwatch_api::Error::BusUnavailable(reason) => CoreError::BusUnavailable { reason },
            tunnelwatch_api::Error::ServiceActivating { service } => {
                CoreError::ServiceStarting { service }
            }
            tunnelwatch_api::Error::MethodFailed { name, message } => {
                CoreError::Rpc { name, message }
            }
            tunnelwatch_api::Error::ShapeMismatch { member, message } => CoreError::Rpc {
                name: member,
                message: format!("unexpected reply from the daemon ({message})"),
            },
            tunnelwatch_api::Error::InvalidPath(path) => {
                CoreError::Internal(format!("invalid object path: {path}"))
            }
            tunnelwatch_api::Error::NotFound(message) => CoreError::NotFound { message },
            tunnelwatch_api::Error::NotSupported(message) => CoreError::NotSupported { message },
        }
    }
}
