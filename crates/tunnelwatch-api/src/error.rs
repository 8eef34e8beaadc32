use thiserror::Error;

/// Well-known bus error names raised while an auto-started service is
/// still coming up.
const ACTIVATION_ERROR_NAMES: &[&str] = &[
    "org.freedesktop.DBus.Error.ServiceUnknown",
    "org.freedesktop.DBus.Error.NameHasNoOwner",
];

pub(crate) const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";

/// Error names meaning the remote object lacks the member asked for.
const MISSING_MEMBER_ERROR_NAMES: &[&str] =
    &[UNKNOWN_PROPERTY, UNKNOWN_INTERFACE, UNKNOWN_METHOD, INVALID_ARGS];

/// Top-level error type for the `tunnelwatch-api` crate.
///
/// Covers every failure mode of the bus surface: the connection itself,
/// remote method errors, reply decoding, and the "absent" outcomes the
/// daemon signals for optional data. `tunnelwatch-core` maps these into
/// user-facing errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// The bus connection could not be opened or was lost mid-call.
    #[error("Message bus unavailable: {0}")]
    BusUnavailable(String),

    /// An auto-started service has not claimed its name yet.
    #[error("Service {service} is still activating")]
    ServiceActivating { service: String },

    // ── Remote ──────────────────────────────────────────────────────
    /// The remote side answered a call with an error reply.
    #[error("{name}: {message}")]
    MethodFailed { name: String, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// A reply or property did not match its expected signature.
    #[error("Unexpected reply shape for {member}: {message}")]
    ShapeMismatch { member: String, message: String },

    /// An object path supplied by the caller is not syntactically valid.
    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    // ── Absence ─────────────────────────────────────────────────────
    /// The requested entry does not exist (empty user-input queue, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The daemon does not provide this data (older daemon, no statistics).
    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// Returns `true` if the target service is still being activated and
    /// the call is worth repeating shortly.
    pub fn is_activating(&self) -> bool {
        matches!(self, Self::ServiceActivating { .. })
    }

    /// Returns `true` if this is a "not found" outcome rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if the remote object has no such property, interface
    /// or method, as with daemons predating a feature.
    pub fn is_missing_member(&self) -> bool {
        matches!(self, Self::MethodFailed { name, .. } if MISSING_MEMBER_ERROR_NAMES.contains(&name.as_str()))
    }

    /// Returns `true` if the next poll tick may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BusUnavailable(_) | Self::ServiceActivating { .. })
    }

    /// Classify a remote error reply by its error name.
    ///
    /// Activation-class names and anything carrying `ENODATA` become
    /// [`Error::ServiceActivating`]; everything else is a plain
    /// [`Error::MethodFailed`] carrying the daemon's message verbatim.
    pub fn from_error_reply(service: &str, name: &str, message: Option<String>) -> Self {
        let activating = ACTIVATION_ERROR_NAMES.contains(&name)
            || name.starts_with("org.freedesktop.DBus.Error.Spawn.")
            || name.contains("ENODATA")
            || message.as_deref().is_some_and(|m| m.contains("ENODATA"));

        if activating {
            Self::ServiceActivating {
                service: service.to_owned(),
            }
        } else {
            Self::MethodFailed {
                name: name.to_owned(),
                message: message.unwrap_or_default(),
            }
        }
    }

    /// Translate a `zbus` failure that happened while talking to `service`.
    pub fn from_zbus(service: &str, member: &str, err: zbus::Error) -> Self {
        match err {
            zbus::Error::MethodError(name, message, _) => {
                Self::from_error_reply(service, name.as_str(), message)
            }
            zbus::Error::FDO(fdo) => match *fdo {
                zbus::fdo::Error::ServiceUnknown(_) | zbus::fdo::Error::NameHasNoOwner(_) => {
                    Self::ServiceActivating {
                        service: service.to_owned(),
                    }
                }
                zbus::fdo::Error::UnknownProperty(message) => Self::MethodFailed {
                    name: UNKNOWN_PROPERTY.into(),
                    message,
                },
                zbus::fdo::Error::UnknownInterface(message) => Self::MethodFailed {
                    name: UNKNOWN_INTERFACE.into(),
                    message,
                },
                zbus::fdo::Error::UnknownMethod(message) => Self::MethodFailed {
                    name: UNKNOWN_METHOD.into(),
                    message,
                },
                zbus::fdo::Error::InvalidArgs(message) => Self::MethodFailed {
                    name: INVALID_ARGS.into(),
                    message,
                },
                other => Self::MethodFailed {
                    name: member.to_owned(),
                    message: other.to_string(),
                },
            },
            zbus::Error::InputOutput(e) => Self::BusUnavailable(e.to_string()),
            zbus::Error::Handshake(msg) | zbus::Error::Address(msg) => Self::BusUnavailable(msg),
            zbus::Error::Variant(e) => Self::ShapeMismatch {
                member: member.to_owned(),
                message: e.to_string(),
            },
            zbus::Error::InvalidReply => Self::ShapeMismatch {
                member: member.to_owned(),
                message: "reply signature mismatch".into(),
            },
            other => Self::MethodFailed {
                name: member.to_owned(),
                message: other.to_string(),
            },
        }
    }
}
