//! Binary error types with miette diagnostics.
//!
//! Startup failures are fatal and end the process with an exit code;
//! command failures are reported and the loop keeps running.

use miette::Diagnostic;
use thiserror::Error;

use tunnelwatch_config::ConfigError;
use tunnelwatch_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    // ── Startup ──────────────────────────────────────────────────────
    #[error("Cannot connect to the system bus")]
    #[diagnostic(
        code(tunnelwatch::bus_unavailable),
        help(
            "Is the D-Bus system bus running, and is OpenVPN3 installed?\n\
             Try: openvpn3 sessions-list"
        )
    )]
    BusUnavailable {
        #[source]
        source: tunnelwatch_api::Error,
    },

    #[error("Invalid configuration")]
    #[diagnostic(
        code(tunnelwatch::config),
        help("Check {path}, or the TUNNELWATCH_* environment variables.")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Commands ─────────────────────────────────────────────────────
    #[error("Unknown command: {input}")]
    #[diagnostic(
        code(tunnelwatch::usage),
        help(
            "Commands: connect <profile>, disconnect <profile>, pause <profile> [reason],\n\
             resume <profile>, auth <profile>, import <name> <file>, delete <profile>,\n\
             cleanup, refresh, config, help, quit"
        )
    )]
    UnknownCommand { input: String },

    #[error("{message}")]
    #[diagnostic(code(tunnelwatch::usage), help("Type `help` for the command list."))]
    Usage { message: String },

    #[error(transparent)]
    #[diagnostic(code(tunnelwatch::core))]
    Core(#[from] CoreError),

    // ── Local ────────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(tunnelwatch::io))]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(tunnelwatch::json))]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BusUnavailable { .. } => exit_code::CONNECTION,
            Self::Config { .. } => exit_code::CONFIG,
            Self::UnknownCommand { .. } | Self::Usage { .. } => exit_code::USAGE,
            Self::Core(err) => match err {
                CoreError::ProfileNotFound { .. }
                | CoreError::NoSession { .. }
                | CoreError::NotFound { .. } => exit_code::NOT_FOUND,
                CoreError::BusUnavailable { .. } | CoreError::ServiceStarting { .. } => {
                    exit_code::CONNECTION
                }
                _ => exit_code::GENERAL,
            },
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}
