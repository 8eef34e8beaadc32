//! Line-oriented command protocol read from stdin.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use tunnelwatch_api::BusTransport;
use tunnelwatch_config::Config;
use tunnelwatch_core::Orchestrator;

use crate::error::AppError;

/// One stdin line. The first word names the command.
#[derive(Debug, Parser)]
#[command(multicall = true, disable_help_subcommand = true)]
struct Line {
    #[command(subcommand)]
    verb: Verb,
}

#[derive(Debug, Subcommand)]
enum Verb {
    /// Start a session for a profile
    Connect {
        #[arg(required = true, num_args = 1..)]
        profile: Vec<String>,
    },
    /// Disconnect the session of a profile
    Disconnect {
        #[arg(required = true, num_args = 1..)]
        profile: Vec<String>,
    },
    /// Pause the session of a profile
    Pause {
        profile: String,
        /// Sent to the daemon; defaults to "User requested"
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        reason: Vec<String>,
    },
    /// Resume a paused session
    Resume {
        #[arg(required = true, num_args = 1..)]
        profile: Vec<String>,
    },
    /// Print the pending web-authentication URL
    Auth {
        #[arg(required = true, num_args = 1..)]
        profile: Vec<String>,
    },
    /// Import an .ovpn file as a persistent profile
    Import { name: String, file: PathBuf },
    /// Remove a stored profile
    Delete {
        #[arg(required = true, num_args = 1..)]
        profile: Vec<String>,
    },
    /// Disconnect every session
    Cleanup,
    /// Poll the daemon now
    Refresh,
    /// Print the effective configuration
    Config,
    /// List the commands
    #[command(alias = "?")]
    Help,
    /// Stop monitoring and exit
    #[command(alias = "exit")]
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect { profile: String },
    Disconnect { profile: String },
    Pause { profile: String, reason: Option<String> },
    Resume { profile: String },
    Auth { profile: String },
    Import { name: String, path: PathBuf },
    Delete { profile: String },
    Cleanup,
    Refresh,
    Config,
    Help,
    Quit,
}

impl From<Verb> for Command {
    fn from(verb: Verb) -> Self {
        // Profile names may contain spaces; the words are joined back.
        let joined = |words: Vec<String>| words.join(" ");
        match verb {
            Verb::Connect { profile } => Self::Connect {
                profile: joined(profile),
            },
            Verb::Disconnect { profile } => Self::Disconnect {
                profile: joined(profile),
            },
            Verb::Pause { profile, reason } => Self::Pause {
                profile,
                reason: (!reason.is_empty()).then(|| reason.join(" ")),
            },
            Verb::Resume { profile } => Self::Resume {
                profile: joined(profile),
            },
            Verb::Auth { profile } => Self::Auth {
                profile: joined(profile),
            },
            Verb::Import { name, file } => Self::Import { name, path: file },
            Verb::Delete { profile } => Self::Delete {
                profile: joined(profile),
            },
            Verb::Cleanup => Self::Cleanup,
            Verb::Refresh => Self::Refresh,
            Verb::Config => Self::Config,
            Verb::Help => Self::Help,
            Verb::Quit => Self::Quit,
        }
    }
}

impl FromStr for Command {
    type Err = AppError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let mut words = line.split_whitespace().map(str::to_owned);
        let verb = words.next().map(|w| w.to_ascii_lowercase());

        Line::try_parse_from(verb.into_iter().chain(words))
            .map(|parsed| parsed.verb.into())
            .map_err(|err| {
                if known_verb(line) {
                    AppError::Usage {
                        message: err.render().to_string().trim_end().to_owned(),
                    }
                } else {
                    AppError::UnknownCommand {
                        input: line.to_owned(),
                    }
                }
            })
    }
}

fn known_verb(line: &str) -> bool {
    let Some(verb) = line.split_whitespace().next() else {
        return false;
    };
    let verb = verb.to_ascii_lowercase();
    Line::command()
        .get_subcommands()
        .any(|sub| sub.get_name() == verb || sub.get_all_aliases().any(|a| a == verb))
}

/// Result of a command, printed as one JSON line.
#[derive(Debug, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Connected { profile: String, session_id: String },
    Done { command: &'static str, profile: Option<String> },
    AuthUrl { profile: String, url: String },
    Imported { name: String, profile_id: String },
    Cleaned { total: usize, cleaned: usize },
    Config { toml: String },
    Help { text: String },
}

/// Run `command` against `orchestrator`. `None` means `quit`: stop reading.
pub async fn execute<T: BusTransport>(
    orchestrator: &Orchestrator<T>,
    config: &Config,
    command: Command,
) -> Result<Option<Reply>, AppError> {
    debug!(?command, "executing");
    let reply = match command {
        Command::Connect { profile } => {
            let session_id = orchestrator.connect(&profile).await?;
            Reply::Connected {
                profile,
                session_id,
            }
        }
        Command::Disconnect { profile } => {
            orchestrator.disconnect(&profile).await?;
            done("disconnect", profile)
        }
        Command::Pause { profile, reason } => {
            orchestrator.pause(&profile, reason.as_deref()).await?;
            done("pause", profile)
        }
        Command::Resume { profile } => {
            orchestrator.resume(&profile).await?;
            done("resume", profile)
        }
        Command::Auth { profile } => {
            let url = orchestrator.auth_url(&profile).await?;
            Reply::AuthUrl { profile, url }
        }
        Command::Import { name, path } => {
            let text = tokio::fs::read_to_string(&path).await?;
            let profile_id = orchestrator.import_profile(&name, &text, false, true).await?;
            Reply::Imported { name, profile_id }
        }
        Command::Delete { profile } => {
            orchestrator.delete_profile(&profile).await?;
            done("delete", profile)
        }
        Command::Cleanup => {
            let (total, cleaned) = orchestrator.cleanup_all().await?;
            Reply::Cleaned { total, cleaned }
        }
        Command::Refresh => {
            orchestrator.refresh().await?;
            Reply::Done {
                command: "refresh",
                profile: None,
            }
        }
        Command::Config => Reply::Config {
            toml: config.to_toml().map_err(|source| AppError::Config {
                path: tunnelwatch_config::config_path().display().to_string(),
                source,
            })?,
        },
        Command::Help => Reply::Help {
            text: Line::command().render_help().to_string(),
        },
        Command::Quit => return Ok(None),
    };
    Ok(Some(reply))
}

fn done(command: &'static str, profile: String) -> Reply {
    Reply::Done {
        command,
        profile: Some(profile),
    }
}
