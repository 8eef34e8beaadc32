mod commands;
mod error;
mod output;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tunnelwatch_api::ZbusTransport;
use tunnelwatch_config::Config;
use tunnelwatch_core::Orchestrator;

use crate::commands::Command;
use crate::error::AppError;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn run() -> Result<(), AppError> {
    let config = tunnelwatch_config::load_config().map_err(|source| AppError::Config {
        path: tunnelwatch_config::config_path().display().to_string(),
        source,
    })?;
    init_tracing(&config);

    let bus = ZbusTransport::system()
        .await
        .map_err(|source| AppError::BusUnavailable { source })?;
    let orchestrator = Orchestrator::new(Arc::new(bus), config.to_orchestrator_config());

    let printer = tokio::spawn(output::print_snapshots(orchestrator.snapshot()));
    let logger = tokio::spawn(output::print_events(orchestrator.events()));
    orchestrator.start().await;
    info!("monitoring OpenVPN3 sessions");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            line = lines.next_line(), if stdin_open => match line? {
                // Without a controlling input, keep monitoring until interrupted.
                None => stdin_open = false,
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match line.parse::<Command>() {
                    Ok(command) => {
                        match commands::execute(&orchestrator, &config, command).await {
                            Ok(Some(reply)) => output::print_json(&reply)?,
                            Ok(None) => break,
                            Err(e) => report(&e),
                        }
                    }
                    Err(e) => report(&e),
                },
            },
        }
    }

    orchestrator.shutdown().await;
    printer.abort();
    logger.abort();
    Ok(())
}

/// Non-fatal failures: a warning log line plus the rendered diagnostic.
fn report(err: &AppError) {
    warn!(code = err.exit_code(), "{err}");
    let mut rendered = String::new();
    if miette::GraphicalReportHandler::new()
        .render_report(&mut rendered, err)
        .is_ok()
    {
        eprint!("{rendered}");
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
