//! Stdout is machine-readable: one JSON object per line. Logs go to stderr.

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use tunnelwatch_core::{OrchestratorEvent, Snapshot};

use crate::error::AppError;

pub fn print_json<V: Serialize>(value: &V) -> Result<(), AppError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}

/// `true` when anything other than the capture time differs.
fn differs(prev: &Snapshot, next: &Snapshot) -> bool {
    prev.profiles != next.profiles || prev.sessions != next.sessions || prev.aggregate != next.aggregate
}

/// Print every snapshot that changed, until the orchestrator is dropped.
pub async fn print_snapshots(mut rx: watch::Receiver<Arc<Snapshot>>) {
    let mut last: Option<Arc<Snapshot>> = None;
    while rx.changed().await.is_ok() {
        let snapshot = Arc::clone(&rx.borrow_and_update());
        if last.as_deref().is_some_and(|prev| !differs(prev, &snapshot)) {
            continue;
        }
        if let Err(e) = print_json(&snapshot) {
            warn!(error = %e, "failed to write snapshot");
        }
        last = Some(snapshot);
    }
}

/// Log events and mirror them to stdout.
pub async fn print_events(mut rx: broadcast::Receiver<OrchestratorEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                match &event {
                    OrchestratorEvent::StateChanged { profile, from, to } => {
                        info!(%profile, %from, %to, "state changed");
                    }
                    OrchestratorEvent::AuthRequired { profile, url, .. } => {
                        info!(%profile, %url, "web authentication required");
                    }
                    OrchestratorEvent::Error { message } => warn!(%message, "orchestrator error"),
                }
                if let Err(e) = print_json(&event) {
                    warn!(error = %e, "failed to write event");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
