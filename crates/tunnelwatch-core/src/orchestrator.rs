// ── Orchestrator ──
//
// Owns the bus clients, one FSM per profile and one bandwidth monitor per
// session. Polls the daemon on a fixed cadence, drives each FSM from the
// derived session state, and publishes immutable snapshots for the UI.
// `AttentionRequired` signals only trigger an early poll; state is always
// taken from what the poll reads back.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tunnelwatch_api::{
    BusTransport, ConfigClient, Profile, Session, SessionClient, SignalSubscriber, Subscription,
};

use crate::bandwidth::BandwidthMonitor;
use crate::config::OrchestratorConfig;
use crate::deriver::session_state;
use crate::error::CoreError;
use crate::format::format_since;
use crate::fsm::{
    ButtonStates, ConnectionFsm, ConnectionState, FsmEvent, Outcome, button_states,
    observation_for,
};
use crate::latency::LatencyProbe;
use crate::model::{
    AggregateRate, LatencyReading, OrchestratorEvent, ProfileView, SessionView, Snapshot,
};

const EVENT_CHANNEL_SIZE: usize = 64;
const HINT_CHANNEL_SIZE: usize = 16;

// ── Orchestrator ────────────────────────────────────────────────────

/// Root object that the UI layer holds.
///
/// Cheaply cloneable via `Arc<Inner>`. Call [`start()`](Self::start) to
/// run the periodic tasks and [`shutdown()`](Self::shutdown) to stop them;
/// a stopped orchestrator cannot be restarted.
pub struct Orchestrator<T: BusTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: BusTransport> Clone for Orchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: BusTransport> {
    config: OrchestratorConfig,
    configs: ConfigClient<T>,
    sessions: SessionClient<T>,
    signals: SignalSubscriber<T>,
    probe: LatencyProbe,
    state: Mutex<RuntimeState>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
    hint_tx: mpsc::Sender<String>,
    hint_rx: Mutex<Option<mpsc::Receiver<String>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Everything mutated by polls and actions. Guarded by one lock so that
/// an action and a poll never interleave.
#[derive(Default)]
struct RuntimeState {
    /// Keyed by profile name.
    fsms: HashMap<String, ConnectionFsm>,
    /// Keyed by session id.
    monitors: HashMap<String, BandwidthMonitor>,
    subscriptions: HashMap<String, Subscription>,
    /// Sessions whose auth URL has already been surfaced.
    auth_surfaced: HashSet<String>,
    latency: HashMap<String, LatencyReading>,
    profiles: Vec<Profile>,
    sessions: Vec<Session>,
}

impl<T: BusTransport> Orchestrator<T> {
    pub fn new(bus: Arc<T>, config: OrchestratorConfig) -> Self {
        let probe = LatencyProbe::new(config.latency_timeout_ms);
        Self::with_probe(bus, config, probe)
    }

    /// Use `probe` for latency measurements instead of the system `ping`.
    pub fn with_probe(bus: Arc<T>, config: OrchestratorConfig, probe: LatencyProbe) -> Self {
        let configs = ConfigClient::new(Arc::clone(&bus)).with_retry(config.activation_retry);
        let sessions = SessionClient::new(Arc::clone(&bus)).with_config_client(configs.clone());
        let signals = SignalSubscriber::new(bus);
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::default()));
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (hint_tx, hint_rx) = mpsc::channel(HINT_CHANNEL_SIZE);

        Self {
            inner: Arc::new(Inner {
                config,
                configs,
                sessions,
                signals,
                probe,
                state: Mutex::new(RuntimeState::default()),
                snapshot_tx,
                event_tx,
                hint_tx,
                hint_rx: Mutex::new(Some(hint_rx)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    // ── Observation surface ─────────────────────────────────────────

    /// Receiver that sees every published snapshot.
    pub fn snapshot(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// The most recently published snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Current FSM state for `profile`, if the profile is known.
    pub async fn state_of(&self, profile: &str) -> Option<ConnectionState> {
        self.inner
            .state
            .lock()
            .await
            .fsms
            .get(profile)
            .map(ConnectionFsm::state)
    }

    pub async fn buttons_of(&self, profile: &str) -> Option<ButtonStates> {
        self.state_of(profile).await.map(button_states)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Poll once, then spawn the periodic tasks.
    ///
    /// A failed initial poll is reported and retried by the poll task.
    pub async fn start(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            warn!("orchestrator already started");
            return;
        }

        if let Err(e) = self.poll().await {
            log_poll_failure("initial poll failed", &e);
        }

        let config = &self.inner.config;
        let cancel = &self.inner.cancel;

        if !config.poll_interval.is_zero() {
            handles.push(tokio::spawn(poll_task(
                self.clone(),
                config.poll_interval,
                cancel.clone(),
            )));
        }
        if !config.timer_interval.is_zero() {
            handles.push(tokio::spawn(timer_task(
                self.clone(),
                config.timer_interval,
                cancel.clone(),
            )));
        }
        if !config.bandwidth_interval.is_zero() {
            handles.push(tokio::spawn(bandwidth_task(
                self.clone(),
                config.bandwidth_interval,
                cancel.clone(),
            )));
        }
        if config.latency_enabled() {
            handles.push(tokio::spawn(latency_task(
                self.clone(),
                config.latency_interval,
                cancel.clone(),
            )));
        }
        if let Some(rx) = self.inner.hint_rx.lock().await.take() {
            handles.push(tokio::spawn(hint_task(self.clone(), rx, cancel.clone())));
        }

        info!(tasks = handles.len(), "orchestrator started");
    }

    /// Cancel and join the periodic tasks, then drop every signal
    /// subscription.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        let mut state = self.inner.state.lock().await;
        let dropped = state.subscriptions.len();
        state.subscriptions.clear();
        info!(subscriptions = dropped, "orchestrator stopped");
    }

    // ── Polling ─────────────────────────────────────────────────────

    /// Poll the daemon now and publish a fresh snapshot.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        self.poll().await
    }

    async fn poll(&self) -> Result<(), CoreError> {
        let mut state = self.inner.state.lock().await;
        let result = self.poll_locked(&mut state).await;
        if let Err(ref e) = result {
            self.emit(OrchestratorEvent::Error {
                message: e.to_string(),
            });
        }
        self.publish(&state);
        result
    }

    async fn poll_locked(&self, state: &mut RuntimeState) -> Result<(), CoreError> {
        let profiles = self.inner.configs.list().await?;
        let sessions = self.inner.sessions.list().await?;
        debug!(
            profiles = profiles.len(),
            sessions = sessions.len(),
            "daemon poll"
        );

        self.apply_observation(state, profiles, sessions);
        self.sync_subscriptions(state).await;
        self.surface_auth_urls(state).await;
        Ok(())
    }

    /// Feed one poll's worth of profiles and sessions into the FSMs and
    /// the monitor map.
    fn apply_observation(
        &self,
        state: &mut RuntimeState,
        profiles: Vec<Profile>,
        sessions: Vec<Session>,
    ) {
        // Single-use profiles vanish once started, so session names count too.
        let names: BTreeSet<String> = profiles
            .iter()
            .map(|p| p.name.clone())
            .chain(sessions.iter().map(|s| s.config_name.clone()))
            .filter(|name| !name.is_empty())
            .collect();
        state.fsms.retain(|name, _| names.contains(name));

        for name in names {
            let derived = sessions
                .iter()
                .find(|s| s.config_name == name)
                .map_or(ConnectionState::Disconnected, session_state);
            let fsm = state
                .fsms
                .entry(name.clone())
                .or_insert_with(|| ConnectionFsm::new(name));
            let outcome = match fsm.process_event(observation_for(derived)) {
                Outcome::Ignored => fsm.force_state(derived),
                other => other,
            };
            if let Outcome::Changed { from, to } = outcome {
                self.emit(OrchestratorEvent::StateChanged {
                    profile: fsm.profile().to_owned(),
                    from,
                    to,
                });
            }
        }

        let live: HashSet<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        state.monitors.retain(|id, _| {
            let keep = live.contains(id.as_str());
            if !keep {
                info!(session_id = %id, "session gone; dropping monitor");
            }
            keep
        });
        state.subscriptions.retain(|id, _| live.contains(id.as_str()));
        state.auth_surfaced.retain(|id| live.contains(id.as_str()));
        state.latency.retain(|id, _| live.contains(id.as_str()));

        let config = &self.inner.config;
        for session in &sessions {
            if let Some(monitor) = state.monitors.get_mut(&session.id) {
                if !session.device_name.is_empty() && monitor.device() != session.device_name {
                    monitor.set_device(session.device_name.clone());
                }
                continue;
            }
            info!(
                session_id = %session.id,
                profile = %session.config_name,
                "monitoring new session"
            );
            let monitor = BandwidthMonitor::new(
                session.id.clone(),
                session.device_name.clone(),
                config.stats_source,
                config.ring_capacity,
            )
            .with_sysfs_root(config.sysfs_root.clone());
            state.monitors.insert(session.id.clone(), monitor);
        }

        state.profiles = profiles;
        state.sessions = sessions;
    }

    async fn sync_subscriptions(&self, state: &mut RuntimeState) {
        let missing: Vec<String> = state
            .sessions
            .iter()
            .filter(|s| !state.subscriptions.contains_key(&s.id))
            .map(|s| s.id.clone())
            .collect();

        for session_id in missing {
            let hint = self.inner.hint_tx.clone();
            let subscribed = self
                .inner
                .signals
                .attention_required(&session_id, move |event| {
                    debug!(
                        session_id = %event.session_id,
                        web_auth = event.is_web_auth(),
                        "AttentionRequired"
                    );
                    let _ = hint.try_send(event.session_id);
                })
                .await;
            match subscribed {
                Ok(subscription) => {
                    state.subscriptions.insert(session_id, subscription);
                }
                Err(e) if e.is_transient() => debug!(
                    session_id = %session_id,
                    error = %e,
                    "bus not ready for AttentionRequired; retrying on the next poll"
                ),
                Err(e) => warn!(
                    session_id = %session_id,
                    error = %e,
                    "cannot watch AttentionRequired; relying on polling"
                ),
            }
        }
    }

    /// Fetch the web-auth URL once for each session waiting on it.
    async fn surface_auth_urls(&self, state: &mut RuntimeState) {
        let pending: Vec<(String, String)> = state
            .sessions
            .iter()
            .filter(|s| {
                session_state(s) == ConnectionState::AuthRequired
                    && !state.auth_surfaced.contains(&s.id)
            })
            .map(|s| (s.config_name.clone(), s.id.clone()))
            .collect();

        for (profile, session_id) in pending {
            match self.inner.sessions.get_auth_url(&session_id).await {
                Ok(url) => {
                    info!(profile = %profile, session_id = %session_id, "web authentication required");
                    state.auth_surfaced.insert(session_id.clone());
                    self.emit(OrchestratorEvent::AuthRequired {
                        profile,
                        session_id,
                        url,
                    });
                }
                Err(e) if e.is_not_found() => {
                    debug!(session_id = %session_id, "auth URL not queued yet");
                }
                Err(e) => warn!(session_id = %session_id, error = %e, "cannot fetch auth URL"),
            }
        }
    }

    // ── Sampling ────────────────────────────────────────────────────

    /// One statistics update per monitor.
    async fn sample_bandwidth(&self) {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        for monitor in state.monitors.values_mut() {
            if let Err(e) = monitor.update(&self.inner.sessions).await {
                debug!(session_id = %monitor.session_id(), error = %e, "bandwidth sample failed");
            }
        }
        self.publish(state);
    }

    /// Probe every bound session's remote host concurrently.
    async fn sample_latency(&self) {
        let targets: Vec<(String, String)> = {
            let state = self.inner.state.lock().await;
            state
                .sessions
                .iter()
                .filter_map(|s| {
                    s.connected_to
                        .as_ref()
                        .map(|tuple| (s.id.clone(), tuple.host.clone()))
                })
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let probes = targets.into_iter().map(|(session_id, host)| async move {
            let reading = match self.inner.probe.probe(&host).await {
                Ok(ms) => LatencyReading::Millis(ms),
                Err(e) => {
                    debug!(session_id = %session_id, host = %host, error = %e, "latency probe failed");
                    LatencyReading::Failed(e)
                }
            };
            (session_id, reading)
        });
        let readings = join_all(probes).await;

        let mut state = self.inner.state.lock().await;
        for (session_id, reading) in readings {
            if state.sessions.iter().any(|s| s.id == session_id) {
                state.latency.insert(session_id, reading);
            }
        }
        self.publish(&state);
    }

    async fn tick(&self) {
        let state = self.inner.state.lock().await;
        self.publish(&state);
    }

    fn publish(&self, state: &RuntimeState) {
        self.inner
            .snapshot_tx
            .send_replace(Arc::new(build_snapshot(state, Utc::now())));
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    // ── Actions ─────────────────────────────────────────────────────

    /// Start a session for `profile`. Returns the new session id.
    pub async fn connect(&self, profile: &str) -> Result<String, CoreError> {
        let result = {
            let mut state = self.inner.state.lock().await;
            self.connect_locked(&mut state, profile).await
        };
        self.finish_action("connect", profile, result).await
    }

    async fn connect_locked(
        &self,
        state: &mut RuntimeState,
        name: &str,
    ) -> Result<String, CoreError> {
        let profile = self.find_profile(state, name).await?;
        self.apply_event(state, name, FsmEvent::ConnectRequested);
        match self.inner.sessions.start(&profile.id).await {
            Ok(session_id) => Ok(session_id),
            Err(e) => {
                self.apply_event(state, name, FsmEvent::SessionError);
                Err(e.into())
            }
        }
    }

    pub async fn disconnect(&self, profile: &str) -> Result<(), CoreError> {
        let result = {
            let mut state = self.inner.state.lock().await;
            match self.find_session(&mut state, profile).await {
                Ok(session_id) => {
                    self.apply_event(&mut state, profile, FsmEvent::DisconnectRequested);
                    self.inner
                        .sessions
                        .disconnect(&session_id)
                        .await
                        .map_err(CoreError::from)
                }
                Err(e) => Err(e),
            }
        };
        self.finish_action("disconnect", profile, result).await
    }

    /// Pause the session of `profile`; `None` sends the default reason.
    pub async fn pause(&self, profile: &str, reason: Option<&str>) -> Result<(), CoreError> {
        let result = {
            let mut state = self.inner.state.lock().await;
            match self.find_session(&mut state, profile).await {
                Ok(session_id) => self
                    .inner
                    .sessions
                    .pause(&session_id, reason)
                    .await
                    .map_err(CoreError::from),
                Err(e) => Err(e),
            }
        };
        self.finish_action("pause", profile, result).await
    }

    pub async fn resume(&self, profile: &str) -> Result<(), CoreError> {
        let result = {
            let mut state = self.inner.state.lock().await;
            match self.find_session(&mut state, profile).await {
                Ok(session_id) => self
                    .inner
                    .sessions
                    .resume(&session_id)
                    .await
                    .map_err(CoreError::from),
                Err(e) => Err(e),
            }
        };
        self.finish_action("resume", profile, result).await
    }

    /// The web-auth URL queued for the session of `profile`.
    pub async fn auth_url(&self, profile: &str) -> Result<String, CoreError> {
        let session_id = {
            let mut state = self.inner.state.lock().await;
            self.find_session(&mut state, profile).await?
        };
        Ok(self.inner.sessions.get_auth_url(&session_id).await?)
    }

    /// Import OVPN `text` as profile `name`. Returns the new profile id.
    pub async fn import_profile(
        &self,
        name: &str,
        text: &str,
        single_use: bool,
        persistent: bool,
    ) -> Result<String, CoreError> {
        let result = {
            let _state = self.inner.state.lock().await;
            self.inner
                .configs
                .import(name, text, single_use, persistent)
                .await
                .map_err(CoreError::from)
        };
        self.finish_action("import", name, result).await
    }

    pub async fn delete_profile(&self, profile: &str) -> Result<(), CoreError> {
        let result = {
            let mut state = self.inner.state.lock().await;
            match self.find_profile(&mut state, profile).await {
                Ok(found) => self
                    .inner
                    .configs
                    .delete(&found.id)
                    .await
                    .map_err(CoreError::from),
                Err(e) => Err(e),
            }
        };
        self.finish_action("delete", profile, result).await
    }

    /// Disconnect every session. Returns `(total, cleaned)`.
    pub async fn cleanup_all(&self) -> Result<(usize, usize), CoreError> {
        let result = {
            let _state = self.inner.state.lock().await;
            self.inner
                .sessions
                .cleanup_all()
                .await
                .map_err(CoreError::from)
        };
        self.finish_action("cleanup", "*", result).await
    }

    /// Report a failed action and re-poll either way.
    async fn finish_action<R>(
        &self,
        action: &str,
        subject: &str,
        result: Result<R, CoreError>,
    ) -> Result<R, CoreError> {
        match &result {
            Ok(_) => debug!(action, subject, "action finished"),
            Err(e) => {
                warn!(action, subject, error = %e, "action failed");
                self.emit(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
            }
        }
        if let Err(e) = self.poll().await {
            debug!(action, error = %e, "post-action poll failed");
        }
        result
    }

    fn apply_event(&self, state: &mut RuntimeState, profile: &str, event: FsmEvent) {
        let fsm = state
            .fsms
            .entry(profile.to_owned())
            .or_insert_with(|| ConnectionFsm::new(profile));
        if let Outcome::Changed { from, to } = fsm.process_event(event) {
            self.emit(OrchestratorEvent::StateChanged {
                profile: profile.to_owned(),
                from,
                to,
            });
        }
    }

    /// Look `name` up in the last poll, listing again on a miss.
    async fn find_profile(
        &self,
        state: &mut RuntimeState,
        name: &str,
    ) -> Result<Profile, CoreError> {
        if let Some(profile) = state.profiles.iter().find(|p| p.name == name) {
            return Ok(profile.clone());
        }
        state.profiles = self.inner.configs.list().await?;
        state
            .profiles
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| CoreError::ProfileNotFound {
                name: name.to_owned(),
            })
    }

    async fn find_session(
        &self,
        state: &mut RuntimeState,
        profile: &str,
    ) -> Result<String, CoreError> {
        let lookup = |sessions: &[Session]| {
            sessions
                .iter()
                .find(|s| s.config_name == profile)
                .map(|s| s.id.clone())
        };
        if let Some(id) = lookup(&state.sessions) {
            return Ok(id);
        }
        state.sessions = self.inner.sessions.list().await?;
        lookup(&state.sessions).ok_or_else(|| CoreError::NoSession {
            profile: profile.to_owned(),
        })
    }
}

// ── Snapshot assembly ───────────────────────────────────────────────

fn build_snapshot(state: &RuntimeState, now: DateTime<Utc>) -> Snapshot {
    let ts = now.timestamp();

    let sessions: Vec<SessionView> = state
        .sessions
        .iter()
        .map(|session| {
            let monitor = state.monitors.get(&session.id);
            let started = session
                .created_at()
                .map(|t| t.timestamp())
                .or_else(|| monitor.and_then(BandwidthMonitor::start_time))
                .unwrap_or(ts);
            SessionView {
                session: session.clone(),
                state: session_state(session),
                elapsed: format_since(started, ts),
                uptime_secs: monitor.and_then(|m| m.uptime_secs(ts)),
                rate: monitor.and_then(BandwidthMonitor::get_rate),
                stats_source: monitor.and_then(BandwidthMonitor::stats_source_used),
                latency: state.latency.get(&session.id).copied(),
            }
        })
        .collect();

    let profiles = state
        .profiles
        .iter()
        .map(|profile| {
            let session = state.sessions.iter().find(|s| s.config_name == profile.name);
            let fsm_state = state
                .fsms
                .get(&profile.name)
                .map_or(ConnectionState::Disconnected, ConnectionFsm::state);
            ProfileView {
                profile: profile.clone(),
                state: fsm_state,
                buttons: button_states(fsm_state),
                in_use: session.is_some(),
                session_id: session.map(|s| s.id.clone()),
            }
        })
        .collect();

    Snapshot {
        profiles,
        aggregate: AggregateRate::from_sessions(&sessions),
        sessions,
        taken_at: now,
    }
}

// ── Background tasks ────────────────────────────────────────────────

/// A daemon that is still starting is expected; anything else is a warning.
fn log_poll_failure(context: &str, err: &CoreError) {
    if err.is_transient() {
        info!(error = %err, "{context}; daemon not ready, retrying on the next tick");
    } else {
        warn!(error = %err, "{context}");
    }
}

async fn poll_task<T: BusTransport>(
    orchestrator: Orchestrator<T>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = orchestrator.poll().await {
                    log_poll_failure("periodic poll failed", &e);
                }
            }
        }
    }
}

async fn timer_task<T: BusTransport>(
    orchestrator: Orchestrator<T>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => orchestrator.tick().await,
        }
    }
}

async fn bandwidth_task<T: BusTransport>(
    orchestrator: Orchestrator<T>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => orchestrator.sample_bandwidth().await,
        }
    }
}

async fn latency_task<T: BusTransport>(
    orchestrator: Orchestrator<T>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                // Dropping the probes kills their child processes.
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = orchestrator.sample_latency() => {}
                }
            }
        }
    }
}

/// Turn `AttentionRequired` hints into early polls. Bursts collapse into
/// a single poll.
async fn hint_task<T: BusTransport>(
    orchestrator: Orchestrator<T>,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            hint = rx.recv() => {
                let Some(session_id) = hint else { break };
                while rx.try_recv().is_ok() {}
                debug!(session_id = %session_id, "attention hint; polling early");
                if let Err(e) = orchestrator.poll().await {
                    log_poll_failure("hint-triggered poll failed", &e);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use tunnelwatch_api::{ConnectionTuple, InputSlot, Remote, SessionStatus};

    use super::*;
    use crate::bandwidth::BandwidthSample;

    fn profile(name: &str) -> Profile {
        Profile {
            id: format!("/net/openvpn/v3/configuration/{name}"),
            name: name.into(),
            locked_down: false,
            persistent: true,
            remote: Remote::default(),
        }
    }

    fn session(id: &str, profile: &str, created: u64) -> Session {
        Session {
            id: id.into(),
            config_name: profile.into(),
            device_name: "tun0".into(),
            backend_pid: 1,
            created,
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
            pending_inputs: Vec::<InputSlot>::new(),
        }
    }

    #[test]
    fn snapshot_marks_profiles_in_use() {
        let mut state = RuntimeState {
            profiles: vec![profile("work"), profile("home")],
            sessions: vec![session("/s/1", "work", 1_000)],
            ..RuntimeState::default()
        };
        let mut fsm = ConnectionFsm::new("work");
        fsm.process_event(FsmEvent::SessionConnected);
        state.fsms.insert("work".into(), fsm);

        let now = DateTime::from_timestamp(1_000 + 3_660, 0).unwrap();
        let snap = build_snapshot(&state, now);

        let work = snap.profile("work").unwrap();
        assert!(work.in_use);
        assert_eq!(work.session_id.as_deref(), Some("/s/1"));
        assert_eq!(work.state, ConnectionState::Connected);
        assert!(work.buttons.pause);

        let home = snap.profile("home").unwrap();
        assert!(!home.in_use);
        assert_eq!(home.state, ConnectionState::Disconnected);
        assert!(home.buttons.connect);

        assert_eq!(snap.session_for("work").unwrap().elapsed, "1h 1m");
    }

    #[test]
    fn snapshot_aggregates_monitor_rates() {
        let mut state = RuntimeState {
            sessions: vec![session("/s/1", "a", 0), session("/s/2", "b", 0)],
            ..RuntimeState::default()
        };
        for (id, bytes) in [("/s/1", 1_000), ("/s/2", 3_000)] {
            let mut monitor = BandwidthMonitor::new(id, "tun0", crate::bandwidth::StatsSource::Auto, 8);
            monitor.record(BandwidthSample {
                timestamp: 100,
                ..BandwidthSample::default()
            });
            monitor.record(BandwidthSample {
                timestamp: 101,
                bytes_in: bytes,
                ..BandwidthSample::default()
            });
            state.monitors.insert(id.into(), monitor);
        }

        let snap = build_snapshot(&state, DateTime::from_timestamp(160, 0).unwrap());
        assert_eq!(snap.aggregate.download_bps, 4_000.0);
        assert_eq!(snap.aggregate.active_sessions, 2);
        assert_eq!(snap.aggregate.longest_uptime_secs, Some(60));
        // No creation time: elapsed falls back to the monitor baseline.
        assert_eq!(snap.sessions[0].elapsed, "1m");
    }

    #[tokio::test]
    async fn shutdown_reaps_a_panicked_task() {
        let orchestrator = Orchestrator::new(
            Arc::new(tunnelwatch_api::mock::MockBus::new()),
            OrchestratorConfig::default(),
        );
        let crashed = tokio::spawn(async { panic!("sampler crashed") });
        orchestrator.inner.task_handles.lock().await.push(crashed);

        orchestrator.shutdown().await;

        assert!(orchestrator.inner.cancel.is_cancelled());
        assert!(orchestrator.inner.task_handles.lock().await.is_empty());
    }
}
