// Sessions service client
//
// Wraps `net.openvpn.v3.sessions`: enumerating sessions with their
// properties, starting tunnels under the one-session-per-profile rule,
// the connect/disconnect/pause/resume controls, statistics, and the
// user-input queue walk that yields web-authentication URLs.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use zvariant::OwnedObjectPath;

use crate::config::ConfigClient;
use crate::error::Error;
use crate::names::{
    CONNECT, DISCONNECT, FETCH_AVAILABLE_SESSIONS, NEW_TUNNEL, PAUSE, PROP_BACKEND_PID,
    PROP_CONFIG_NAME, PROP_CONNECTED_TO, PROP_DEVICE_NAME, PROP_SESSION_CREATED,
    PROP_STATISTICS, PROP_STATUS, RESUME, SESSIONS_ROOT, SESSIONS_SERVICE,
    USER_INPUT_QUEUE_CHECK, USER_INPUT_QUEUE_FETCH, USER_INPUT_QUEUE_GET_TYPE_GROUP,
};
use crate::transport::{BusTransport, Target};
use crate::types::{
    ConnectionTuple, InputSlot, RawConnectedTo, RawInputRequest, RawStatus, Session,
    SessionStats, WEB_AUTH_INPUT_TYPE,
};

const ROOT: Target<'static> = Target::new(SESSIONS_SERVICE, SESSIONS_ROOT, SESSIONS_SERVICE);

/// Reason sent with `Pause` when the caller gives none.
pub const DEFAULT_PAUSE_REASON: &str = "User requested";

/// Typed client for the sessions service.
pub struct SessionClient<T> {
    bus: Arc<T>,
    configs: ConfigClient<T>,
}

impl<T> Clone for SessionClient<T> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            configs: self.configs.clone(),
        }
    }
}

impl<T: BusTransport> SessionClient<T> {
    pub fn new(bus: Arc<T>) -> Self {
        let configs = ConfigClient::new(Arc::clone(&bus));
        Self { bus, configs }
    }

    /// Use `configs` for the profile lookups done by [`start`](Self::start).
    pub fn with_config_client(mut self, configs: ConfigClient<T>) -> Self {
        self.configs = configs;
        self
    }

    // ── Enumeration ─────────────────────────────────────────────────

    /// Object paths of every session the daemon knows about.
    pub async fn list_ids(&self) -> Result<Vec<String>, Error> {
        let paths: Vec<OwnedObjectPath> = self.bus.call(ROOT, FETCH_AVAILABLE_SESSIONS, ()).await?;
        Ok(paths.iter().map(|p| p.as_str().to_owned()).collect())
    }

    /// Every session with its properties and pending user-input slots.
    pub async fn list(&self) -> Result<Vec<Session>, Error> {
        let ids = self.list_ids().await?;
        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            sessions.push(self.read_session(id).await);
        }
        Ok(sessions)
    }

    /// Read one session. Property reads that fail yield typed defaults.
    pub async fn read_session(&self, id: String) -> Session {
        let target = ROOT.at(&id);

        let config_name: String = self.property_or_default(target, PROP_CONFIG_NAME).await;
        let device_name: String = self.property_or_default(target, PROP_DEVICE_NAME).await;
        let backend_pid: u32 = self.property_or_default(target, PROP_BACKEND_PID).await;
        let created: u64 = self.property_or_default(target, PROP_SESSION_CREATED).await;
        let status: RawStatus = self.property_or_default(target, PROP_STATUS).await;
        let connected_to = self
            .bus
            .get_property::<RawConnectedTo>(target, PROP_CONNECTED_TO)
            .await
            .ok()
            .and_then(ConnectionTuple::from_raw);
        let pending_inputs = self.pending_inputs(target).await;

        Session {
            config_name,
            device_name,
            backend_pid,
            created,
            status: status.into(),
            connected_to,
            pending_inputs,
            id,
        }
    }

    async fn property_or_default<R>(&self, target: Target<'_>, name: &str) -> R
    where
        R: TryFrom<zvariant::OwnedValue> + Clone + Default + Send + Sync + 'static,
        R::Error: std::fmt::Display,
    {
        match self.bus.get_property(target, name).await {
            Ok(value) => value,
            Err(e) => {
                debug!(path = target.path, property = name, error = %e, "property read failed");
                R::default()
            }
        }
    }

    async fn pending_inputs(&self, target: Target<'_>) -> Vec<InputSlot> {
        match self
            .bus
            .call::<_, Vec<(u32, u32)>>(target, USER_INPUT_QUEUE_GET_TYPE_GROUP, ())
            .await
        {
            Ok(pairs) => pairs
                .into_iter()
                .map(|(kind, group)| InputSlot { kind, group })
                .collect(),
            Err(e) => {
                debug!(path = target.path, error = %e, "user-input queue probe failed");
                Vec::new()
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start a tunnel for `profile_id` and return the new session path.
    ///
    /// Any session already running the same profile (matched by name) is
    /// disconnected first, so at most one session per profile exists.
    pub async fn start(&self, profile_id: &str) -> Result<String, Error> {
        let profile_path = OwnedObjectPath::try_from(profile_id)
            .map_err(|_| Error::InvalidPath(profile_id.to_owned()))?;

        let profile = self.configs.get_info(profile_id).await?;
        if profile.name.is_empty() {
            debug!(profile_id, "profile name unknown; skipping duplicate-session check");
        } else {
            self.disconnect_existing(&profile.name).await?;
        }

        let session: OwnedObjectPath = self.bus.call(ROOT, NEW_TUNNEL, (profile_path,)).await?;
        let session_id = session.as_str().to_owned();
        debug!(profile = %profile.name, session_id = %session_id, "tunnel created");

        self.bus.call_void(ROOT.at(&session_id), CONNECT, ()).await?;
        info!(profile = %profile.name, session_id = %session_id, "session started");
        Ok(session_id)
    }

    async fn disconnect_existing(&self, profile_name: &str) -> Result<(), Error> {
        for id in self.list_ids().await? {
            let name: String = self
                .property_or_default(ROOT.at(&id), PROP_CONFIG_NAME)
                .await;
            if name != profile_name {
                continue;
            }
            warn!(
                profile = profile_name,
                session_id = %id,
                "disconnecting existing session before starting a new one"
            );
            if let Err(e) = self.disconnect(&id).await {
                warn!(session_id = %id, error = %e, "failed to disconnect existing session");
            }
        }
        Ok(())
    }

    pub async fn disconnect(&self, session_id: &str) -> Result<(), Error> {
        self.bus.call_void(ROOT.at(session_id), DISCONNECT, ()).await?;
        info!(session_id, "session disconnected");
        Ok(())
    }

    /// Pause a session; `None` sends the default reason.
    pub async fn pause(&self, session_id: &str, reason: Option<&str>) -> Result<(), Error> {
        let reason = reason.unwrap_or(DEFAULT_PAUSE_REASON).to_owned();
        self.bus.call_void(ROOT.at(session_id), PAUSE, (reason,)).await?;
        info!(session_id, "session paused");
        Ok(())
    }

    pub async fn resume(&self, session_id: &str) -> Result<(), Error> {
        self.bus.call_void(ROOT.at(session_id), RESUME, ()).await?;
        info!(session_id, "session resumed");
        Ok(())
    }

    /// Disconnect every session. Returns `(total, cleaned)`.
    pub async fn cleanup_all(&self) -> Result<(usize, usize), Error> {
        let ids = self.list_ids().await?;
        let total = ids.len();
        let mut cleaned = 0;
        for id in &ids {
            match self.disconnect(id).await {
                Ok(()) => cleaned += 1,
                Err(e) => warn!(session_id = %id, error = %e, "cleanup: disconnect failed"),
            }
        }
        info!(total, cleaned, "session cleanup finished");
        Ok((total, cleaned))
    }

    // ── Statistics ──────────────────────────────────────────────────

    /// Cumulative byte and packet counters from the `statistics` property.
    ///
    /// Daemons without the property yield [`Error::NotSupported`]; bus
    /// and decoding failures are returned as they are.
    pub async fn get_statistics(&self, session_id: &str) -> Result<SessionStats, Error> {
        let raw: HashMap<String, i64> = self
            .bus
            .get_property(ROOT.at(session_id), PROP_STATISTICS)
            .await
            .map_err(|e| {
                if e.is_missing_member() {
                    Error::NotSupported(format!("statistics for {session_id}: {e}"))
                } else {
                    e
                }
            })?;

        let counter = |key: &str| {
            raw.get(key)
                .copied()
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(0)
        };

        Ok(SessionStats {
            bytes_in: counter("BYTES_IN"),
            bytes_out: counter("BYTES_OUT"),
            packets_in: counter("PACKETS_IN"),
            packets_out: counter("PACKETS_OUT"),
        })
    }

    // ── User-input queue ────────────────────────────────────────────

    /// Find the web-authentication URL queued for `session_id`.
    ///
    /// Walks pending `(type, group)` slots, keeps web-auth ones, takes the
    /// first request id of each and fetches its descriptor; a description
    /// starting with `http` is the URL. [`Error::NotFound`] means nothing
    /// is waiting.
    pub async fn get_auth_url(&self, session_id: &str) -> Result<String, Error> {
        let target = ROOT.at(session_id);
        let slots: Vec<(u32, u32)> = self
            .bus
            .call(target, USER_INPUT_QUEUE_GET_TYPE_GROUP, ())
            .await?;

        for (kind, group) in slots {
            if kind != WEB_AUTH_INPUT_TYPE {
                continue;
            }

            let ids: Vec<u32> = match self.bus.call(target, USER_INPUT_QUEUE_CHECK, (kind, group)).await {
                Ok(ids) => ids,
                Err(e) => {
                    debug!(session_id, group, error = %e, "user-input queue check failed");
                    continue;
                }
            };
            let Some(&id) = ids.first() else { continue };

            match self
                .bus
                .call::<_, RawInputRequest>(target, USER_INPUT_QUEUE_FETCH, (kind, group, id))
                .await
            {
                Ok((_, _, _, _, description, _, _)) if description.starts_with("http") => {
                    debug!(session_id, group, id, "found web authentication URL");
                    return Ok(description);
                }
                Ok(_) => debug!(session_id, group, id, "user-input request is not a URL"),
                Err(e) => debug!(session_id, group, id, error = %e, "user-input fetch failed"),
            }
        }

        Err(Error::NotFound(format!(
            "no web authentication request for {session_id}"
        )))
    }
}
