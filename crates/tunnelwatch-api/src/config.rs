// Configuration service client
//
// Wraps `net.openvpn.v3.configuration`: importing, listing, inspecting,
// and removing stored profiles. Listing tolerates the service being
// bus-activated on first use.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use zvariant::OwnedObjectPath;

use crate::error::Error;
use crate::names::{
    CONFIGURATION_ROOT, CONFIGURATION_SERVICE, FETCH, FETCH_AVAILABLE_CONFIGS, IMPORT,
    PROP_LOCKED_DOWN, PROP_NAME, PROP_PERSISTENT, REMOVE,
};
use crate::transport::{BusTransport, Target};
use crate::types::{DEFAULT_REMOTE_PORT, Profile, Remote, RemoteTransport};

const ROOT: Target<'static> =
    Target::new(CONFIGURATION_SERVICE, CONFIGURATION_ROOT, CONFIGURATION_SERVICE);

/// How `list()` waits for an activating service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationRetry {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ActivationRetry {
    fn default() -> Self {
        Self {
            attempts: 6,
            delay: Duration::from_secs(1),
        }
    }
}

/// Typed client for the configuration service.
pub struct ConfigClient<T> {
    bus: Arc<T>,
    retry: ActivationRetry,
}

impl<T> Clone for ConfigClient<T> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            retry: self.retry,
        }
    }
}

impl<T: BusTransport> ConfigClient<T> {
    pub fn new(bus: Arc<T>) -> Self {
        Self {
            bus,
            retry: ActivationRetry::default(),
        }
    }

    /// Override the activation retry policy used by [`list`](Self::list).
    pub fn with_retry(mut self, retry: ActivationRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Import a profile; returns the object path of the new configuration.
    pub async fn import(
        &self,
        name: &str,
        ovpn_text: &str,
        single_use: bool,
        persistent: bool,
    ) -> Result<String, Error> {
        let path: OwnedObjectPath = self
            .bus
            .call(
                ROOT,
                IMPORT,
                (name.to_owned(), ovpn_text.to_owned(), single_use, persistent),
            )
            .await?;
        info!(name, path = %path.as_str(), "imported configuration");
        Ok(path.as_str().to_owned())
    }

    /// List every available profile.
    ///
    /// Retries while the service is still activating; any other failure is
    /// returned immediately. Profiles whose details cannot be read are
    /// skipped with a warning.
    pub async fn list(&self) -> Result<Vec<Profile>, Error> {
        let paths = self.fetch_available_configs().await?;
        let mut profiles = Vec::with_capacity(paths.len());
        for path in &paths {
            match self.get_info(path.as_str()).await {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!(path = %path.as_str(), error = %e, "skipping unreadable configuration"),
            }
        }
        debug!(count = profiles.len(), "listed configurations");
        Ok(profiles)
    }

    async fn fetch_available_configs(&self) -> Result<Vec<OwnedObjectPath>, Error> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .bus
                .call::<_, Vec<OwnedObjectPath>>(ROOT, FETCH_AVAILABLE_CONFIGS, ())
                .await
            {
                Ok(paths) => return Ok(paths),
                Err(e) if e.is_activating() && attempt < attempts => {
                    info!(
                        attempt,
                        attempts, "Configuration service not ready, waiting for startup..."
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read one profile: its flags and the `remote` directive of its text.
    ///
    /// Property reads that fail fall back to empty/false; a profile text
    /// that cannot be fetched yields the default remote.
    pub async fn get_info(&self, profile_id: &str) -> Result<Profile, Error> {
        if profile_id.is_empty() {
            return Err(Error::InvalidPath(profile_id.to_owned()));
        }
        let target = ROOT.at(profile_id);

        let name: String = self
            .bus
            .get_property(target, PROP_NAME)
            .await
            .unwrap_or_default();
        let locked_down: bool = self
            .bus
            .get_property(target, PROP_LOCKED_DOWN)
            .await
            .unwrap_or_default();
        let persistent: bool = self
            .bus
            .get_property(target, PROP_PERSISTENT)
            .await
            .unwrap_or_default();

        let remote = match self.bus.call::<_, String>(target, FETCH, ()).await {
            Ok(text) => parse_remote(&text),
            Err(e) => {
                debug!(profile_id, error = %e, "could not fetch profile text");
                Remote::default()
            }
        };

        Ok(Profile {
            id: profile_id.to_owned(),
            name,
            locked_down,
            persistent,
            remote,
        })
    }

    /// Remove a profile from the daemon.
    pub async fn delete(&self, profile_id: &str) -> Result<(), Error> {
        self.bus.call_void(ROOT.at(profile_id), REMOVE, ()).await?;
        info!(profile_id, "removed configuration");
        Ok(())
    }
}

/// Extract the first `remote <host> [<port> [<transport>]]` directive.
///
/// Blank lines and lines starting with `#` or `;` are skipped. A missing
/// or unparsable port is 1194 and a missing transport is UDP; text with
/// no `remote` line yields a remote without a host.
pub fn parse_remote(ovpn_text: &str) -> Remote {
    ovpn_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
        .find_map(|line| {
            let mut words = line.split_whitespace();
            if words.next() != Some("remote") {
                return None;
            }
            let host = words.next()?;
            let port = words
                .next()
                .and_then(|p| p.parse::<u16>().ok())
                .filter(|p| *p > 0)
                .unwrap_or(DEFAULT_REMOTE_PORT);
            let transport = words
                .next()
                .map_or(RemoteTransport::Udp, RemoteTransport::from_directive);
            Some(Remote {
                host: Some(host.to_owned()),
                port,
                transport,
            })
        })
        .unwrap_or_default()
}
