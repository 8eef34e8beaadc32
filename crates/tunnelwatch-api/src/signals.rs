use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::names::{ATTENTION_REQUIRED, SESSIONS_SERVICE};
use crate::transport::{BusTransport, SignalMatch, Subscription};
use crate::types::WEB_AUTH_INPUT_TYPE;

/// Payload of an `AttentionRequired(uus)` signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionEvent {
    pub session_id: String,
    pub kind: u32,
    pub group: u32,
    pub message: String,
}

impl AttentionEvent {
    /// A web-authentication prompt: type 1 with a URL as the message.
    pub fn is_web_auth(&self) -> bool {
        self.kind == WEB_AUTH_INPUT_TYPE && self.message.starts_with("http")
    }
}

/// Subscribes to per-session `AttentionRequired` signals.
pub struct SignalSubscriber<T> {
    bus: Arc<T>,
}

impl<T> Clone for SignalSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
        }
    }
}

impl<T: BusTransport> SignalSubscriber<T> {
    pub fn new(bus: Arc<T>) -> Self {
        Self { bus }
    }

    /// Call `handler` for every `AttentionRequired` emitted by `session_id`.
    ///
    /// Keep the returned handle for as long as the session is observed.
    pub async fn attention_required<F>(
        &self,
        session_id: &str,
        handler: F,
    ) -> Result<Subscription, Error>
    where
        F: Fn(AttentionEvent) + Send + Sync + 'static,
    {
        let rule = SignalMatch {
            sender: SESSIONS_SERVICE.to_owned(),
            path: session_id.to_owned(),
            interface: SESSIONS_SERVICE.to_owned(),
            member: ATTENTION_REQUIRED.to_owned(),
        };
        let owner = session_id.to_owned();
        let subscription = self
            .bus
            .subscribe(rule, move |(kind, group, message): (u32, u32, String)| {
                handler(AttentionEvent {
                    session_id: owner.clone(),
                    kind,
                    group,
                    message,
                });
            })
            .await?;
        debug!(session_id, "watching AttentionRequired");
        Ok(subscription)
    }
}
