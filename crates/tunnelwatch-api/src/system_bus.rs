// System bus transport backed by `zbus`.
//
// zbus runs the socket reader on the tokio runtime, so ingress is
// drained as it arrives and callers only ever await replies.

use std::fmt::{Debug, Display};

use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use zbus::{Connection, MatchRule, MessageStream};
use zvariant::{OwnedValue, Type};

use crate::error::Error;
use crate::names::PROPERTIES_INTERFACE;
use crate::transport::{BusTransport, SignalMatch, Subscription, Target};

/// Signals buffered per subscription before the oldest are dropped.
const SIGNAL_QUEUE_DEPTH: usize = 64;

/// A single long-lived connection to the system message bus.
#[derive(Clone, Debug)]
pub struct ZbusTransport {
    conn: Connection,
}

impl ZbusTransport {
    /// Open the system bus.
    pub async fn system() -> Result<Self, Error> {
        let conn = Connection::system()
            .await
            .map_err(|e| Error::BusUnavailable(e.to_string()))?;
        info!(unique_name = ?conn.unique_name(), "connected to system bus");
        Ok(Self { conn })
    }
}

impl BusTransport for ZbusTransport {
    async fn call<A, R>(&self, target: Target<'_>, member: &str, args: A) -> Result<R, Error>
    where
        A: Serialize + Type + Debug + Send + Sync + 'static,
        R: DeserializeOwned + Type + Clone + Send + Sync + 'static,
    {
        trace!(path = target.path, member, ?args, "bus call");
        let reply = self
            .conn
            .call_method(
                Some(target.service),
                target.path,
                Some(target.interface),
                member,
                &args,
            )
            .await
            .map_err(|e| Error::from_zbus(target.service, member, e))?;

        reply
            .body()
            .deserialize::<R>()
            .map_err(|e| Error::from_zbus(target.service, member, e))
    }

    async fn call_void<A>(&self, target: Target<'_>, member: &str, args: A) -> Result<(), Error>
    where
        A: Serialize + Type + Debug + Send + Sync + 'static,
    {
        trace!(path = target.path, member, ?args, "bus call (no reply payload)");
        self.conn
            .call_method(
                Some(target.service),
                target.path,
                Some(target.interface),
                member,
                &args,
            )
            .await
            .map(|_| ())
            .map_err(|e| Error::from_zbus(target.service, member, e))
    }

    async fn get_property<R>(&self, target: Target<'_>, name: &str) -> Result<R, Error>
    where
        R: TryFrom<OwnedValue> + Clone + Send + Sync + 'static,
        R::Error: Display,
    {
        let reply = self
            .conn
            .call_method(
                Some(target.service),
                target.path,
                Some(PROPERTIES_INTERFACE),
                "Get",
                &(target.interface, name),
            )
            .await
            .map_err(|e| Error::from_zbus(target.service, name, e))?;

        let value: OwnedValue = reply
            .body()
            .deserialize()
            .map_err(|e| Error::from_zbus(target.service, name, e))?;

        R::try_from(value).map_err(|e| Error::ShapeMismatch {
            member: name.to_owned(),
            message: e.to_string(),
        })
    }

    async fn subscribe<A, F>(&self, rule: SignalMatch, handler: F) -> Result<Subscription, Error>
    where
        A: DeserializeOwned + Type + Clone + Send + Sync + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let to_error = |e: zbus::Error| Error::from_zbus(&rule.sender, &rule.member, e);

        // The sender is left out of the rule: signals arrive stamped with
        // the emitter's unique name, never the well-known one.
        let match_rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .path(rule.path.as_str())
            .map_err(to_error)?
            .interface(rule.interface.as_str())
            .map_err(to_error)?
            .member(rule.member.as_str())
            .map_err(to_error)?
            .build();

        let stream = MessageStream::for_match_rule(match_rule, &self.conn, Some(SIGNAL_QUEUE_DEPTH))
            .await
            .map_err(to_error)?;

        let token = CancellationToken::new();
        let cancel = token.clone();
        debug!(path = %rule.path, member = %rule.member, "subscribed to signal");

        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(msg)) => match msg.body().deserialize::<A>() {
                            Ok(args) => handler(args),
                            Err(e) => warn!(error = %e, member = %rule.member, "dropping malformed signal"),
                        },
                        Some(Err(e)) => warn!(error = %e, member = %rule.member, "signal stream error"),
                        None => break,
                    }
                }
            }
            debug!(path = %rule.path, member = %rule.member, "signal subscription ended");
        });

        Ok(Subscription::new(token))
    }
}
