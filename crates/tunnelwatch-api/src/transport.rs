// Bus transport abstraction
//
// Everything the typed clients need from the message bus: method calls
// with typed arguments and replies, property reads, and signal
// subscriptions. `ZbusTransport` talks to the real system bus;
// `MockBus` serves canned replies in-process.

use std::fmt::{self, Debug, Display};
use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::{CancellationToken, DropGuard};
use zvariant::{OwnedValue, Type};

use crate::error::Error;

/// Address of one interface on one remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target<'a> {
    pub service: &'a str,
    pub path: &'a str,
    pub interface: &'a str,
}

impl<'a> Target<'a> {
    pub const fn new(service: &'a str, path: &'a str, interface: &'a str) -> Self {
        Self {
            service,
            path,
            interface,
        }
    }

    /// Same service and interface, different object.
    pub fn at<'b>(&self, path: &'b str) -> Target<'b>
    where
        'a: 'b,
    {
        Target {
            service: self.service,
            path,
            interface: self.interface,
        }
    }
}

/// Which signals a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMatch {
    /// Well-known name of the emitting service.
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
}

/// Handle for a live signal subscription.
///
/// The subscription stays active for as long as this value is alive;
/// dropping it stops delivery.
#[must_use = "dropping a Subscription ends it"]
pub struct Subscription {
    token: CancellationToken,
    _guard: DropGuard,
}

impl Subscription {
    /// Bind a subscription to `token`: the token is cancelled when the
    /// handle is dropped, and delivery loops watch it.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// A connection-oriented RPC fabric with typed calls, properties and signals.
///
/// Every call is a request/response pair; failures come back as
/// [`Error`] with the remote error name already classified.
pub trait BusTransport: Send + Sync + 'static {
    /// Call `member` on `target` and decode its reply as `R`.
    fn call<A, R>(
        &self,
        target: Target<'_>,
        member: &str,
        args: A,
    ) -> impl Future<Output = Result<R, Error>> + Send
    where
        A: Serialize + Type + Debug + Send + Sync + 'static,
        R: DeserializeOwned + Type + Clone + Send + Sync + 'static;

    /// Call a method whose reply carries no payload.
    fn call_void<A>(
        &self,
        target: Target<'_>,
        member: &str,
        args: A,
    ) -> impl Future<Output = Result<(), Error>> + Send
    where
        A: Serialize + Type + Debug + Send + Sync + 'static;

    /// Read property `name` of `target.interface` on `target.path`.
    fn get_property<R>(
        &self,
        target: Target<'_>,
        name: &str,
    ) -> impl Future<Output = Result<R, Error>> + Send
    where
        R: TryFrom<OwnedValue> + Clone + Send + Sync + 'static,
        R::Error: Display;

    /// Deliver every signal matching `rule`, decoded as `A`, to `handler`
    /// until the returned [`Subscription`] is dropped.
    fn subscribe<A, F>(
        &self,
        rule: SignalMatch,
        handler: F,
    ) -> impl Future<Output = Result<Subscription, Error>> + Send
    where
        A: DeserializeOwned + Type + Clone + Send + Sync + 'static,
        F: Fn(A) + Send + Sync + 'static;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_at_keeps_service_and_interface() {
        let root = Target::new(
            "net.openvpn.v3.sessions",
            "/net/openvpn/v3/sessions",
            "net.openvpn.v3.sessions",
        );
        let child = root.at("/net/openvpn/v3/sessions/s1");
        assert_eq!(child.service, root.service);
        assert_eq!(child.interface, root.interface);
        assert_eq!(child.path, "/net/openvpn/v3/sessions/s1");
    }

    #[test]
    fn dropping_subscription_cancels_its_token() {
        let token = CancellationToken::new();
        let sub = Subscription::new(token.clone());
        assert!(sub.is_active());
        drop(sub);
        assert!(token.is_cancelled());
    }
}
