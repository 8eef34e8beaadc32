// In-memory bus transport.
//
// Serves canned method replies and property values keyed by object path,
// records every method call in order, and delivers signals emitted from
// test code to live subscriptions. Used by this crate's integration
// tests and by `tunnelwatch-core` to drive the orchestrator offline.

use std::any::{Any, type_name};
use std::collections::{HashMap, VecDeque};
use std::fmt::{Debug, Display};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use zvariant::{OwnedValue, Type};

use crate::error::{Error, UNKNOWN_PROPERTY};
use crate::transport::{BusTransport, SignalMatch, Subscription, Target};

type Key = (String, String);
type Shared = Arc<dyn Any + Send + Sync>;
type Deliver = Arc<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;

#[derive(Clone)]
enum Canned {
    Value(Shared),
    Fail(Error),
}

struct Handler {
    path: String,
    interface: String,
    member: String,
    token: CancellationToken,
    deliver: Deliver,
}

#[derive(Default)]
struct MockState {
    once: HashMap<Key, VecDeque<Canned>>,
    sticky: HashMap<Key, Canned>,
    properties: HashMap<Key, Shared>,
    property_failures: HashMap<Key, Error>,
    calls: Vec<RecordedCall>,
    handlers: Vec<Handler>,
}

/// A method call observed by [`MockBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub path: String,
    pub interface: String,
    pub member: String,
    /// `Debug` rendering of the argument tuple.
    pub args: String,
}

/// In-process [`BusTransport`] with scripted replies.
///
/// Replies are looked up by `(object path, member)`: one-shot replies
/// queued with [`reply_once`](Self::reply_once) / [`fail_once`](Self::fail_once)
/// are consumed first, then the sticky reply set with
/// [`reply`](Self::reply) / [`fail`](Self::fail). A call with no reply
/// configured fails with `UnknownMethod`, except payload-less calls which
/// succeed.
#[derive(Default)]
pub struct MockBus {
    state: Mutex<MockState>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scripting ───────────────────────────────────────────────────

    /// Always answer `member` on `path` with `value`.
    pub fn reply<R: Any + Send + Sync>(&self, path: &str, member: &str, value: R) {
        self.lock()
            .sticky
            .insert(key(path, member), Canned::Value(Arc::new(value)));
    }

    /// Answer the next call of `member` on `path` with `value`.
    pub fn reply_once<R: Any + Send + Sync>(&self, path: &str, member: &str, value: R) {
        self.lock()
            .once
            .entry(key(path, member))
            .or_default()
            .push_back(Canned::Value(Arc::new(value)));
    }

    /// Always fail `member` on `path` with `err`.
    pub fn fail(&self, path: &str, member: &str, err: Error) {
        self.lock().sticky.insert(key(path, member), Canned::Fail(err));
    }

    /// Fail the next call of `member` on `path` with `err`.
    pub fn fail_once(&self, path: &str, member: &str, err: Error) {
        self.lock()
            .once
            .entry(key(path, member))
            .or_default()
            .push_back(Canned::Fail(err));
    }

    pub fn set_property<R: Any + Send + Sync>(&self, path: &str, name: &str, value: R) {
        let mut state = self.lock();
        state.property_failures.remove(&key(path, name));
        state.properties.insert(key(path, name), Arc::new(value));
    }

    /// Fail every read of property `name` on `path` with `err`.
    pub fn fail_property(&self, path: &str, name: &str, err: Error) {
        self.lock().property_failures.insert(key(path, name), err);
    }

    pub fn remove_property(&self, path: &str, name: &str) {
        self.lock().properties.remove(&key(path, name));
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Every method call so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Calls of `member`, in order.
    pub fn calls_to(&self, member: &str) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.member == member)
            .cloned()
            .collect()
    }

    /// Members called so far, in order.
    pub fn call_log(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.member.clone()).collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of subscriptions whose handle is still alive.
    pub fn live_subscriptions(&self) -> usize {
        self.lock()
            .handlers
            .iter()
            .filter(|h| !h.token.is_cancelled())
            .count()
    }

    // ── Signals ─────────────────────────────────────────────────────

    /// Emit a signal to every live subscription matching `path`,
    /// `interface` and `member`. Returns how many handlers received it.
    pub fn emit<A: Any + Send + Sync>(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        args: A,
    ) -> usize {
        let targets: Vec<Deliver> = {
            let mut state = self.lock();
            state.handlers.retain(|h| !h.token.is_cancelled());
            state
                .handlers
                .iter()
                .filter(|h| h.path == path && h.interface == interface && h.member == member)
                .map(|h| Arc::clone(&h.deliver))
                .collect()
        };

        for deliver in &targets {
            deliver(&args);
        }
        targets.len()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn record<A: Debug>(&self, target: Target<'_>, member: &str, args: &A) -> Option<Canned> {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            path: target.path.to_owned(),
            interface: target.interface.to_owned(),
            member: member.to_owned(),
            args: format!("{args:?}"),
        });

        let k = key(target.path, member);
        if let Some(canned) = state.once.get_mut(&k).and_then(VecDeque::pop_front) {
            return Some(canned);
        }
        state.sticky.get(&k).cloned()
    }
}

fn key(path: &str, member: &str) -> Key {
    (path.to_owned(), member.to_owned())
}

fn downcast<R: Clone + 'static>(value: &Shared, member: &str) -> Result<R, Error> {
    value
        .downcast_ref::<R>()
        .cloned()
        .ok_or_else(|| Error::ShapeMismatch {
            member: member.to_owned(),
            message: format!("canned value is not a {}", type_name::<R>()),
        })
}

impl BusTransport for MockBus {
    async fn call<A, R>(&self, target: Target<'_>, member: &str, args: A) -> Result<R, Error>
    where
        A: Serialize + Type + Debug + Send + Sync + 'static,
        R: DeserializeOwned + Type + Clone + Send + Sync + 'static,
    {
        match self.record(target, member, &args) {
            Some(Canned::Value(value)) => downcast(&value, member),
            Some(Canned::Fail(err)) => Err(err),
            None => Err(Error::MethodFailed {
                name: "org.freedesktop.DBus.Error.UnknownMethod".into(),
                message: format!("no reply configured for {member} on {}", target.path),
            }),
        }
    }

    async fn call_void<A>(&self, target: Target<'_>, member: &str, args: A) -> Result<(), Error>
    where
        A: Serialize + Type + Debug + Send + Sync + 'static,
    {
        match self.record(target, member, &args) {
            Some(Canned::Fail(err)) => Err(err),
            Some(Canned::Value(_)) | None => Ok(()),
        }
    }

    async fn get_property<R>(&self, target: Target<'_>, name: &str) -> Result<R, Error>
    where
        R: TryFrom<OwnedValue> + Clone + Send + Sync + 'static,
        R::Error: Display,
    {
        let value = {
            let state = self.lock();
            let k = key(target.path, name);
            if let Some(err) = state.property_failures.get(&k) {
                return Err(err.clone());
            }
            state.properties.get(&k).cloned()
        };
        match value {
            Some(value) => downcast(&value, name),
            None => Err(Error::MethodFailed {
                name: UNKNOWN_PROPERTY.into(),
                message: format!("no property {name} on {}", target.path),
            }),
        }
    }

    async fn subscribe<A, F>(&self, rule: SignalMatch, handler: F) -> Result<Subscription, Error>
    where
        A: DeserializeOwned + Type + Clone + Send + Sync + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let token = CancellationToken::new();
        let deliver: Deliver = Arc::new(move |any: &(dyn Any + Send + Sync)| {
            if let Some(args) = any.downcast_ref::<A>() {
                handler(args.clone());
            }
        });

        self.lock().handlers.push(Handler {
            path: rule.path,
            interface: rule.interface,
            member: rule.member,
            token: token.clone(),
            deliver,
        });

        Ok(Subscription::new(token))
    }
}
