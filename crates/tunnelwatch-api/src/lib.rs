//! Typed async client for the OpenVPN3 D-Bus services.
//!
//! - [`ConfigClient`]: import, list, inspect and remove stored profiles
//! - [`SessionClient`]: enumerate sessions and drive their lifecycle
//! - [`SignalSubscriber`]: per-session `AttentionRequired` notifications
//! - [`BusTransport`]: the seam between the clients and the bus, with
//!   [`ZbusTransport`] for the system bus and [`mock::MockBus`] in-process

pub mod config;
pub mod error;
pub mod mock;
pub mod names;
pub mod session;
pub mod signals;
pub mod system_bus;
pub mod transport;
pub mod types;

pub use config::{ActivationRetry, ConfigClient, parse_remote};
pub use error::Error;
pub use session::{DEFAULT_PAUSE_REASON, SessionClient};
pub use signals::{AttentionEvent, SignalSubscriber};
pub use system_bus::ZbusTransport;
pub use transport::{BusTransport, SignalMatch, Subscription, Target};
pub use types::{
    ConnectionTuple, InputSlot, Profile, Remote, RemoteTransport, Session, SessionStats,
    SessionStatus,
};
