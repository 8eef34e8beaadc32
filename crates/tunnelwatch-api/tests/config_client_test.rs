#![allow(clippy::unwrap_used)]
// Integration tests for `ConfigClient` against the in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use zvariant::OwnedObjectPath;

use tunnelwatch_api::mock::MockBus;
use tunnelwatch_api::names::{
    CONFIGURATION_ROOT, FETCH, FETCH_AVAILABLE_CONFIGS, IMPORT, PROP_LOCKED_DOWN, PROP_NAME,
    PROP_PERSISTENT, REMOVE,
};
use tunnelwatch_api::{ActivationRetry, ConfigClient, Error, RemoteTransport};

// ── Helpers ─────────────────────────────────────────────────────────

const WORK: &str = "/net/openvpn/v3/configuration/work01";
const HOME: &str = "/net/openvpn/v3/configuration/home02";

fn opath(path: &str) -> OwnedObjectPath {
    OwnedObjectPath::try_from(path).unwrap()
}

fn setup() -> (Arc<MockBus>, ConfigClient<MockBus>) {
    let bus = Arc::new(MockBus::new());
    let client = ConfigClient::new(Arc::clone(&bus));
    (bus, client)
}

fn add_profile(bus: &MockBus, path: &str, name: &str, text: &str) {
    bus.set_property(path, PROP_NAME, name.to_owned());
    bus.set_property(path, PROP_LOCKED_DOWN, false);
    bus.set_property(path, PROP_PERSISTENT, true);
    bus.reply(path, FETCH, text.to_owned());
}

fn activating() -> Error {
    Error::ServiceActivating {
        service: "net.openvpn.v3.configuration".into(),
    }
}

// ── Import / delete ─────────────────────────────────────────────────

#[tokio::test]
async fn test_import_returns_object_path() {
    let (bus, client) = setup();
    bus.reply(CONFIGURATION_ROOT, IMPORT, opath(WORK));

    let id = client
        .import("work", "remote vpn.example.net 1194 udp\n", false, true)
        .await
        .unwrap();

    assert_eq!(id, WORK);
    let calls = bus.calls_to(IMPORT);
    assert_eq!(calls.len(), 1);
    assert!(calls[0].args.contains("\"work\""), "args: {}", calls[0].args);
    assert!(calls[0].args.contains("false, true"), "args: {}", calls[0].args);
}

#[tokio::test]
async fn test_delete_calls_remove_on_profile_object() {
    let (bus, client) = setup();
    client.delete(WORK).await.unwrap();

    let calls = bus.calls_to(REMOVE);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, WORK);
}

#[tokio::test]
async fn test_delete_surfaces_daemon_message() {
    let (bus, client) = setup();
    bus.fail(
        WORK,
        REMOVE,
        Error::MethodFailed {
            name: "net.openvpn.v3.error.acl.denied".into(),
            message: "Access denied".into(),
        },
    );

    let result = client.delete(WORK).await;
    assert!(
        matches!(&result, Err(Error::MethodFailed { message, .. }) if message == "Access denied"),
        "expected MethodFailed, got: {result:?}"
    );
}

// ── Listing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_reads_every_profile() {
    let (bus, client) = setup();
    bus.reply(CONFIGURATION_ROOT, FETCH_AVAILABLE_CONFIGS, vec![opath(WORK), opath(HOME)]);
    add_profile(&bus, WORK, "work", "# corp\nremote vpn.corp.example 443 tcp\n");
    add_profile(&bus, HOME, "home", "remote home.example\n");

    let profiles = client.list().await.unwrap();

    assert_eq!(profiles.len(), 2);
    assert_eq!(profiles[0].id, WORK);
    assert_eq!(profiles[0].name, "work");
    assert!(profiles[0].persistent);
    assert!(!profiles[0].locked_down);
    assert_eq!(profiles[0].remote.host.as_deref(), Some("vpn.corp.example"));
    assert_eq!(profiles[0].remote.port, 443);
    assert_eq!(profiles[0].remote.transport, RemoteTransport::Tcp);

    assert_eq!(profiles[1].remote.port, 1194);
    assert_eq!(profiles[1].remote.transport, RemoteTransport::Udp);
}

#[tokio::test]
async fn test_get_info_defaults_unreadable_properties() {
    // No properties and no profile text configured.
    let (_bus, client) = setup();

    let profile = client.get_info(WORK).await.unwrap();
    assert_eq!(profile.name, "");
    assert!(!profile.locked_down);
    assert!(profile.remote.host.is_none());
    assert_eq!(profile.remote.port, 1194);
}

#[tokio::test(start_paused = true)]
async fn test_list_retries_while_service_activates() {
    let (bus, client) = setup();
    bus.fail_once(CONFIGURATION_ROOT, FETCH_AVAILABLE_CONFIGS, activating());
    bus.fail_once(CONFIGURATION_ROOT, FETCH_AVAILABLE_CONFIGS, activating());
    bus.reply(CONFIGURATION_ROOT, FETCH_AVAILABLE_CONFIGS, vec![opath(WORK)]);
    add_profile(&bus, WORK, "work", "remote vpn.example.net\n");

    let started = tokio::time::Instant::now();
    let profiles = client.list().await.unwrap();

    assert_eq!(profiles.len(), 1);
    assert_eq!(bus.calls_to(FETCH_AVAILABLE_CONFIGS).len(), 3);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_list_gives_up_after_six_attempts() {
    let (bus, client) = setup();
    bus.fail(CONFIGURATION_ROOT, FETCH_AVAILABLE_CONFIGS, activating());

    let result = client.list().await;

    assert!(
        matches!(result, Err(Error::ServiceActivating { .. })),
        "expected ServiceActivating, got: {result:?}"
    );
    assert_eq!(bus.calls_to(FETCH_AVAILABLE_CONFIGS).len(), 6);
}

#[tokio::test]
async fn test_list_does_not_retry_other_failures() {
    let (bus, client) = setup();
    bus.fail(
        CONFIGURATION_ROOT,
        FETCH_AVAILABLE_CONFIGS,
        Error::BusUnavailable("connection reset".into()),
    );

    let result = client.list().await;
    assert!(matches!(result, Err(Error::BusUnavailable(_))), "got: {result:?}");
    assert_eq!(bus.calls_to(FETCH_AVAILABLE_CONFIGS).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_list_does_not_retry_a_timeout() {
    let (bus, client) = setup();
    bus.fail(
        CONFIGURATION_ROOT,
        FETCH_AVAILABLE_CONFIGS,
        Error::from_error_reply(
            "net.openvpn.v3.configuration",
            "org.freedesktop.DBus.Error.NoReply",
            Some("Did not receive a reply".into()),
        ),
    );

    let result = client.list().await;
    assert!(matches!(result, Err(Error::MethodFailed { .. })), "got: {result:?}");
    assert_eq!(bus.calls_to(FETCH_AVAILABLE_CONFIGS).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_retry_policy() {
    let bus = Arc::new(MockBus::new());
    let client = ConfigClient::new(Arc::clone(&bus)).with_retry(ActivationRetry {
        attempts: 2,
        delay: Duration::from_millis(100),
    });
    bus.fail(CONFIGURATION_ROOT, FETCH_AVAILABLE_CONFIGS, activating());

    assert!(client.list().await.is_err());
    assert_eq!(bus.calls_to(FETCH_AVAILABLE_CONFIGS).len(), 2);
}
