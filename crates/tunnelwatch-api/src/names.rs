// Service names, root object paths, and member names of the OpenVPN3
// daemon. Each service uses its own name as the interface name.

pub const CONFIGURATION_SERVICE: &str = "net.openvpn.v3.configuration";
pub const CONFIGURATION_ROOT: &str = "/net/openvpn/v3/configuration";

pub const SESSIONS_SERVICE: &str = "net.openvpn.v3.sessions";
pub const SESSIONS_ROOT: &str = "/net/openvpn/v3/sessions";

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

// ── Configuration members ───────────────────────────────────────────

pub const IMPORT: &str = "Import";
pub const FETCH_AVAILABLE_CONFIGS: &str = "FetchAvailableConfigs";
pub const FETCH: &str = "Fetch";
pub const REMOVE: &str = "Remove";

pub const PROP_NAME: &str = "name";
pub const PROP_LOCKED_DOWN: &str = "locked_down";
pub const PROP_PERSISTENT: &str = "persistent";

// ── Session members ─────────────────────────────────────────────────

pub const NEW_TUNNEL: &str = "NewTunnel";
pub const FETCH_AVAILABLE_SESSIONS: &str = "FetchAvailableSessions";
pub const CONNECT: &str = "Connect";
pub const DISCONNECT: &str = "Disconnect";
pub const PAUSE: &str = "Pause";
pub const RESUME: &str = "Resume";

pub const PROP_CONFIG_NAME: &str = "config_name";
pub const PROP_DEVICE_NAME: &str = "device_name";
pub const PROP_BACKEND_PID: &str = "backend_pid";
pub const PROP_SESSION_CREATED: &str = "session_created";
pub const PROP_STATUS: &str = "status";
pub const PROP_CONNECTED_TO: &str = "connected_to";
pub const PROP_STATISTICS: &str = "statistics";

pub const USER_INPUT_QUEUE_GET_TYPE_GROUP: &str = "UserInputQueueGetTypeGroup";
pub const USER_INPUT_QUEUE_CHECK: &str = "UserInputQueueCheck";
pub const USER_INPUT_QUEUE_FETCH: &str = "UserInputQueueFetch";

pub const ATTENTION_REQUIRED: &str = "AttentionRequired";
