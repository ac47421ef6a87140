//! Types for the hosting-context bridge

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default port the widget endpoint listens on
pub const DEFAULT_PORT: u16 = 27040;

/// Number of port fallback attempts (27040-27049)
pub const DEFAULT_PORT_ATTEMPTS: u16 = 10;

/// Origin reported for a host whose handshake carried no `Origin` header
pub const NULL_ORIGIN: &str = "null";

/// A local request to invoke a function in the hosting context.
///
/// This is what the chat session raises; the callback half lives
/// with whoever hands the intent to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallIntent {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// A hosting context attached to the widget endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSession {
    /// Unique session ID assigned by the bridge
    pub session_id: String,
    /// Origin taken from the WebSocket handshake
    pub origin: String,
    /// Unix timestamp when the host attached
    pub connected_at: u64,
}

/// Notifications from the bridge runtime to its owner
#[derive(Debug, Clone)]
pub enum BridgeNotification {
    /// Endpoint started listening
    ServerStarted {
        /// The port the endpoint is listening on
        port: u16,
    },
    /// Endpoint stopped
    ServerStopped,
    /// A hosting context attached
    HostAttached(HostSession),
    /// A hosting context went away
    HostDetached {
        session_id: String,
    },
    /// An error occurred in the runtime
    Error {
        message: String,
    },
}
