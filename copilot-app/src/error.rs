use serde_json::Value;
use thiserror::Error;

/// Failures of the call bridge.
///
/// Most of these never reach a caller as a Rust error: they are rendered
/// into the `error` payload of the caller's `CallResult`.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Cannot communicate with the hosting context.")]
    HostUnreachable,
    #[error("Remote function name must not be empty")]
    EmptyName,
    #[error("Hosting origin is unknown and strict origin mode is enabled")]
    OriginUnknown,
    #[error("No attached host matches target origin {0}")]
    NoMatchingHost(String),
    #[error("Failed to deliver call to the hosting context: {0}")]
    Delivery(String),
    #[error("Bridge has been torn down")]
    Closed,
    #[error("Call was abandoned before a reply arrived")]
    Abandoned,
    #[error("Call '{name}' timed out after {millis} ms")]
    TimedOut { name: String, millis: u128 },
    #[error("Failed to serialize call message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl BridgeError {
    /// Opaque error payload handed to the caller
    pub fn to_payload(&self) -> Value {
        Value::String(self.to_string())
    }
}
