//! Hosting-context call bridge
//!
//! Forwards function calls raised by the chat session to the hosting
//! context and routes the host's asynchronous replies back to the
//! original caller.
//!
//! ## Architecture
//!
//! ```text
//! chat session --initiate_call--> CallBridge --post--> HostChannel
//!                                     ^                     |
//!                                     |              WebSocket endpoint
//!                                     |                     |
//!                                 handle_reply <-- InboundRouter --> MessageRelay
//! ```
//!
//! ## Modules
//!
//! - [`types`]: notifications, call intents, constants
//! - [`host`]: the outbound channel abstraction
//! - [`handler`]: the pending-call table and correlation logic
//! - [`runtime`]: background Tokio runtime with the WebSocket endpoint

mod handler;
mod host;
mod runtime;
mod types;

pub use handler::{BridgeOptions, BridgeStats, CallBridge, CallCallback, ReplyOutcome};

pub use host::{HostChannel, TopLevel};

pub use runtime::{
    BridgeHandle,
    BridgeRpc,
    BridgeRuntime,
    RuntimeControl,
    WsHostChannel,
    start_bridge_runtime,
};

pub use types::{
    BridgeNotification,
    CallIntent,
    DEFAULT_PORT,
    DEFAULT_PORT_ATTEMPTS,
    HostSession,
    NULL_ORIGIN,
};
