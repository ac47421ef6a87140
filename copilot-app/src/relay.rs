//! Inbound message routing
//!
//! Every message the hosting context sends lands here first. Function
//! responses belong to the [`CallBridge`]; everything else is handed
//! untouched to a [`MessageRelay`] that forwards it to the chat session.

use std::sync::Arc;

use copilot_rpc::is_function_response;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde_json::Value;

use crate::bridge::{CallBridge, ReplyOutcome};

/// Forwards non-bridge messages from the host to the chat session
pub trait MessageRelay: Send + Sync {
    fn relay(&self, message: Value);
}

/// Relay backed by a channel the chat session drains
#[derive(Clone)]
pub struct ChannelRelay {
    tx: Sender<Value>,
}

impl ChannelRelay {
    pub fn new() -> (Self, Receiver<Value>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl MessageRelay for ChannelRelay {
    fn relay(&self, message: Value) {
        if self.tx.send(message).is_err() {
            tracing::info!("Chat session not active, dropping relayed message");
        }
    }
}

/// What happened to an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Handled by the call bridge
    Reply(ReplyOutcome),
    /// Forwarded to the chat session
    Relayed,
    /// Dropped because it came from an unexpected origin
    Dropped,
}

#[derive(Clone)]
pub struct InboundRouter {
    bridge: CallBridge,
    relay: Arc<dyn MessageRelay>,
}

impl InboundRouter {
    pub fn new(bridge: CallBridge, relay: Arc<dyn MessageRelay>) -> Self {
        Self { bridge, relay }
    }

    pub fn dispatch(&self, message: Value, origin: &str) -> Dispatch {
        if is_function_response(&message) {
            return Dispatch::Reply(self.bridge.handle_reply(message, origin));
        }
        if !self.bridge.accepts_origin(origin) {
            tracing::trace!(origin, "Ignoring message from unexpected origin");
            return Dispatch::Dropped;
        }
        tracing::debug!("Relaying message from hosting context: {}", message);
        self.relay.relay(message);
        Dispatch::Relayed
    }
}
