//! The outbound half of the bridge: how a call reaches the hosting context

use copilot_rpc::{FunctionCallMessage, TargetOrigin};

use crate::error::BridgeError;

/// A structured message channel to the hosting context.
pub trait HostChannel: Send + Sync {
    /// Whether a hosting context is currently reachable
    fn is_attached(&self) -> bool;

    /// Deliver a call message, restricted to hosts matching `target`
    fn post(&self, message: &FunctionCallMessage, target: &TargetOrigin) -> Result<(), BridgeError>;
}

/// Channel of a surface that is not embedded anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopLevel;

impl HostChannel for TopLevel {
    fn is_attached(&self) -> bool {
        false
    }

    fn post(&self, _message: &FunctionCallMessage, _target: &TargetOrigin) -> Result<(), BridgeError> {
        Err(BridgeError::HostUnreachable)
    }
}
