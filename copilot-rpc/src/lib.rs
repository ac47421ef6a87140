//! Wire types shared between the widget and its hosting context.
//!
//! The hosting context only ever sees two shapes: the outbound
//! [`FunctionCallMessage`] and the inbound [`FunctionResponseMessage`].
//! Everything else arriving from the host is opaque JSON and is
//! classified as [`InboundMessage::Other`].

pub mod call;
pub mod message;
pub mod origin;

pub use call::{CallId, CallRequest, CallResult};
pub use message::{
    FUNCTION_CALL, FUNCTION_RESPONSE, FunctionCallMessage, FunctionResponseMessage,
    InboundMessage, is_function_response,
};
pub use origin::TargetOrigin;
