//! Messages exchanged with the hosting context

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::call::{CallRequest, CallResult};

/// Type discriminator of the outbound call message
pub const FUNCTION_CALL: &str = "copilot_function_call";
/// Type discriminator of the inbound reply message
pub const FUNCTION_RESPONSE: &str = "copilot_function_response";

/// Outbound: `{ type: "copilot_function_call", call: { id, name, args } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub call: CallRequest,
}

impl FunctionCallMessage {
    pub fn new(call: CallRequest) -> Self {
        Self {
            msg_type: FUNCTION_CALL.to_string(),
            call,
        }
    }
}

/// Inbound: `{ type: "copilot_function_response", callId, result?, error? }`
///
/// `result` and `error` are `Some` whenever the key is present, including
/// when its value is JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponseMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl FunctionResponseMessage {
    pub fn success(call_id: impl Into<String>, result: Value) -> Self {
        Self {
            msg_type: FUNCTION_RESPONSE.to_string(),
            call_id: call_id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(call_id: impl Into<String>, error: Value) -> Self {
        Self {
            msg_type: FUNCTION_RESPONSE.to_string(),
            call_id: call_id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Result wins over error; a reply carrying neither is a null result.
    pub fn into_call_result(self) -> CallResult {
        match (self.result, self.error) {
            (Some(result), _) => CallResult::Result(result),
            (None, Some(error)) => CallResult::Error(error),
            (None, None) => CallResult::Result(Value::Null),
        }
    }
}

/// Check the type discriminator without decoding the rest of the message
pub fn is_function_response(message: &Value) -> bool {
    message.get("type").and_then(Value::as_str) == Some(FUNCTION_RESPONSE)
}

/// An inbound message after classification
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A well-formed reply to a bridged call
    Response(FunctionResponseMessage),
    /// Carries the reply discriminator but cannot be correlated
    MalformedResponse { reason: String },
    /// Anything else; belongs to the relay
    Other(Value),
}

impl InboundMessage {
    pub fn classify(message: Value) -> Self {
        if !is_function_response(&message) {
            return InboundMessage::Other(message);
        }
        match serde_json::from_value::<FunctionResponseMessage>(message) {
            Ok(response) if response.call_id.is_empty() => InboundMessage::MalformedResponse {
                reason: "empty callId".to_string(),
            },
            Ok(response) => InboundMessage::Response(response),
            Err(e) => InboundMessage::MalformedResponse {
                reason: e.to_string(),
            },
        }
    }
}
