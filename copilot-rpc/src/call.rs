//! Correlation ids and call payloads

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Correlation id linking an outbound call to its reply.
///
/// Random v4 UUID, so two outstanding calls never share an id in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id exactly as it was issued.
    ///
    /// Only the lowercase hyphenated form is accepted; other spellings of
    /// the same UUID (uppercase, simple, braced, urn) name no call.
    pub fn parse(s: &str) -> Option<Self> {
        let id = Uuid::parse_str(s).ok().map(Self)?;
        (id.to_string() == s).then_some(id)
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A remote function invocation forwarded to the hosting context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub id: CallId,
    /// Remote function identifier, opaque to the bridge
    pub name: String,
    /// Arguments, forwarded verbatim
    pub args: Value,
}

/// Outcome of a call as seen by the original caller.
///
/// Serializes as `{"result": ...}` or `{"error": ...}`, which is the shape
/// the chat backend expects back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallResult {
    Result(Value),
    Error(Value),
}

impl CallResult {
    pub fn success(value: Value) -> Self {
        CallResult::Result(value)
    }

    pub fn error(error: impl Into<Value>) -> Self {
        CallResult::Error(error.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CallResult::Error(_))
    }
}
