//! Target origin restriction for outbound messages

use std::fmt;

/// Where an outbound message may be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetOrigin {
    /// Only a host whose origin equals this string
    Exact(String),
    /// Any host (`*`)
    Any,
}

impl TargetOrigin {
    pub const WILDCARD: &'static str = "*";

    /// Restrict to the expected hosting origin when one is known
    pub fn from_expected(expected: Option<&str>) -> Self {
        match expected {
            Some(origin) => TargetOrigin::Exact(origin.to_string()),
            None => TargetOrigin::Any,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, TargetOrigin::Any)
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            TargetOrigin::Exact(expected) => expected == origin,
            TargetOrigin::Any => true,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TargetOrigin::Exact(origin) => origin,
            TargetOrigin::Any => Self::WILDCARD,
        }
    }
}

impl fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
