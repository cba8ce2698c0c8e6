use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Macro to stamp out the small family of opaque, newtype string ids used
/// throughout the core (session, connection, turn, response, tool-call,
/// interaction). Each wraps a plain `String` — the wire format for all of
/// them is just the bare string, never an object.
macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(SessionId);
opaque_id!(ConnId);
opaque_id!(TurnId);
opaque_id!(ResponseId);
opaque_id!(CallId);
opaque_id!(InteractionId);

/// Identifies which agent handles a session. Unlike the other ids this one
/// is usually a short human-chosen slug ("main", "research") rather than a
/// generated uuid, so it has no `new()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn main() -> Self {
        Self("main".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A time-sortable id (UUIDv7) for durable rows such as `ChatEvent`s and
/// `SessionSummary`s, where log correlation benefits from sort-by-id order.
pub fn new_durable_id() -> String {
    Uuid::now_v7().to_string()
}

/// RFC 3339 timestamp for "now" in UTC — the canonical timestamp format for
/// every persisted row and wire payload in this system.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
