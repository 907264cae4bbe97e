//! Identifier types used on the Bazaar relay wire.
//!
//! User ids arrive from browser clients as either JSON strings or JSON
//! numbers; both are normalized to a string so that `42` and `"42"` name
//! the same room.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Errors produced when constructing an identifier from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier was empty or whitespace only.
    #[error("identifier is empty")]
    Empty,
}

/// Identifies a registered marketplace user. Doubles as a room name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawUserId")]
pub struct UserId(String);

/// Shapes a user id may take on the wire before normalization.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawUserId {
    Text(String),
    Number(serde_json::Number),
}

impl TryFrom<RawUserId> for UserId {
    type Error = IdError;

    fn try_from(raw: RawUserId) -> Result<Self, Self::Error> {
        match raw {
            RawUserId::Text(s) => Self::new(s),
            RawUserId::Number(n) => Self::new(n.to_string()),
        }
    }
}

impl UserId {
    /// Creates a user id, rejecting empty or whitespace-only input.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Empty`] if `id` has no visible characters.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(id))
    }

    /// Extracts a user id from a loosely-typed JSON value.
    ///
    /// Accepts non-empty strings and numbers. Anything else (null, bool,
    /// arrays, objects, empty strings) yields `None`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::new(s.as_str()).ok(),
            Value::Number(n) => Self::new(n.to_string()).ok(),
            _ => None,
        }
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one live transport session on the relay.
///
/// Minted by the relay when a socket is accepted. UUID v7 keeps ids unique
/// for the life of the process, so a closed handle is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new, time-ordered connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
