//! Identifiers
//!
//! String newtypes for the two keys the core is organised around: the id of a
//! registered mode and the opaque id of a conversation session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of a registered mode (e.g. `"debugging"`)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeId(String);

impl ModeId {
    /// Create a mode id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<str> for ModeId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ModeId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Opaque identifier of a conversation session
///
/// The host owns the value; the core never interprets it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id from a host-supplied value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique session id
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("session_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("session_"));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = ModeId::from("debugging");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"debugging\"");
        assert_eq!(id, "debugging");
    }
}
