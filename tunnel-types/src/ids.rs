//! Identity types for agent sessions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session identifier assigned by an agent in its start acknowledgement.
///
/// Opaque to the orchestrator; it is only echoed back in the matching stop
/// request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(i64);

impl SessionId {
    /// Wrap a raw session value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw session value.
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_a_bare_integer_on_the_wire() {
        let json = serde_json::to_string(&SessionId::new(42)).unwrap();
        assert_eq!(json, "42");

        let parsed: SessionId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed.value(), 7);
    }

    #[test]
    fn session_id_debug_and_display() {
        let id = SessionId::new(-3);
        assert_eq!(id.to_string(), "-3");
        assert_eq!(format!("{:?}", id), "SessionId(-3)");
    }
}
