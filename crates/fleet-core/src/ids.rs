//! Opaque identifiers used across the fleet control plane.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A drone identifier: `^[A-Za-z0-9_-]{1,50}$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DroneId(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid drone id {0:?}: must match ^[A-Za-z0-9_-]{{1,50}}$")]
pub struct InvalidDroneId(pub String);

impl DroneId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidDroneId> {
        let raw = raw.into();
        if raw.is_empty()
            || raw.len() > 50
            || !raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(InvalidDroneId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DroneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DroneId {
    type Error = InvalidDroneId;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for DroneId {
    type Error = InvalidDroneId;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value.to_string())
    }
}

/// Identifier for a long-running supervisor task (altitude hold, waypoint
/// plan, tracking hold).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        assert!(DroneId::parse("D1").is_ok());
        assert!(DroneId::parse("drone_01-A").is_ok());
        assert!(DroneId::parse("a".repeat(50)).is_ok());
    }

    #[test]
    fn rejects_invalid_ids() {
        assert!(DroneId::parse("").is_err());
        assert!(DroneId::parse("a".repeat(51)).is_err());
        assert!(DroneId::parse("has space").is_err());
        assert!(DroneId::parse("has/slash").is_err());
    }
}
