//! Requested lifecycle state of an entity.

use crate::error::ReconcileError;
use std::fmt;
use std::str::FromStr;

/// Whether an entity should exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// The entity should exist with the requested settings.
    #[default]
    Present,
    /// The entity should not exist.
    Absent,
}

impl LifecycleState {
    /// Returns the state name.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Present => "present",
            LifecycleState::Absent => "absent",
        }
    }
}

impl FromStr for LifecycleState {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(LifecycleState::Present),
            "absent" => Ok(LifecycleState::Absent),
            other => Err(ReconcileError::invalid_argument(format!(
                "unknown state {other:?}, expected present or absent"
            ))),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_states() {
        assert_eq!("present".parse::<LifecycleState>().unwrap(), LifecycleState::Present);
        assert_eq!("absent".parse::<LifecycleState>().unwrap(), LifecycleState::Absent);
        assert!("latest".parse::<LifecycleState>().is_err());
        assert_eq!(LifecycleState::default(), LifecycleState::Present);
        assert_eq!(LifecycleState::Absent.to_string(), "absent");
    }
}
