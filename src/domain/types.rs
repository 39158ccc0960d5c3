//! Identifiers and enumerations shared by every cached resource.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HospitalId(pub i64);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for HospitalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a job application as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Reviewing,
    Accepted,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Reviewing => "reviewing",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }

    /// Only applications still under consideration can be withdrawn.
    pub fn is_withdrawable(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Pending | ApplicationStatus::Reviewing
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn withdrawable_states() {
        assert!(ApplicationStatus::Pending.is_withdrawable());
        assert!(ApplicationStatus::Reviewing.is_withdrawable());
        assert!(!ApplicationStatus::Accepted.is_withdrawable());
        assert!(!ApplicationStatus::Rejected.is_withdrawable());
        assert!(!ApplicationStatus::Withdrawn.is_withdrawable());
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&ApplicationStatus::Withdrawn).expect("serialize");
        assert_eq!(json, "\"withdrawn\"");
        assert_eq!(ApplicationStatus::Reviewing.to_string(), "reviewing");
    }

    #[test]
    fn ids_are_transparent() {
        let json = serde_json::to_string(&ApplicationId(42)).expect("serialize");
        assert_eq!(json, "42");
    }
}
