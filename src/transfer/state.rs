//! Transfer status definitions
//!
//! Status strings match what is persisted in the transfer log.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Saga step whose failure ended a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStep {
    /// Subject's content location could not be resolved
    Locate,
    /// Object-store copy failed
    Copy,
    /// Ledger commit failed or its precondition was violated
    Commit,
}

impl FailureStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStep::Locate => "locate",
            FailureStep::Copy => "copy",
            FailureStep::Commit => "commit",
        }
    }
}

impl fmt::Display for FailureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transfer status
///
/// ```text
/// IN_PROGRESS ──▶ COMPLETED
///      │
///      └──────▶ FAILED_{LOCATE,COPY,COMMIT}
/// ```
///
/// Terminal states: COMPLETED and every FAILED_* variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransferStatus {
    InProgress,
    Failed(FailureStep),
    Completed,
}

impl TransferStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::InProgress)
    }

    /// Whether a record in `self` may be rewritten with `next`.
    ///
    /// Only IN_PROGRESS may change; rewriting IN_PROGRESS with itself is allowed
    /// (timestamp refresh).
    #[inline]
    pub fn can_transition_to(&self, _next: TransferStatus) -> bool {
        !self.is_terminal()
    }

    /// Failure reason, if failed
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            TransferStatus::Failed(step) => Some(step.as_str()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::InProgress => "IN_PROGRESS",
            TransferStatus::Failed(FailureStep::Locate) => "FAILED_LOCATE",
            TransferStatus::Failed(FailureStep::Copy) => "FAILED_COPY",
            TransferStatus::Failed(FailureStep::Commit) => "FAILED_COMMIT",
            TransferStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(TransferStatus::InProgress),
            "FAILED_LOCATE" => Ok(TransferStatus::Failed(FailureStep::Locate)),
            "FAILED_COPY" => Ok(TransferStatus::Failed(FailureStep::Copy)),
            "FAILED_COMMIT" => Ok(TransferStatus::Failed(FailureStep::Commit)),
            "COMPLETED" => Ok(TransferStatus::Completed),
            other => Err(format!("unknown transfer status: {other}")),
        }
    }
}

impl TryFrom<String> for TransferStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransferStatus> for String {
    fn from(status: TransferStatus) -> Self {
        status.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TransferStatus; 5] = [
        TransferStatus::InProgress,
        TransferStatus::Failed(FailureStep::Locate),
        TransferStatus::Failed(FailureStep::Copy),
        TransferStatus::Failed(FailureStep::Commit),
        TransferStatus::Completed,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(!TransferStatus::InProgress.is_terminal());
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed(FailureStep::Copy).is_terminal());
    }

    #[test]
    fn test_terminal_states_never_transition() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        for to in ALL {
            assert!(TransferStatus::InProgress.can_transition_to(to));
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<TransferStatus>(), Ok(status));
        }
        assert!("DONE".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn test_reason() {
        assert_eq!(
            TransferStatus::Failed(FailureStep::Commit).reason(),
            Some("commit")
        );
        assert_eq!(TransferStatus::Completed.reason(), None);
    }

    #[test]
    fn test_serde_uses_status_strings() {
        let json = serde_json::to_string(&TransferStatus::Failed(FailureStep::Locate)).unwrap();
        assert_eq!(json, "\"FAILED_LOCATE\"");
        let back: TransferStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TransferStatus::Failed(FailureStep::Locate));
    }
}
