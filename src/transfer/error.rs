//! Transfer Error Types

use thiserror::Error;

use super::state::{FailureStep, TransferStatus};

/// Transfer saga errors
///
/// Step errors (`Locate`, `Copy`, `Commit`) are returned only after the
/// failure has been recorded in the transfer log.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Invalid transfer request: {0}")]
    InvalidRequest(String),

    #[error("Malformed transfer message: {0}")]
    MalformedMessage(String),

    // === Step Errors ===
    #[error("Could not locate content for subject: {0}")]
    Locate(String),

    #[error("Content copy failed: {0}")]
    Copy(String),

    #[error("Ledger commit failed: {0}")]
    Commit(String),

    /// A balance kept changing under the commit; the transfer stays IN_PROGRESS
    #[error("Ledger commit contended on {0}")]
    CommitContention(String),

    // === Transfer Log Errors ===
    #[error("Transfer log write failed: {0}")]
    LogWrite(String),

    #[error("Transfer already exists: {0}")]
    DuplicateTransfer(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("Stale write for transfer {0}: last_updated must increase")]
    StaleWrite(String),

    // === Queue Errors ===
    #[error("Queue send failed: {0}")]
    Queue(String),
}

impl TransferError {
    /// Stable error code for logs and status output
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidRequest(_) => "INVALID_REQUEST",
            TransferError::MalformedMessage(_) => "MALFORMED_MESSAGE",
            TransferError::Locate(_) => "LOCATE_ERROR",
            TransferError::Copy(_) => "COPY_ERROR",
            TransferError::Commit(_) => "COMMIT_ERROR",
            TransferError::CommitContention(_) => "COMMIT_CONTENTION",
            TransferError::LogWrite(_) => "LOG_WRITE_ERROR",
            TransferError::DuplicateTransfer(_) => "DUPLICATE_TRANSFER",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            TransferError::StaleWrite(_) => "STALE_WRITE",
            TransferError::Queue(_) => "QUEUE_ERROR",
        }
    }

    /// Whether redelivering the same message can make progress.
    ///
    /// Step failures are already recorded as terminal, so a redelivery would
    /// only observe the failed record. A log write failure leaves the record
    /// IN_PROGRESS (or absent) and is worth another attempt, as does a commit
    /// that lost every race for a balance.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::LogWrite(_)
                | TransferError::CommitContention(_)
                | TransferError::DuplicateTransfer(_)
                | TransferError::Queue(_)
        )
    }

    /// The saga step this error ends the transfer at
    pub fn failure_step(&self) -> Option<FailureStep> {
        match self {
            TransferError::Locate(_) => Some(FailureStep::Locate),
            TransferError::Copy(_) => Some(FailureStep::Copy),
            TransferError::Commit(_) => Some(FailureStep::Commit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::Locate("x".into()).code(), "LOCATE_ERROR");
        assert_eq!(TransferError::LogWrite("x".into()).code(), "LOG_WRITE_ERROR");
        assert_eq!(
            TransferError::InvalidStatusTransition {
                from: TransferStatus::Completed,
                to: TransferStatus::InProgress,
            }
            .code(),
            "INVALID_STATUS_TRANSITION"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(TransferError::LogWrite("down".into()).is_retryable());
        assert!(!TransferError::Commit("insufficient".into()).is_retryable());
        assert!(TransferError::CommitContention("balances/bob#RD01".into()).is_retryable());
        assert_eq!(
            TransferError::CommitContention("k".into()).failure_step(),
            None
        );
        assert!(!TransferError::InvalidRequest("empty".into()).is_retryable());
    }

    #[test]
    fn test_failure_step() {
        assert_eq!(
            TransferError::Copy("x".into()).failure_step(),
            Some(FailureStep::Copy)
        );
        assert_eq!(TransferError::LogWrite("x".into()).failure_step(), None);
    }

    #[test]
    fn test_display() {
        let err = TransferError::InvalidStatusTransition {
            from: TransferStatus::Completed,
            to: TransferStatus::InProgress,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition: COMPLETED -> IN_PROGRESS"
        );
    }
}
