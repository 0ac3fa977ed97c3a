//! Batch Job Error Types

use thiserror::Error;

use crate::ledger::LedgerError;

use super::types::{BatchPlan, JobStatus};

/// Job tracker persistence errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Batch not found: {job_id}/{batch_id}")]
    BatchNotFound { job_id: String, batch_id: String },

    #[error("Invalid batch transition for {batch_id}: {from} -> {to}")]
    InvalidTransition {
        batch_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job tracker unavailable: {0}")]
    Unavailable(String),
}

impl TrackerError {
    pub fn code(&self) -> &'static str {
        match self {
            TrackerError::JobNotFound(_) => "JOB_NOT_FOUND",
            TrackerError::BatchNotFound { .. } => "BATCH_NOT_FOUND",
            TrackerError::InvalidTransition { .. } => "INVALID_BATCH_TRANSITION",
            TrackerError::Unavailable(_) => "TRACKER_UNAVAILABLE",
        }
    }
}

/// Batch worker errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("Invalid batch plan: {0}")]
    InvalidPlan(String),

    #[error("Item write failed: {0}")]
    Write(#[from] LedgerError),

    #[error("Job tracker write failed: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Batch worker aborted: {0}")]
    Worker(String),

    #[error(transparent)]
    Planning(#[from] PlanningError),
}

impl BatchError {
    pub fn code(&self) -> &'static str {
        match self {
            BatchError::InvalidPlan(_) => "INVALID_PLAN",
            BatchError::Write(_) => "ITEM_WRITE_ERROR",
            BatchError::Tracker(_) => "TRACKER_ERROR",
            BatchError::Worker(_) => "WORKER_ERROR",
            BatchError::Planning(e) => e.code(),
        }
    }
}

/// Planning errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanningError {
    #[error("Invalid job request: {0}")]
    InvalidInput(String),

    /// Tracker write failed part-way; `planned` holds the batches whose
    /// tracker records were written before the failure.
    #[error("Planning aborted after {} batches: {source}", .planned.len())]
    Tracker {
        planned: Vec<BatchPlan>,
        #[source]
        source: TrackerError,
    },
}

impl PlanningError {
    pub fn code(&self) -> &'static str {
        match self {
            PlanningError::InvalidInput(_) => "INVALID_JOB_REQUEST",
            PlanningError::Tracker { .. } => "PLANNING_ERROR",
        }
    }

    /// Batches already recorded before the failure
    pub fn planned(&self) -> &[BatchPlan] {
        match self {
            PlanningError::InvalidInput(_) => &[],
            PlanningError::Tracker { planned, .. } => planned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(TrackerError::JobNotFound("j".into()).code(), "JOB_NOT_FOUND");
        assert_eq!(
            BatchError::from(LedgerError::ConditionFailed("items/x".into())).code(),
            "ITEM_WRITE_ERROR"
        );
        assert_eq!(
            PlanningError::InvalidInput("zero".into()).code(),
            "INVALID_JOB_REQUEST"
        );
    }

    #[test]
    fn test_planning_error_display() {
        let err = PlanningError::Tracker {
            planned: Vec::new(),
            source: TrackerError::Unavailable("down".into()),
        };
        assert_eq!(
            err.to_string(),
            "Planning aborted after 0 batches: Job tracker unavailable: down"
        );
        assert!(err.planned().is_empty());
    }
}
