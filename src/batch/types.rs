//! Batch Job Types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Batch (and derived job) status
///
/// ```text
/// PENDING ──▶ IN_PROGRESS ──▶ COMPLETED
///    │             │
///    └─────────────┴──────▶ FAILED ──▶ IN_PROGRESS (re-planned)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// A failed batch may be re-planned; a completed one never changes.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, InProgress)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Request to create `quantity` items for a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub subject_id: String,
    pub quantity: u32,
    /// Payload type stamped on every item; configured default when absent
    #[serde(default)]
    pub category: Option<String>,
}

/// One batch of a job. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPlan {
    pub job_id: String,
    /// `batch<k>`, 1-indexed
    pub batch_id: String,
    pub batch_number: u32,
    pub item_count: u32,
    pub item_prefix: String,
    pub payload_type: String,
    pub subject_id: String,
}

/// One row per (job id, batch id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTrackerRecord {
    pub job_id: String,
    pub batch_id: String,
    pub batch_number: u32,
    pub subject_id: String,
    pub status: JobStatus,
    pub item_count: u32,
    /// Empty unless failed
    pub error_detail: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl JobTrackerRecord {
    pub fn in_progress(plan: &BatchPlan, now: DateTime<Utc>) -> Self {
        Self {
            job_id: plan.job_id.clone(),
            batch_id: plan.batch_id.clone(),
            batch_number: plan.batch_number,
            subject_id: plan.subject_id.clone(),
            status: JobStatus::InProgress,
            item_count: plan.item_count,
            error_detail: String::new(),
            created_at: now,
            last_updated: now,
        }
    }
}

/// Derived view of a job, recomputed on every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub overall_status: JobStatus,
    pub total_items: u64,
    /// Completed batches over all batches, 0..=100
    pub completion_percent: u32,
    pub batches: Vec<JobTrackerRecord>,
}

impl JobSummary {
    /// Summarize a job from its batch records (ordered by batch number)
    pub fn from_batches(job_id: impl Into<String>, batches: Vec<JobTrackerRecord>) -> Self {
        let completed = batches
            .iter()
            .filter(|b| b.status == JobStatus::Completed)
            .count();
        let completion_percent = if batches.is_empty() {
            0
        } else {
            (completed * 100 / batches.len()) as u32
        };

        Self {
            job_id: job_id.into(),
            overall_status: overall_status(&batches),
            total_items: batches.iter().map(|b| u64::from(b.item_count)).sum(),
            completion_percent,
            batches,
        }
    }
}

/// FAILED if any batch failed, COMPLETED if all completed, else IN_PROGRESS
pub fn overall_status(batches: &[JobTrackerRecord]) -> JobStatus {
    if batches.iter().any(|b| b.status == JobStatus::Failed) {
        JobStatus::Failed
    } else if !batches.is_empty() && batches.iter().all(|b| b.status == JobStatus::Completed) {
        JobStatus::Completed
    } else {
        JobStatus::InProgress
    }
}

/// One job that created items for a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryEntry {
    pub job_id: String,
    pub overall_status: JobStatus,
    pub total_items: u64,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(batch: u32, status: JobStatus, items: u32) -> JobTrackerRecord {
        let now = Utc.timestamp_millis_opt(0).unwrap();
        JobTrackerRecord {
            job_id: "job".into(),
            batch_id: format!("batch{batch}"),
            batch_number: batch,
            subject_id: "subject".into(),
            status,
            item_count: items,
            error_detail: String::new(),
            created_at: now,
            last_updated: now,
        }
    }

    #[test]
    fn test_overall_status() {
        use JobStatus::*;
        assert_eq!(overall_status(&[record(1, Completed, 3)]), Completed);
        assert_eq!(
            overall_status(&[record(1, Completed, 3), record(2, InProgress, 3)]),
            InProgress
        );
        assert_eq!(
            overall_status(&[record(1, InProgress, 3), record(2, Failed, 3)]),
            Failed
        );
        assert_eq!(overall_status(&[]), InProgress);
    }

    #[test]
    fn test_summary_totals() {
        let summary = JobSummary::from_batches(
            "job",
            vec![
                record(1, JobStatus::Completed, 3),
                record(2, JobStatus::Completed, 3),
                record(3, JobStatus::InProgress, 3),
                record(4, JobStatus::InProgress, 1),
            ],
        );
        assert_eq!(summary.total_items, 10);
        assert_eq!(summary.completion_percent, 50);
        assert_eq!(summary.overall_status, JobStatus::InProgress);
    }

    #[test]
    fn test_transitions() {
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::InProgress));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::InProgress));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(
            serde_json::to_string(&JobStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        assert!(serde_json::from_str::<JobStatus>("\"INPROG\"").is_err());
    }
}
