//! Job Tracker
//!
//! One record per (job id, batch id). Job-level status is never stored; it is
//! derived from the batch records on every query.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::error::TrackerError;
use super::types::{
    BatchPlan, JobHistoryEntry, JobStatus, JobSummary, JobTrackerRecord, overall_status,
};

#[async_trait]
pub trait JobTracker: Send + Sync {
    /// Create or refresh the record for a planned batch as IN_PROGRESS.
    /// A batch that already COMPLETED is returned unchanged.
    async fn record_planned(
        &self,
        plan: &BatchPlan,
        now: DateTime<Utc>,
    ) -> Result<JobTrackerRecord, TrackerError>;

    async fn update_status(
        &self,
        job_id: &str,
        batch_id: &str,
        status: JobStatus,
        error_detail: &str,
        now: DateTime<Utc>,
    ) -> Result<JobTrackerRecord, TrackerError>;

    /// Batches of a job ordered by batch number; empty for an unknown job
    async fn batches(&self, job_id: &str) -> Result<Vec<JobTrackerRecord>, TrackerError>;

    async fn batches_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<Vec<JobTrackerRecord>, TrackerError>;

    /// Derived job status
    async fn get_status(&self, job_id: &str) -> Result<JobSummary, TrackerError> {
        let batches = self.batches(job_id).await?;
        if batches.is_empty() {
            return Err(TrackerError::JobNotFound(job_id.to_string()));
        }
        Ok(JobSummary::from_batches(job_id, batches))
    }

    /// One entry per job that created items for `subject_id`, oldest first
    async fn history_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<Vec<JobHistoryEntry>, TrackerError> {
        let mut by_job: BTreeMap<String, Vec<JobTrackerRecord>> = BTreeMap::new();
        for record in self.batches_for_subject(subject_id).await? {
            by_job.entry(record.job_id.clone()).or_default().push(record);
        }

        let mut history: Vec<JobHistoryEntry> = by_job
            .into_iter()
            .filter_map(|(job_id, batches)| {
                let started_at = batches.iter().map(|b| b.created_at).min()?;
                Some(JobHistoryEntry {
                    overall_status: overall_status(&batches),
                    total_items: batches.iter().map(|b| u64::from(b.item_count)).sum(),
                    started_at,
                    job_id,
                })
            })
            .collect();
        history.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(history)
    }
}

/// In-process job tracker
#[derive(Default)]
pub struct MemoryJobTracker {
    records: DashMap<(String, String), JobTrackerRecord>,
}

impl MemoryJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn sorted(&self, filter: impl Fn(&JobTrackerRecord) -> bool) -> Vec<JobTrackerRecord> {
        let mut found: Vec<JobTrackerRecord> = self
            .records
            .iter()
            .filter(|r| filter(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| {
            a.job_id
                .cmp(&b.job_id)
                .then_with(|| a.batch_number.cmp(&b.batch_number))
        });
        found
    }
}

#[async_trait]
impl JobTracker for MemoryJobTracker {
    async fn record_planned(
        &self,
        plan: &BatchPlan,
        now: DateTime<Utc>,
    ) -> Result<JobTrackerRecord, TrackerError> {
        let key = (plan.job_id.clone(), plan.batch_id.clone());
        match self.records.entry(key) {
            Entry::Vacant(slot) => {
                let record = JobTrackerRecord::in_progress(plan, now);
                slot.insert(record.clone());
                Ok(record)
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if record.status == JobStatus::Completed {
                    debug!(job_id = %plan.job_id, batch_id = %plan.batch_id, "Batch already completed");
                    return Ok(record.clone());
                }
                if !record.status.can_transition_to(JobStatus::InProgress) {
                    return Err(TrackerError::InvalidTransition {
                        batch_id: plan.batch_id.clone(),
                        from: record.status,
                        to: JobStatus::InProgress,
                    });
                }
                record.status = JobStatus::InProgress;
                record.item_count = plan.item_count;
                record.error_detail.clear();
                record.last_updated = now;
                Ok(record.clone())
            }
        }
    }

    async fn update_status(
        &self,
        job_id: &str,
        batch_id: &str,
        status: JobStatus,
        error_detail: &str,
        now: DateTime<Utc>,
    ) -> Result<JobTrackerRecord, TrackerError> {
        let key = (job_id.to_string(), batch_id.to_string());
        let mut record = self
            .records
            .get_mut(&key)
            .ok_or_else(|| TrackerError::BatchNotFound {
                job_id: job_id.to_string(),
                batch_id: batch_id.to_string(),
            })?;

        if !record.status.can_transition_to(status) {
            return Err(TrackerError::InvalidTransition {
                batch_id: batch_id.to_string(),
                from: record.status,
                to: status,
            });
        }
        record.status = status;
        record.error_detail = error_detail.to_string();
        record.last_updated = now;
        debug!(job_id = %job_id, batch_id = %batch_id, status = %status, "Batch status updated");
        Ok(record.clone())
    }

    async fn batches(&self, job_id: &str) -> Result<Vec<JobTrackerRecord>, TrackerError> {
        Ok(self.sorted(|r| r.job_id == job_id))
    }

    async fn batches_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<Vec<JobTrackerRecord>, TrackerError> {
        Ok(self.sorted(|r| r.subject_id == subject_id))
    }
}
