//! Batch Planner
//!
//! Splits a requested quantity into batches of at most `max_batch_size`.
//! The split depends only on its inputs, so re-planning a job after a crash
//! yields the same batch ids and sizes.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::clock::Clock;

use super::error::PlanningError;
use super::tracker::JobTracker;
use super::types::{BatchPlan, JobStatus};

pub fn plan_batches(
    job_id: &str,
    total_quantity: u32,
    max_batch_size: u32,
    subject_id: &str,
    payload_type: &str,
    item_prefix: &str,
) -> Result<Vec<BatchPlan>, PlanningError> {
    if total_quantity == 0 {
        return Err(PlanningError::InvalidInput(
            "quantity must be greater than zero".to_string(),
        ));
    }
    if max_batch_size == 0 {
        return Err(PlanningError::InvalidInput(
            "max batch size must be greater than zero".to_string(),
        ));
    }
    if job_id.is_empty() || subject_id.is_empty() {
        return Err(PlanningError::InvalidInput(
            "job id and subject id are required".to_string(),
        ));
    }

    let num_batches = total_quantity.div_ceil(max_batch_size);
    let mut plans = Vec::with_capacity(num_batches as usize);
    let mut remaining = total_quantity;

    for batch_number in 1..=num_batches {
        let item_count = remaining.min(max_batch_size);
        plans.push(BatchPlan {
            job_id: job_id.to_string(),
            batch_id: format!("batch{batch_number}"),
            batch_number,
            item_count,
            item_prefix: item_prefix.to_string(),
            payload_type: payload_type.to_string(),
            subject_id: subject_id.to_string(),
        });
        remaining -= item_count;
    }

    Ok(plans)
}

pub struct BatchPlanner {
    tracker: Arc<dyn JobTracker>,
    clock: Arc<dyn Clock>,
    max_batch_size: u32,
    item_prefix: String,
}

impl BatchPlanner {
    pub fn new(
        tracker: Arc<dyn JobTracker>,
        clock: Arc<dyn Clock>,
        max_batch_size: u32,
        item_prefix: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            clock,
            max_batch_size,
            item_prefix: item_prefix.into(),
        }
    }

    /// Plan a job and record every batch as IN_PROGRESS before returning.
    ///
    /// Returns the batches to dispatch. Re-planning a job id leaves out the
    /// batches that already COMPLETED. If a tracker write fails, later batches
    /// are not recorded and the error carries the batches that were.
    pub async fn plan(
        &self,
        job_id: &str,
        total_quantity: u32,
        subject_id: &str,
        payload_type: &str,
    ) -> Result<Vec<BatchPlan>, PlanningError> {
        let plans = plan_batches(
            job_id,
            total_quantity,
            self.max_batch_size,
            subject_id,
            payload_type,
            &self.item_prefix,
        )?;

        let mut recorded = Vec::with_capacity(plans.len());
        let mut completed = 0usize;
        for plan in plans {
            match self.tracker.record_planned(&plan, self.clock.now()).await {
                Ok(record) if record.status == JobStatus::Completed => {
                    debug!(
                        job_id = %job_id,
                        batch_id = %plan.batch_id,
                        "Batch already completed, not dispatched"
                    );
                    completed += 1;
                    continue;
                }
                Ok(_) => {}
                Err(source) => {
                    error!(
                        job_id = %job_id,
                        batch_id = %plan.batch_id,
                        recorded = recorded.len(),
                        error = %source,
                        "Tracker write failed, planning aborted"
                    );
                    return Err(PlanningError::Tracker {
                        planned: recorded,
                        source,
                    });
                }
            }
            debug!(
                job_id = %job_id,
                batch_id = %plan.batch_id,
                item_count = plan.item_count,
                "Batch planned"
            );
            recorded.push(plan);
        }

        info!(
            job_id = %job_id,
            subject_id = %subject_id,
            total_quantity = total_quantity,
            batches = recorded.len(),
            already_completed = completed,
            "Job planned"
        );
        Ok(recorded)
    }
}
