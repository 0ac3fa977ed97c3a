//! Batch Worker
//!
//! Generates the items of one batch and writes them to the ledger in a single
//! bulk write. Item ids are `<prefix><subject id><numeric suffix>`; suffix
//! collisions are not checked up front, the ledger's `NotExists` precondition
//! rejects them and the whole batch fails.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::clock::{Clock, IdGenerator, format_timestamp};
use crate::ledger::{Item, Ledger, LedgerKey, LedgerWrite, Precondition};

use super::error::{BatchError, TrackerError};
use super::tracker::JobTracker;
use super::types::{BatchPlan, JobStatus};

/// Items written by a successful batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub job_id: String,
    pub batch_id: String,
    /// Empty when the batch had already completed
    pub item_ids: Vec<String>,
    pub already_completed: bool,
}

pub struct BatchWorker {
    ledger: Arc<dyn Ledger>,
    tracker: Arc<dyn JobTracker>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    items_table: String,
    suffix_digits: usize,
}

impl BatchWorker {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        tracker: Arc<dyn JobTracker>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        items_table: impl Into<String>,
        suffix_digits: usize,
    ) -> Self {
        Self {
            ledger,
            tracker,
            ids,
            clock,
            items_table: items_table.into(),
            suffix_digits,
        }
    }

    /// Generate and write every item of `plan`, then mark the batch
    /// COMPLETED. Any failure marks it FAILED and is returned; nothing is
    /// retried here.
    ///
    /// The batch is moved to IN_PROGRESS before anything is written. A batch
    /// that already COMPLETED is skipped, so redelivering it never writes a
    /// second set of items; a FAILED batch is retried as a whole.
    pub async fn generate(&self, plan: &BatchPlan) -> Result<BatchOutcome, BatchError> {
        if let Some(done) = self.claim(plan).await? {
            return Ok(done);
        }

        match self.write_items(plan).await {
            Ok(item_ids) => {
                self.tracker
                    .update_status(
                        &plan.job_id,
                        &plan.batch_id,
                        JobStatus::Completed,
                        "",
                        self.clock.now(),
                    )
                    .await?;
                info!(
                    job_id = %plan.job_id,
                    batch_id = %plan.batch_id,
                    items = item_ids.len(),
                    "Batch completed"
                );
                Ok(BatchOutcome {
                    job_id: plan.job_id.clone(),
                    batch_id: plan.batch_id.clone(),
                    item_ids,
                    already_completed: false,
                })
            }
            Err(e) => {
                warn!(
                    job_id = %plan.job_id,
                    batch_id = %plan.batch_id,
                    code = e.code(),
                    error = %e,
                    "Batch failed"
                );
                self.mark_failed(plan, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Move the batch to IN_PROGRESS. Returns the outcome to report when the
    /// batch already completed and must not run again.
    async fn claim(&self, plan: &BatchPlan) -> Result<Option<BatchOutcome>, BatchError> {
        let claimed = self
            .tracker
            .update_status(
                &plan.job_id,
                &plan.batch_id,
                JobStatus::InProgress,
                "",
                self.clock.now(),
            )
            .await;

        match claimed {
            Ok(_) => Ok(None),
            Err(TrackerError::InvalidTransition {
                from: JobStatus::Completed,
                ..
            }) => {
                info!(
                    job_id = %plan.job_id,
                    batch_id = %plan.batch_id,
                    "Batch already completed, skipping"
                );
                Ok(Some(BatchOutcome {
                    job_id: plan.job_id.clone(),
                    batch_id: plan.batch_id.clone(),
                    item_ids: Vec::new(),
                    already_completed: true,
                }))
            }
            Err(e) => {
                warn!(
                    job_id = %plan.job_id,
                    batch_id = %plan.batch_id,
                    code = e.code(),
                    error = %e,
                    "Batch could not be claimed, nothing written"
                );
                Err(e.into())
            }
        }
    }

    /// Best effort; the original batch error is what the caller sees
    pub async fn mark_failed(&self, plan: &BatchPlan, detail: &str) {
        if let Err(e) = self
            .tracker
            .update_status(
                &plan.job_id,
                &plan.batch_id,
                JobStatus::Failed,
                detail,
                self.clock.now(),
            )
            .await
        {
            error!(
                job_id = %plan.job_id,
                batch_id = %plan.batch_id,
                error = %e,
                "Could not mark batch failed"
            );
        }
    }

    async fn write_items(&self, plan: &BatchPlan) -> Result<Vec<String>, BatchError> {
        if plan.item_count == 0 {
            return Err(BatchError::InvalidPlan(format!(
                "{}/{} has no items",
                plan.job_id, plan.batch_id
            )));
        }

        let created_at = format_timestamp(&self.clock.now());
        let mut item_ids = Vec::with_capacity(plan.item_count as usize);
        let mut writes = Vec::with_capacity(plan.item_count as usize);

        for _ in 0..plan.item_count {
            let item_id = format!(
                "{}{}{}",
                plan.item_prefix,
                plan.subject_id,
                self.ids.numeric_suffix(self.suffix_digits)
            );
            writes.push(LedgerWrite::new(
                LedgerKey::new(&self.items_table, &item_id),
                item_body(plan, &item_id, &created_at),
                Precondition::NotExists,
            ));
            item_ids.push(item_id);
        }

        self.ledger.bulk_write(writes).await?;
        Ok(item_ids)
    }
}

fn item_body(plan: &BatchPlan, item_id: &str, created_at: &str) -> Item {
    match json!({
        "itemId": item_id,
        "jobId": plan.job_id,
        "batchId": plan.batch_id,
        "subjectId": plan.subject_id,
        "payloadType": plan.payload_type,
        "status": "CREATED",
        "createdAt": created_at,
    }) {
        Value::Object(map) => map,
        _ => Item::new(),
    }
}
