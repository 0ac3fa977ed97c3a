//! Job Runner
//!
//! Plans a job, then fans its batches out to [`BatchWorker`]s with bounded
//! concurrency. Each batch runs as an independent task; one failing batch
//! does not stop the others.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::clock::IdGenerator;

use super::error::{BatchError, PlanningError};
use super::planner::BatchPlanner;
use super::tracker::JobTracker;
use super::types::{BatchPlan, JobRequest, JobSummary};
use super::worker::{BatchOutcome, BatchWorker};

/// A started job
pub struct JobHandle {
    pub job_id: String,
    pub plans: Vec<BatchPlan>,
    tasks: JoinSet<Result<BatchOutcome, BatchError>>,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("plans", &self.plans.len())
            .field("running", &self.tasks.len())
            .finish()
    }
}

impl JobHandle {
    /// Wait for every batch; results arrive in completion order
    pub async fn wait(mut self) -> Vec<Result<BatchOutcome, BatchError>> {
        let mut results = Vec::with_capacity(self.plans.len());
        while let Some(joined) = self.tasks.join_next().await {
            results.push(joined.unwrap_or_else(|e| {
                error!(job_id = %self.job_id, error = %e, "Batch task aborted");
                Err(BatchError::Worker(e.to_string()))
            }));
        }
        results
    }
}

pub struct JobRunner {
    planner: BatchPlanner,
    worker: Arc<BatchWorker>,
    tracker: Arc<dyn JobTracker>,
    ids: Arc<dyn IdGenerator>,
    default_payload_type: String,
    concurrency: usize,
}

impl JobRunner {
    pub fn new(
        planner: BatchPlanner,
        worker: Arc<BatchWorker>,
        tracker: Arc<dyn JobTracker>,
        ids: Arc<dyn IdGenerator>,
        default_payload_type: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            planner,
            worker,
            tracker,
            ids,
            default_payload_type: default_payload_type.into(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn tracker(&self) -> &Arc<dyn JobTracker> {
        &self.tracker
    }

    /// Plan the job and dispatch its batches.
    ///
    /// Returns once every batch is recorded IN_PROGRESS and dispatched; the
    /// batches keep running in the background. If planning aborts part-way,
    /// nothing is dispatched and the batches already recorded are marked
    /// FAILED.
    pub async fn start(&self, request: &JobRequest) -> Result<JobHandle, PlanningError> {
        let job_id = self.ids.job_id();
        self.dispatch(job_id, request).await
    }

    /// Re-plan an existing job after a crash or failed batches.
    ///
    /// Planning is deterministic, so the same batch ids come back; batches that
    /// already COMPLETED are not dispatched again.
    pub async fn restart(
        &self,
        job_id: &str,
        request: &JobRequest,
    ) -> Result<JobHandle, PlanningError> {
        info!(job_id = %job_id, "Restarting job");
        self.dispatch(job_id.to_string(), request).await
    }

    async fn dispatch(
        &self,
        job_id: String,
        request: &JobRequest,
    ) -> Result<JobHandle, PlanningError> {
        let payload_type = request
            .category
            .as_deref()
            .unwrap_or(&self.default_payload_type);

        let plans = match self
            .planner
            .plan(&job_id, request.quantity, &request.subject_id, payload_type)
            .await
        {
            Ok(plans) => plans,
            Err(e) => {
                for plan in e.planned() {
                    self.worker
                        .mark_failed(plan, "planning aborted before dispatch")
                        .await;
                }
                return Err(e);
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for plan in plans.iter().cloned() {
            let worker = self.worker.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| BatchError::Worker(e.to_string()))?;
                worker.generate(&plan).await
            });
        }

        info!(
            job_id = %job_id,
            batches = plans.len(),
            concurrency = self.concurrency,
            "Job dispatched"
        );
        Ok(JobHandle {
            job_id,
            plans,
            tasks,
        })
    }

    /// Start a job, wait for every batch and return the derived summary
    pub async fn run_to_end(&self, request: &JobRequest) -> Result<JobSummary, BatchError> {
        let handle = self.start(request).await?;
        let job_id = handle.job_id.clone();

        let failed = handle.wait().await.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(job_id = %job_id, failed_batches = failed, "Job finished with failed batches");
        }

        Ok(self.tracker.get_status(&job_id).await?)
    }
}
