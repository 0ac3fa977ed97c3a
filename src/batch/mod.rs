//! Bulk Item Creation
//!
//! Splits an "issue N items" request into bounded batches, generates each
//! batch independently and tracks every batch so a caller can poll a job.
//!
//! ```text
//! JobRunner ──▶ BatchPlanner ──record IN_PROGRESS──▶ JobTracker
//!     │                                                  ▲
//!     └──spawn──▶ BatchWorker ──bulk write──▶ Ledger     │
//!                     └──────────COMPLETED / FAILED──────┘
//! ```

pub mod error;
pub mod planner;
pub mod runner;
pub mod tracker;
pub mod types;
pub mod worker;


pub use error::{BatchError, PlanningError, TrackerError};
pub use planner::{BatchPlanner, plan_batches};
pub use runner::{JobHandle, JobRunner};
pub use tracker::{JobTracker, MemoryJobTracker};
pub use types::{
    BatchPlan, JobHistoryEntry, JobRequest, JobStatus, JobSummary, JobTrackerRecord,
};
pub use worker::{BatchOutcome, BatchWorker};
