//! Reward Transfer - queue-driven transfer saga and bulk item creation
//!
//! # Modules
//!
//! - [`transfer`] - Transfer saga, transfer log, queue submitter and consumer
//! - [`batch`] - Batch planner, batch workers, job tracker and runner
//! - [`ledger`] - Ledger capability (conditional and bulk writes)
//! - [`content`] - Content store capability (copy, put, delete)
//! - [`queue`] - FIFO-group queue capability with dedup and dead letters
//! - [`clock`] - Injected time and id sources
//! - [`config`] - YAML configuration
//! - [`logging`] - Tracing subscriber setup

// Capabilities consumed by the core
pub mod clock;
pub mod content;
pub mod ledger;
pub mod queue;

// Core
pub mod batch;
pub mod transfer;

// Ambient
pub mod config;
pub mod logging;

#[cfg(test)]
pub(crate) mod testing;

// Convenient re-exports at crate root
pub use batch::{JobRunner, JobStatus, JobSummary, JobTracker};
pub use clock::{Clock, IdGenerator, MonotonicClock, RandomIds};
pub use config::AppConfig;
pub use content::{ContentStore, MemoryContentStore};
pub use ledger::{Ledger, LedgerKey, MemoryLedger};
pub use queue::{MemoryQueue, Queue};
pub use transfer::{TransferRequest, TransferSaga, TransferStatus};
