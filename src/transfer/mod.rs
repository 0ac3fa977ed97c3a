//! Transfer Saga
//!
//! Moves a certificate or a bundle of reward points from one owner to another
//! across two independently failing stores: the content store (artwork) and
//! the ledger (ownership and balances).
//!
//! # Flow
//!
//! ```text
//! TransferSubmitter ──send──▶ Queue ──receive──▶ TransferConsumer ──▶ TransferSaga
//!                  dedup = transfer id                              │
//!                  group = source owner                             ▼
//!                                                             TransferLog
//! ```
//!
//! # State Machine
//!
//! ```text
//! IN_PROGRESS ──▶ COMPLETED
//!      │
//!      └──────▶ FAILED_LOCATE | FAILED_COPY | FAILED_COMMIT
//! ```
//!
//! # Invariants
//!
//! 1. **Record-Before-Return**: a failed step is written to the log before its error is returned
//! 2. **Commit Once**: the ledger commit carries a per-transfer marker inserted with `NotExists`
//! 3. **No Regression**: terminal records are never rewritten; `last_updated` strictly increases
//! 4. **Compensate Commit Only**: only a commit failure deletes the copied content

pub mod commit;
pub mod consumer;
pub mod db;
pub mod error;
pub mod saga;
pub mod state;
pub mod submit;
pub mod types;
pub mod worker;


pub use consumer::{BatchReport, MessageDisposition, TransferConsumer};
pub use db::{MemoryTransferLog, TransferLog};
pub use error::TransferError;
pub use saga::TransferSaga;
pub use state::{FailureStep, TransferStatus};
pub use submit::{Submitted, TransferSubmitter};
pub use types::{TransferKind, TransferOutcome, TransferRecord, TransferRequest};
pub use worker::{ScannerConfig, StaleTransferScanner};
