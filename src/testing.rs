//! Fault-injecting wrappers around the in-memory stores
//!
//! Each wrapper delegates to the real in-memory implementation and can be
//! switched to fail specific calls. Call counters let tests assert which
//! side effects ran.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::batch::{BatchPlan, JobStatus, JobTracker, JobTrackerRecord, MemoryJobTracker, TrackerError};
use crate::content::{ContentError, ContentStore, MemoryContentStore};
use crate::ledger::{Item, Ledger, LedgerError, LedgerKey, LedgerWrite, MemoryLedger};
use crate::transfer::{MemoryTransferLog, TransferError, TransferLog, TransferRecord, TransferStatus};

// ============================================================================
// Content store
// ============================================================================

#[derive(Default)]
pub struct FlakyContentStore {
    pub inner: MemoryContentStore,
    fail_copy: AtomicBool,
    fail_delete: AtomicBool,
    copy_count: AtomicUsize,
    delete_count: AtomicUsize,
}

impl FlakyContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_copy(&self, fail: bool) {
        self.fail_copy.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn copy_count(&self) -> usize {
        self.copy_count.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.delete_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for FlakyContentStore {
    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<(), ContentError> {
        self.copy_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(ContentError::Unavailable("mock copy failure".to_string()));
        }
        self.inner.copy(src_key, dst_key).await
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), ContentError> {
        self.inner.put(key, body).await
    }

    async fn delete(&self, key: &str) -> Result<(), ContentError> {
        self.delete_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(ContentError::Unavailable("mock delete failure".to_string()));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, ContentError> {
        self.inner.exists(key).await
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Default)]
pub struct FlakyLedger {
    pub inner: MemoryLedger,
    fail_bulk_write: AtomicBool,
    bulk_write_error: Mutex<Option<LedgerError>>,
    slow_reads: AtomicBool,
    bulk_write_count: AtomicUsize,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_bulk_write(&self, fail: bool) {
        self.fail_bulk_write.store(fail, Ordering::SeqCst);
    }

    /// Fail every bulk write with `error`
    pub fn set_bulk_write_error(&self, error: Option<LedgerError>) {
        *self.bulk_write_error.lock().unwrap() = error;
    }

    /// Yield to other tasks after each read, like a store answering over the
    /// network: concurrent callers observe the same snapshot.
    pub fn set_slow_reads(&self, slow: bool) {
        self.slow_reads.store(slow, Ordering::SeqCst);
    }

    pub fn bulk_write_count(&self) -> usize {
        self.bulk_write_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn get(&self, key: &LedgerKey) -> Result<Option<Item>, LedgerError> {
        let item = self.inner.get(key).await;
        if self.slow_reads.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        item
    }

    async fn conditional_put(&self, write: LedgerWrite) -> Result<(), LedgerError> {
        self.inner.conditional_put(write).await
    }

    async fn bulk_write(&self, writes: Vec<LedgerWrite>) -> Result<(), LedgerError> {
        self.bulk_write_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_bulk_write.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("mock bulk write failure".to_string()));
        }
        let injected = self.bulk_write_error.lock().unwrap().clone();
        if let Some(e) = injected {
            return Err(e);
        }
        self.inner.bulk_write(writes).await
    }
}

// ============================================================================
// Transfer log
// ============================================================================

/// Records every status it successfully stores, in write order
#[derive(Default)]
pub struct FlakyTransferLog {
    pub inner: MemoryTransferLog,
    fail_create: AtomicBool,
    fail_updates: AtomicBool,
    fail_finalize: AtomicBool,
    history: Mutex<Vec<(String, TransferStatus)>>,
}

impl FlakyTransferLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Fail every update
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Fail only updates that write COMPLETED
    pub fn set_fail_finalize(&self, fail: bool) {
        self.fail_finalize.store(fail, Ordering::SeqCst);
    }

    pub fn statuses(&self, transfer_id: &str) -> Vec<TransferStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == transfer_id)
            .map(|(_, status)| *status)
            .collect()
    }

    fn remember(&self, record: &TransferRecord) {
        self.history
            .lock()
            .unwrap()
            .push((record.transfer_id.clone(), record.status));
    }
}

#[async_trait]
impl TransferLog for FlakyTransferLog {
    async fn create(&self, record: &TransferRecord) -> Result<(), TransferError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransferError::LogWrite("mock create failure".to_string()));
        }
        self.inner.create(record).await?;
        self.remember(record);
        Ok(())
    }

    async fn update(&self, record: &TransferRecord) -> Result<(), TransferError> {
        let finalize = record.status == TransferStatus::Completed;
        if self.fail_updates.load(Ordering::SeqCst)
            || (finalize && self.fail_finalize.load(Ordering::SeqCst))
        {
            return Err(TransferError::LogWrite("mock update failure".to_string()));
        }
        self.inner.update(record).await?;
        self.remember(record);
        Ok(())
    }

    async fn get(&self, transfer_id: &str) -> Result<Option<TransferRecord>, TransferError> {
        self.inner.get(transfer_id).await
    }

    async fn find_by_owner(&self, owner: &str) -> Result<Vec<TransferRecord>, TransferError> {
        self.inner.find_by_owner(owner).await
    }

    async fn find_stale(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        self.inner.find_stale(older_than).await
    }
}

// ============================================================================
// Job tracker
// ============================================================================

#[derive(Default)]
pub struct FlakyTracker {
    pub inner: MemoryJobTracker,
    /// Fail `record_planned` once this many calls have succeeded
    fail_planned_after: Mutex<Option<usize>>,
    fail_updates: AtomicBool,
    planned_count: AtomicUsize,
}

impl FlakyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_planned_after(&self, successes: Option<usize>) {
        *self.fail_planned_after.lock().unwrap() = successes;
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobTracker for FlakyTracker {
    async fn record_planned(
        &self,
        plan: &BatchPlan,
        now: DateTime<Utc>,
    ) -> Result<JobTrackerRecord, TrackerError> {
        let limit = *self.fail_planned_after.lock().unwrap();
        if let Some(limit) = limit
            && self.planned_count.load(Ordering::SeqCst) >= limit
        {
            return Err(TrackerError::Unavailable("mock tracker failure".to_string()));
        }
        let record = self.inner.record_planned(plan, now).await?;
        self.planned_count.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn update_status(
        &self,
        job_id: &str,
        batch_id: &str,
        status: JobStatus,
        error_detail: &str,
        now: DateTime<Utc>,
    ) -> Result<JobTrackerRecord, TrackerError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(TrackerError::Unavailable("mock tracker failure".to_string()));
        }
        self.inner
            .update_status(job_id, batch_id, status, error_detail, now)
            .await
    }

    async fn batches(&self, job_id: &str) -> Result<Vec<JobTrackerRecord>, TrackerError> {
        self.inner.batches(job_id).await
    }

    async fn batches_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<Vec<JobTrackerRecord>, TrackerError> {
        self.inner.batches_for_subject(subject_id).await
    }
}
