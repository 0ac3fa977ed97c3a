//! Transfer Log
//!
//! One [`TransferRecord`] per transfer id. The saga is the only writer.
//! Every update must move `last_updated` strictly forward and follow a valid
//! status transition; anything else is rejected rather than applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::error::TransferError;
use super::types::TransferRecord;

#[async_trait]
pub trait TransferLog: Send + Sync {
    /// Insert a new record; fails with `DuplicateTransfer` if the id exists
    async fn create(&self, record: &TransferRecord) -> Result<(), TransferError>;

    /// Replace an existing record with a later version of itself
    async fn update(&self, record: &TransferRecord) -> Result<(), TransferError>;

    async fn get(&self, transfer_id: &str) -> Result<Option<TransferRecord>, TransferError>;

    /// Transfers where `owner` is source or destination, newest first
    async fn find_by_owner(&self, owner: &str) -> Result<Vec<TransferRecord>, TransferError>;

    /// Non-terminal transfers not written since `older_than`, oldest first
    async fn find_stale(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<TransferRecord>, TransferError>;
}

/// In-process transfer log
#[derive(Default)]
pub struct MemoryTransferLog {
    records: DashMap<String, TransferRecord>,
}

impl MemoryTransferLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TransferLog for MemoryTransferLog {
    async fn create(&self, record: &TransferRecord) -> Result<(), TransferError> {
        match self.records.entry(record.transfer_id.clone()) {
            Entry::Occupied(_) => Err(TransferError::DuplicateTransfer(
                record.transfer_id.clone(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                debug!(transfer_id = %record.transfer_id, "Transfer record created");
                Ok(())
            }
        }
    }

    async fn update(&self, record: &TransferRecord) -> Result<(), TransferError> {
        let mut current = self
            .records
            .get_mut(&record.transfer_id)
            .ok_or_else(|| TransferError::TransferNotFound(record.transfer_id.clone()))?;

        if !current.status.can_transition_to(record.status) {
            return Err(TransferError::InvalidStatusTransition {
                from: current.status,
                to: record.status,
            });
        }
        if record.last_updated <= current.last_updated {
            return Err(TransferError::StaleWrite(record.transfer_id.clone()));
        }

        *current = record.clone();
        debug!(
            transfer_id = %record.transfer_id,
            status = %record.status,
            "Transfer record updated"
        );
        Ok(())
    }

    async fn get(&self, transfer_id: &str) -> Result<Option<TransferRecord>, TransferError> {
        Ok(self.records.get(transfer_id).map(|r| r.value().clone()))
    }

    async fn find_by_owner(&self, owner: &str) -> Result<Vec<TransferRecord>, TransferError> {
        let mut found: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| r.source_owner == owner || r.destination_owner == owner)
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(found)
    }

    async fn find_stale(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let mut found: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| !r.status.is_terminal() && r.last_updated < older_than)
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.last_updated.cmp(&b.last_updated));
        Ok(found)
    }
}
