//! Transfer Saga
//!
//! Moves one subject from a source owner to a destination owner across the
//! content store and the ledger:
//!
//! 1. initiate: write the record as IN_PROGRESS
//! 2. locate: resolve the subject's content key from the ledger
//! 3. copy: copy the content to `<namespace>/<destination>/<category>/<subject>`
//! 4. commit: one atomic ledger write (award or balances, plus commit marker)
//! 5. finalize: record COMPLETED
//!
//! A failed step is recorded before its error is returned. Only a commit
//! failure is compensated, by deleting the copied object. A commit that keeps
//! losing the race for a balance is retried a few times, then left
//! IN_PROGRESS for redelivery.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::TransferConfig;
use crate::content::ContentStore;
use crate::ledger::{Ledger, LedgerError, LedgerKey};

use super::commit::{build_commit, commit_marker_key, is_balance_key};
use super::db::TransferLog;
use super::error::TransferError;
use super::state::{FailureStep, TransferStatus};
use super::types::{TransferKind, TransferOutcome, TransferRecord, TransferRequest};

/// Attribute of a subject record holding its current content key
pub const CONTENT_KEY_ATTR: &str = "contentKey";

/// Commit attempts when a balance changes between read and write
const COMMIT_ATTEMPTS: u32 = 4;
const COMMIT_RETRY_DELAY: Duration = Duration::from_millis(5);

pub struct TransferSaga {
    log: Arc<dyn TransferLog>,
    ledger: Arc<dyn Ledger>,
    content: Arc<dyn ContentStore>,
    clock: Arc<dyn Clock>,
    config: TransferConfig,
}

impl TransferSaga {
    pub fn new(
        log: Arc<dyn TransferLog>,
        ledger: Arc<dyn Ledger>,
        content: Arc<dyn ContentStore>,
        clock: Arc<dyn Clock>,
        config: TransferConfig,
    ) -> Self {
        Self {
            log,
            ledger,
            content,
            clock,
            config,
        }
    }

    pub fn log(&self) -> &Arc<dyn TransferLog> {
        &self.log
    }

    /// Destination content key for a transfer
    pub fn destination_key(&self, request: &TransferRequest) -> String {
        self.content_key_for(&request.kind, &request.destination_owner, &request.subject_id)
    }

    fn content_key_for(&self, kind: &TransferKind, owner: &str, subject_id: &str) -> String {
        let category = match kind {
            TransferKind::Certificate { .. } => &self.config.certificate_category,
            TransferKind::Points { .. } => &self.config.reward_category,
        };
        format!(
            "{}/{}/{}/{}",
            self.config.content_namespace, owner, category, subject_id
        )
    }

    /// Run the saga for one dequeued request.
    ///
    /// Redelivery of a finished transfer applies nothing and reports how it
    /// ended. Redelivery of an IN_PROGRESS transfer resumes at step 2; the
    /// commit marker keeps step 4 from being applied twice.
    pub async fn execute(&self, request: &TransferRequest) -> Result<TransferOutcome, TransferError> {
        request.validate()?;

        // Step 1: initiate
        let mut record = match self.log.get(&request.transfer_id).await? {
            Some(existing) => match existing.status {
                TransferStatus::Completed => {
                    info!(transfer_id = %existing.transfer_id, "Transfer already completed, skipping");
                    return Ok(TransferOutcome::AlreadyCompleted);
                }
                TransferStatus::Failed(step) => {
                    info!(
                        transfer_id = %existing.transfer_id,
                        reason = step.as_str(),
                        "Transfer previously failed, skipping"
                    );
                    return Ok(TransferOutcome::PreviouslyFailed(step));
                }
                TransferStatus::InProgress => {
                    warn!(
                        transfer_id = %existing.transfer_id,
                        last_updated = %existing.last_updated,
                        "Resuming in-progress transfer"
                    );
                    existing
                }
            },
            None => {
                let record = TransferRecord::new(request, self.clock.now());
                self.log.create(&record).await?;
                info!(
                    transfer_id = %record.transfer_id,
                    kind = record.kind.as_str(),
                    "Transfer initiated: {} -> {}",
                    record.source_owner,
                    record.destination_owner
                );
                record
            }
        };

        // Step 2: locate
        let source_key = match self.locate(&record.subject_id).await {
            Ok(key) => key,
            Err(e) => return Err(self.fail(&mut record, e).await),
        };
        debug!(transfer_id = %record.transfer_id, source_key = %source_key, "Content located");

        // Step 3: copy. A resumed transfer follows its stored record, not the
        // redelivered body.
        let destination_key =
            self.content_key_for(&record.kind, &record.destination_owner, &record.subject_id);
        if let Err(e) = self.content.copy(&source_key, &destination_key).await {
            let err = TransferError::Copy(format!("{source_key} -> {destination_key}: {e}"));
            return Err(self.fail(&mut record, err).await);
        }
        debug!(
            transfer_id = %record.transfer_id,
            destination_key = %destination_key,
            "Content copied"
        );

        // Step 4: commit
        match self.commit(&record, &destination_key).await {
            Ok(()) => {}
            Err(e @ TransferError::CommitContention(_)) => {
                warn!(
                    transfer_id = %record.transfer_id,
                    error = %e,
                    "Commit contended, transfer left in progress for redelivery"
                );
                return Err(e);
            }
            Err(e) => {
                let err = self.fail(&mut record, e).await;
                self.compensate(&record.transfer_id, &destination_key).await;
                return Err(err);
            }
        }

        // Step 5: finalize
        record.transition(TransferStatus::Completed, "", self.clock.now())?;
        if let Err(e) = self.log.update(&record).await {
            error!(
                transfer_id = %record.transfer_id,
                error = %e,
                "Ledger committed but transfer could not be finalized"
            );
            return Err(e);
        }

        info!(
            transfer_id = %record.transfer_id,
            subject_id = %record.subject_id,
            "Transfer completed: {} -> {}",
            record.source_owner,
            record.destination_owner
        );
        Ok(TransferOutcome::Completed)
    }

    async fn locate(&self, subject_id: &str) -> Result<String, TransferError> {
        let key = LedgerKey::new(&self.config.subjects_table, subject_id);
        let subject = self
            .ledger
            .get(&key)
            .await
            .map_err(|e| TransferError::Locate(format!("{subject_id}: {e}")))?
            .ok_or_else(|| TransferError::Locate(format!("{subject_id}: no subject record")))?;

        subject
            .get(CONTENT_KEY_ATTR)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| TransferError::Locate(format!("{subject_id}: no content key")))
    }

    async fn commit(
        &self,
        record: &TransferRecord,
        destination_key: &str,
    ) -> Result<(), TransferError> {
        let marker = commit_marker_key(&self.config, &record.transfer_id);
        let marker_name = marker.to_string();
        let mut attempt = 0;
        loop {
            attempt += 1;

            let already_committed = self
                .ledger
                .get(&marker)
                .await
                .map_err(|e| TransferError::Commit(e.to_string()))?
                .is_some();
            if already_committed {
                info!(transfer_id = %record.transfer_id, "Ledger change already committed");
                return Ok(());
            }

            // Balances are re-read on every attempt
            let writes = build_commit(
                self.ledger.as_ref(),
                &self.config,
                record,
                destination_key,
                self.clock.now(),
            )
            .await?;

            match self.ledger.bulk_write(writes).await {
                Ok(()) => {
                    debug!(
                        transfer_id = %record.transfer_id,
                        attempt = attempt,
                        "Ledger change committed"
                    );
                    return Ok(());
                }
                // A lost marker race means a duplicate delivery committed; the
                // next attempt sees the marker.
                Err(LedgerError::ConditionFailed(key))
                    if is_balance_key(&self.config, &key) || key == marker_name =>
                {
                    if attempt >= COMMIT_ATTEMPTS {
                        return Err(TransferError::CommitContention(key));
                    }
                    debug!(
                        transfer_id = %record.transfer_id,
                        attempt = attempt,
                        key = %key,
                        "Balance changed during commit, retrying"
                    );
                    tokio::time::sleep(COMMIT_RETRY_DELAY * attempt).await;
                }
                Err(e) => return Err(TransferError::Commit(e.to_string())),
            }
        }
    }

    /// Record the failed step. Returns the error the caller should surface:
    /// the step error, or the log error if the failure could not be recorded.
    async fn fail(&self, record: &mut TransferRecord, err: TransferError) -> TransferError {
        let step = err.failure_step().unwrap_or(FailureStep::Commit);
        warn!(
            transfer_id = %record.transfer_id,
            reason = step.as_str(),
            error = %err,
            "Transfer step failed"
        );

        if let Err(e) = record.transition(TransferStatus::Failed(step), err.to_string(), self.clock.now()) {
            return e;
        }
        match self.log.update(record).await {
            Ok(()) => err,
            Err(log_err) => {
                error!(
                    transfer_id = %record.transfer_id,
                    error = %log_err,
                    step_error = %err,
                    "Failed to record transfer failure"
                );
                log_err
            }
        }
    }

    /// Best effort; a failure here never replaces the commit error
    async fn compensate(&self, transfer_id: &str, destination_key: &str) {
        match self.content.delete(destination_key).await {
            Ok(()) => info!(
                transfer_id = %transfer_id,
                key = %destination_key,
                "Rolled back copied content"
            ),
            Err(e) => error!(
                transfer_id = %transfer_id,
                key = %destination_key,
                error = %e,
                "Rollback failed: copied content left in place"
            ),
        }
    }
}
