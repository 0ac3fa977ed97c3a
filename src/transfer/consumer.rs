//! Queue consumer driving the transfer saga
//!
//! Each received message is handled on its own: one failing message never
//! causes the rest of its batch to be redelivered.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::queue::{Queue, QueueError, QueueMessage};

use super::error::TransferError;
use super::saga::TransferSaga;
use super::types::{TransferOutcome, TransferRequest};

/// What happened to one message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageDisposition {
    /// Saga ran to completion
    Completed,
    /// Redelivery of a finished transfer; acked without side effects
    Duplicate(TransferOutcome),
    /// Failure recorded in the transfer log; acked
    Failed(TransferError),
    /// Handed back to the queue for another attempt (or the dead-letter list)
    Redelivered(TransferError),
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub received: usize,
    pub completed: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub redelivered: usize,
}

impl BatchReport {
    fn record(&mut self, disposition: &MessageDisposition) {
        self.received += 1;
        match disposition {
            MessageDisposition::Completed => self.completed += 1,
            MessageDisposition::Duplicate(_) => self.duplicates += 1,
            MessageDisposition::Failed(_) => self.failed += 1,
            MessageDisposition::Redelivered(_) => self.redelivered += 1,
        }
    }

    pub fn merge(&mut self, other: &BatchReport) {
        self.received += other.received;
        self.completed += other.completed;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
        self.redelivered += other.redelivered;
    }
}

/// Whether a failed message goes back on the queue.
///
/// Retryable errors get another attempt. Undecodable or invalid requests are
/// also handed back so the queue's redrive policy dead-letters them instead of
/// dropping them silently.
fn should_redeliver(err: &TransferError) -> bool {
    err.is_retryable()
        || matches!(
            err,
            TransferError::MalformedMessage(_) | TransferError::InvalidRequest(_)
        )
}

pub struct TransferConsumer {
    queue: Arc<dyn Queue>,
    saga: Arc<TransferSaga>,
    batch_size: usize,
    poll_interval: Duration,
}

impl TransferConsumer {
    pub fn new(
        queue: Arc<dyn Queue>,
        saga: Arc<TransferSaga>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            saga,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// Receive one batch and handle every message in it
    pub async fn process_batch(&self) -> Result<BatchReport, QueueError> {
        let messages = self.queue.receive(self.batch_size).await?;
        let mut report = BatchReport::default();
        if messages.is_empty() {
            return Ok(report);
        }
        debug!(count = messages.len(), "Received transfer messages");

        // At most one message per group is in a batch, so these never touch
        // the same source owner.
        let dispositions = join_all(messages.into_iter().map(|m| self.handle(m))).await;
        for disposition in dispositions {
            report.record(&disposition?);
        }
        Ok(report)
    }

    async fn handle(&self, message: QueueMessage) -> Result<MessageDisposition, QueueError> {
        let result = match serde_json::from_str::<TransferRequest>(&message.body) {
            Ok(request) => self.saga.execute(&request).await,
            Err(e) => Err(TransferError::MalformedMessage(e.to_string())),
        };

        let disposition = match result {
            Ok(TransferOutcome::Completed) => MessageDisposition::Completed,
            Ok(outcome) => MessageDisposition::Duplicate(outcome),
            Err(e) if should_redeliver(&e) => {
                warn!(
                    dedup_id = %message.dedup_id,
                    receive_count = message.receive_count,
                    code = e.code(),
                    error = %e,
                    "Transfer message will be redelivered"
                );
                MessageDisposition::Redelivered(e)
            }
            Err(e) => {
                info!(
                    dedup_id = %message.dedup_id,
                    code = e.code(),
                    "Transfer failed and was recorded"
                );
                MessageDisposition::Failed(e)
            }
        };

        match disposition {
            MessageDisposition::Redelivered(_) => self.queue.nack(message.receipt).await?,
            _ => self.queue.ack(message.receipt).await?,
        }
        Ok(disposition)
    }

    /// Process batches until the queue has nothing left to deliver
    pub async fn run_until_idle(&self) -> Result<BatchReport, QueueError> {
        let mut total = BatchReport::default();
        loop {
            let report = self.process_batch().await?;
            if report.received == 0 {
                return Ok(total);
            }
            total.merge(&report);
        }
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting transfer consumer"
        );

        while !*shutdown.borrow() {
            let idle = match self.process_batch().await {
                Ok(report) => report.received == 0,
                Err(e) => {
                    error!(code = e.code(), error = %e, "Transfer queue receive failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        info!("Transfer consumer stopped");
    }
}
