//! Message queue capability
//!
//! At-least-once delivery with FIFO-group semantics:
//! - messages sharing a `group_id` are delivered one at a time, in send order
//! - a second send with an already-seen `dedup_id` is dropped
//! - a message that is nacked too often moves to the dead-letter list

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Unknown receipt: {0}")]
    UnknownReceipt(Uuid),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::UnknownReceipt(_) => "UNKNOWN_RECEIPT",
            QueueError::Unavailable(_) => "QUEUE_UNAVAILABLE",
        }
    }
}

/// Result of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Enqueued,
    /// Same dedup id was sent before; nothing enqueued
    Deduplicated,
}

/// A delivered message; `receipt` identifies this delivery for ack/nack
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt: Uuid,
    pub body: String,
    pub dedup_id: String,
    pub group_id: String,
    /// How many times this message has been delivered, including this one
    pub receive_count: u32,
}

#[async_trait]
pub trait Queue: Send + Sync {
    async fn send(
        &self,
        body: String,
        dedup_id: &str,
        group_id: &str,
    ) -> Result<SendOutcome, QueueError>;

    /// Receive up to `max` messages, at most one per group
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Processing succeeded; remove the message
    async fn ack(&self, receipt: Uuid) -> Result<(), QueueError>;

    /// Processing failed; make the message visible again (front of its group)
    async fn nack(&self, receipt: Uuid) -> Result<(), QueueError>;
}

#[derive(Debug, Clone)]
struct StoredMessage {
    body: String,
    dedup_id: String,
    group_id: String,
    receive_count: u32,
}

#[derive(Default)]
struct QueueState {
    seen_dedup_ids: HashSet<String>,
    groups: BTreeMap<String, VecDeque<StoredMessage>>,
    in_flight: HashMap<Uuid, StoredMessage>,
    busy_groups: HashSet<String>,
    dead_letters: Vec<StoredMessage>,
}

/// In-process FIFO queue
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    max_receive_count: u32,
}

impl MemoryQueue {
    pub fn new(max_receive_count: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_receive_count: max_receive_count.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))
    }

    /// Messages waiting for delivery (not counting in-flight ones)
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.groups.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Bodies of messages that exhausted their receive budget
    pub fn dead_letters(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.dead_letters.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn send(
        &self,
        body: String,
        dedup_id: &str,
        group_id: &str,
    ) -> Result<SendOutcome, QueueError> {
        let mut state = self.lock()?;
        if !state.seen_dedup_ids.insert(dedup_id.to_string()) {
            debug!(dedup_id = dedup_id, "Duplicate send dropped");
            return Ok(SendOutcome::Deduplicated);
        }

        state
            .groups
            .entry(group_id.to_string())
            .or_default()
            .push_back(StoredMessage {
                body,
                dedup_id: dedup_id.to_string(),
                group_id: group_id.to_string(),
                receive_count: 0,
            });
        Ok(SendOutcome::Enqueued)
    }

    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.lock()?;
        let QueueState {
            groups,
            in_flight,
            busy_groups,
            ..
        } = &mut *state;

        let mut delivered = Vec::new();
        for (group_id, messages) in groups.iter_mut() {
            if delivered.len() >= max {
                break;
            }
            if busy_groups.contains(group_id) {
                continue;
            }
            let Some(mut message) = messages.pop_front() else {
                continue;
            };

            message.receive_count += 1;
            let receipt = Uuid::new_v4();
            busy_groups.insert(group_id.clone());
            delivered.push(QueueMessage {
                receipt,
                body: message.body.clone(),
                dedup_id: message.dedup_id.clone(),
                group_id: message.group_id.clone(),
                receive_count: message.receive_count,
            });
            in_flight.insert(receipt, message);
        }

        groups.retain(|_, messages| !messages.is_empty());
        Ok(delivered)
    }

    async fn ack(&self, receipt: Uuid) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let message = state
            .in_flight
            .remove(&receipt)
            .ok_or(QueueError::UnknownReceipt(receipt))?;
        state.busy_groups.remove(&message.group_id);
        Ok(())
    }

    async fn nack(&self, receipt: Uuid) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let message = state
            .in_flight
            .remove(&receipt)
            .ok_or(QueueError::UnknownReceipt(receipt))?;
        state.busy_groups.remove(&message.group_id);

        if message.receive_count >= self.max_receive_count {
            warn!(
                dedup_id = %message.dedup_id,
                group_id = %message.group_id,
                receive_count = message.receive_count,
                "Message moved to dead-letter list"
            );
            state.dead_letters.push(message);
        } else {
            state
                .groups
                .entry(message.group_id.clone())
                .or_default()
                .push_front(message);
        }
        Ok(())
    }
}
