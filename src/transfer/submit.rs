//! Transfer submission onto the queue

use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::IdGenerator;
use crate::queue::{Queue, SendOutcome};

use super::error::TransferError;
use super::types::TransferRequest;

/// Receipt for a submitted transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub transfer_id: String,
    pub outcome: SendOutcome,
}

/// Enqueues transfer requests.
///
/// The transfer id is the dedup id, and the source owner is the group id so
/// transfers out of one owner are processed one at a time.
pub struct TransferSubmitter {
    queue: Arc<dyn Queue>,
    ids: Arc<dyn IdGenerator>,
}

impl TransferSubmitter {
    pub fn new(queue: Arc<dyn Queue>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { queue, ids }
    }

    pub async fn submit(&self, mut request: TransferRequest) -> Result<Submitted, TransferError> {
        if request.transfer_id.trim().is_empty() {
            request.transfer_id = self.ids.transfer_id();
            debug!(transfer_id = %request.transfer_id, "Generated transfer id");
        }
        request.validate()?;

        let body = serde_json::to_string(&request)
            .map_err(|e| TransferError::MalformedMessage(e.to_string()))?;
        let outcome = self
            .queue
            .send(body, &request.transfer_id, &request.source_owner)
            .await
            .map_err(|e| TransferError::Queue(e.to_string()))?;

        info!(
            transfer_id = %request.transfer_id,
            group_id = %request.source_owner,
            outcome = ?outcome,
            "Transfer submitted"
        );
        Ok(Submitted {
            transfer_id: request.transfer_id,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SequentialIds;
    use crate::queue::MemoryQueue;

    #[tokio::test]
    async fn test_submit_generates_missing_id() {
        let queue = Arc::new(MemoryQueue::new(3));
        let submitter = TransferSubmitter::new(queue.clone(), Arc::new(SequentialIds::new("s")));

        let submitted = submitter
            .submit(TransferRequest::certificate("", "c1", "admin", "bob", "n"))
            .await
            .unwrap();
        assert_eq!(submitted.transfer_id, "s-tx-0");
        assert_eq!(submitted.outcome, SendOutcome::Enqueued);

        let delivered = queue.receive(1).await.unwrap().remove(0);
        assert_eq!(delivered.dedup_id, "s-tx-0");
        assert_eq!(delivered.group_id, "admin");
        let body: TransferRequest = serde_json::from_str(&delivered.body).unwrap();
        assert_eq!(body.transfer_id, "s-tx-0");
    }

    #[tokio::test]
    async fn test_resubmit_same_id_is_deduplicated() {
        let queue = Arc::new(MemoryQueue::new(3));
        let submitter = TransferSubmitter::new(queue.clone(), Arc::new(SequentialIds::new("s")));
        let req = TransferRequest::points("tx-1", "rb", "alice", "bob", "RD02", 5);

        submitter.submit(req.clone()).await.unwrap();
        let again = submitter.submit(req).await.unwrap();
        assert_eq!(again.outcome, SendOutcome::Deduplicated);
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid() {
        let queue = Arc::new(MemoryQueue::new(3));
        let submitter = TransferSubmitter::new(queue.clone(), Arc::new(SequentialIds::new("s")));

        let err = submitter
            .submit(TransferRequest::points("", "rb", "alice", "alice", "RD00", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest(_)));
        assert_eq!(queue.pending(), 0);
    }
}
