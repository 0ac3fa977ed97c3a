//! Transfer saga through the public API
//!
//! Failures here come from missing data rather than injected faults: an
//! unknown subject, absent source content, an empty balance.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use reward_transfer::clock::{MonotonicClock, SequentialIds};
use reward_transfer::config::TransferConfig;
use reward_transfer::content::{ContentStore, MemoryContentStore};
use reward_transfer::ledger::{LedgerKey, MemoryLedger};
use reward_transfer::queue::{MemoryQueue, Queue};
use reward_transfer::transfer::commit::{award_key, balance_item, balance_key};
use reward_transfer::transfer::{
    FailureStep, MemoryTransferLog, TransferConsumer, TransferError, TransferLog, TransferOutcome,
    TransferRequest, TransferSaga, TransferStatus, TransferSubmitter,
};

struct Stores {
    config: TransferConfig,
    ledger: Arc<MemoryLedger>,
    content: Arc<MemoryContentStore>,
    log: Arc<MemoryTransferLog>,
    saga: Arc<TransferSaga>,
}

async fn stores() -> Stores {
    let config = TransferConfig::default();
    let ledger = Arc::new(MemoryLedger::new());
    let content = Arc::new(MemoryContentStore::new());
    let log = Arc::new(MemoryTransferLog::new());

    // "ghost" is a subject whose source object was never uploaded
    for subject in ["cert-1", "rb-1", "ghost"] {
        let source_key = format!("templates/{subject}.png");
        let item = json!({ "contentKey": source_key });
        ledger.insert(
            LedgerKey::new(&config.subjects_table, subject),
            item.as_object().cloned().unwrap_or_default(),
        );
        if subject != "ghost" {
            content.put(&source_key, b"art".to_vec()).await.unwrap();
        }
    }
    ledger.insert(
        balance_key(&config, "alice", "RD02"),
        balance_item("alice", "RD02", 50),
    );

    let saga = Arc::new(TransferSaga::new(
        log.clone(),
        ledger.clone(),
        content.clone(),
        Arc::new(MonotonicClock::new()),
        config.clone(),
    ));

    Stores {
        config,
        ledger,
        content,
        log,
        saga,
    }
}

impl Stores {
    fn balance(&self, owner: &str) -> Option<u64> {
        self.ledger
            .item(&balance_key(&self.config, owner, "RD02"))
            .and_then(|i| i["balance"].as_u64())
    }

    async fn status(&self, transfer_id: &str) -> TransferStatus {
        self.log.get(transfer_id).await.unwrap().unwrap().status
    }
}

#[tokio::test]
async fn certificate_lands_under_destination_owner() {
    let s = stores().await;
    let request = TransferRequest::certificate("tx-1", "cert-1", "admin", "bob", "First Aid")
        .with_criteria("completed course")
        .with_message("well done");

    let outcome = s.saga.execute(&request).await.unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    assert_eq!(s.saga.destination_key(&request), "users/bob/certificates/cert-1");
    assert_eq!(
        s.content.object("users/bob/certificates/cert-1"),
        Some(b"art".to_vec())
    );
    assert!(s.ledger.item(&award_key(&s.config, "bob", "cert-1")).is_some());

    let record = s.log.get("tx-1").await.unwrap().unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(record.criteria, "completed course");
    assert!(record.error_detail.is_empty());
}

#[tokio::test]
async fn points_move_between_balances() {
    let s = stores().await;
    let request = TransferRequest::points("tx-2", "rb-1", "alice", "carol", "RD02", 20);

    s.saga.execute(&request).await.unwrap();

    assert_eq!(s.balance("alice"), Some(30));
    assert_eq!(s.balance("carol"), Some(20));
    assert!(s.content.object("users/carol/rewards/rb-1").is_some());
}

#[tokio::test]
async fn unknown_subject_fails_at_locate() {
    let s = stores().await;
    let request = TransferRequest::certificate("tx-3", "missing", "admin", "bob", "Nope");

    let err = s.saga.execute(&request).await.unwrap_err();

    assert_eq!(err.failure_step(), Some(FailureStep::Locate));
    assert_eq!(s.status("tx-3").await, TransferStatus::Failed(FailureStep::Locate));
    assert!(!s.content.exists("users/bob/certificates/missing").await.unwrap());
}

#[tokio::test]
async fn absent_source_object_fails_at_copy() {
    let s = stores().await;
    let request = TransferRequest::certificate("tx-4", "ghost", "admin", "bob", "Ghost");

    let err = s.saga.execute(&request).await.unwrap_err();

    assert!(matches!(err, TransferError::Copy(_)));
    let record = s.log.get("tx-4").await.unwrap().unwrap();
    assert_eq!(record.reason(), Some("copy"));
    assert!(!record.error_detail.is_empty());
}

#[tokio::test]
async fn overdrawn_points_roll_back_the_copy() {
    let s = stores().await;
    let request = TransferRequest::points("tx-5", "rb-1", "alice", "carol", "RD02", 51);

    let err = s.saga.execute(&request).await.unwrap_err();

    assert!(matches!(err, TransferError::Commit(_)));
    assert_eq!(s.status("tx-5").await, TransferStatus::Failed(FailureStep::Commit));
    assert_eq!(s.balance("alice"), Some(50));
    assert_eq!(s.balance("carol"), None);
    assert!(s.content.object("users/carol/rewards/rb-1").is_none());
}

#[tokio::test]
async fn redelivery_never_applies_twice() {
    let s = stores().await;
    let ok = TransferRequest::points("tx-6", "rb-1", "alice", "carol", "RD02", 10);
    let bad = TransferRequest::certificate("tx-7", "missing", "admin", "bob", "Nope");

    s.saga.execute(&ok).await.unwrap();
    s.saga.execute(&bad).await.unwrap_err();

    assert_eq!(
        s.saga.execute(&ok).await.unwrap(),
        TransferOutcome::AlreadyCompleted
    );
    assert_eq!(
        s.saga.execute(&bad).await.unwrap(),
        TransferOutcome::PreviouslyFailed(FailureStep::Locate)
    );
    assert_eq!(s.balance("alice"), Some(40));
    assert_eq!(s.balance("carol"), Some(10));
}

#[tokio::test]
async fn owner_history_is_newest_first() {
    let s = stores().await;
    s.saga
        .execute(&TransferRequest::points("tx-a", "rb-1", "alice", "carol", "RD02", 1))
        .await
        .unwrap();
    s.saga
        .execute(&TransferRequest::certificate("tx-b", "cert-1", "admin", "carol", "Cert"))
        .await
        .unwrap();

    let history = s.log.find_by_owner("carol").await.unwrap();
    let ids: Vec<_> = history.iter().map(|r| r.transfer_id.as_str()).collect();
    assert_eq!(ids, vec!["tx-b", "tx-a"]);
}

#[tokio::test]
async fn queue_pipeline_settles_every_message() {
    let s = stores().await;
    let queue = Arc::new(MemoryQueue::new(2));
    let submitter = TransferSubmitter::new(queue.clone(), Arc::new(SequentialIds::new("it")));
    let consumer = TransferConsumer::new(queue.clone(), s.saga.clone(), 10, Duration::from_millis(5));

    let first = submitter
        .submit(TransferRequest::points("", "rb-1", "alice", "carol", "RD02", 5))
        .await
        .unwrap();
    submitter
        .submit(TransferRequest::certificate("", "missing", "admin", "dave", "Nope"))
        .await
        .unwrap();
    queue
        .send("not a transfer".to_string(), "junk", "mallory")
        .await
        .unwrap();

    let report = consumer.run_until_idle().await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);
    // the undecodable body is tried twice, then dead-lettered
    assert_eq!(report.redelivered, 2);
    assert_eq!(queue.dead_letters(), vec!["not a transfer".to_string()]);
    assert_eq!(s.status(&first.transfer_id).await, TransferStatus::Completed);
    assert_eq!(s.balance("carol"), Some(5));
}
