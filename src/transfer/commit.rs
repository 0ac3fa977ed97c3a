//! Ledger commit write sets
//!
//! Step 4 of the saga is a single atomic bulk write. Besides the kind-specific
//! effect it always carries a commit marker keyed by transfer id, inserted with
//! `NotExists`, so a transfer can be committed at most once.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::clock::format_timestamp;
use crate::config::TransferConfig;
use crate::ledger::{Item, Ledger, LedgerKey, LedgerWrite, Precondition};

use super::error::TransferError;
use super::types::{TransferKind, TransferRecord};

pub const BALANCE_ATTR: &str = "balance";
pub const TRANSFER_ID_ATTR: &str = "transferId";

pub fn commit_marker_key(config: &TransferConfig, transfer_id: &str) -> LedgerKey {
    LedgerKey::new(&config.commits_table, transfer_id)
}

pub fn award_key(config: &TransferConfig, owner: &str, subject_id: &str) -> LedgerKey {
    LedgerKey::new(&config.awards_table, format!("{owner}#{subject_id}"))
}

pub fn balance_key(config: &TransferConfig, owner: &str, reward_type: &str) -> LedgerKey {
    LedgerKey::new(&config.balances_table, format!("{owner}#{reward_type}"))
}

/// Whether a failed-condition key (as reported by the ledger) is a balance
pub fn is_balance_key(config: &TransferConfig, key: &str) -> bool {
    key.strip_prefix(config.balances_table.as_str())
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Balance item as stored in the ledger
pub fn balance_item(owner: &str, reward_type: &str, balance: u64) -> Item {
    to_item(json!({
        "owner": owner,
        "rewardType": reward_type,
        BALANCE_ATTR: balance,
    }))
}

/// Build every write for committing `record`.
///
/// Point balances are read here and guarded with value-match preconditions,
/// so a concurrent change between the read and the bulk write fails the commit
/// instead of being overwritten.
pub async fn build_commit(
    ledger: &dyn Ledger,
    config: &TransferConfig,
    record: &TransferRecord,
    content_key: &str,
    now: DateTime<Utc>,
) -> Result<Vec<LedgerWrite>, TransferError> {
    let mut writes = Vec::with_capacity(3);

    match &record.kind {
        TransferKind::Certificate { name } => {
            let award = to_item(json!({
                "owner": record.destination_owner,
                "subjectId": record.subject_id,
                "certificateName": name,
                "contentKey": content_key,
                "message": record.message,
                "criteria": record.criteria,
                "awardedAt": format_timestamp(&now),
                TRANSFER_ID_ATTR: record.transfer_id,
            }));
            writes.push(LedgerWrite::new(
                award_key(config, &record.destination_owner, &record.subject_id),
                award,
                Precondition::absent_or_attribute_equals(
                    TRANSFER_ID_ATTR,
                    record.transfer_id.as_str(),
                ),
            ));
        }
        TransferKind::Points {
            reward_type,
            points,
        } => {
            let points = u64::from(*points);

            let source_key = balance_key(config, &record.source_owner, reward_type);
            let source_balance = read_balance(ledger, &source_key)
                .await?
                .ok_or_else(|| {
                    TransferError::Commit(format!(
                        "no {reward_type} balance for {}",
                        record.source_owner
                    ))
                })?;
            if source_balance < points {
                return Err(TransferError::Commit(format!(
                    "insufficient {reward_type} points: {} has {source_balance}, needs {points}",
                    record.source_owner
                )));
            }
            writes.push(LedgerWrite::new(
                source_key,
                balance_item(&record.source_owner, reward_type, source_balance - points),
                Precondition::attribute_equals(BALANCE_ATTR, source_balance),
            ));

            let dest_key = balance_key(config, &record.destination_owner, reward_type);
            let (dest_balance, dest_precondition) = match read_balance(ledger, &dest_key).await? {
                Some(balance) => (balance, Precondition::attribute_equals(BALANCE_ATTR, balance)),
                None => (0, Precondition::NotExists),
            };
            let credited = dest_balance.checked_add(points).ok_or_else(|| {
                TransferError::Commit(format!("{dest_key} balance overflow"))
            })?;
            writes.push(LedgerWrite::new(
                dest_key,
                balance_item(&record.destination_owner, reward_type, credited),
                dest_precondition,
            ));
        }
    }

    writes.push(LedgerWrite::new(
        commit_marker_key(config, &record.transfer_id),
        to_item(json!({
            TRANSFER_ID_ATTR: record.transfer_id,
            "subjectId": record.subject_id,
            "committedAt": format_timestamp(&now),
        })),
        Precondition::NotExists,
    ));

    Ok(writes)
}

async fn read_balance(ledger: &dyn Ledger, key: &LedgerKey) -> Result<Option<u64>, TransferError> {
    let item = ledger
        .get(key)
        .await
        .map_err(|e| TransferError::Commit(e.to_string()))?;

    match item {
        None => Ok(None),
        Some(item) => item
            .get(BALANCE_ATTR)
            .and_then(Value::as_u64)
            .map(Some)
            .ok_or_else(|| TransferError::Commit(format!("{key} has no numeric balance"))),
    }
}

fn to_item(value: Value) -> Item {
    match value {
        Value::Object(map) => map,
        _ => Item::new(),
    }
}
