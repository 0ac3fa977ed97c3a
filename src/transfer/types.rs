//! Transfer Core Types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::TransferError;
use super::state::{FailureStep, TransferStatus};

/// Reward types accepted for point transfers
pub const REWARD_TYPES: [&str; 4] = [
    "RD00", // General
    "RD01", // Health
    "RD02", // Skills
    "RD03", // Employee support
];

/// What is being transferred
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferKind {
    /// Assign a certificate to the destination owner
    Certificate { name: String },
    /// Move reward points from the source owner's balance to the destination's
    #[serde(rename_all = "camelCase")]
    Points { reward_type: String, points: u32 },
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Certificate { .. } => "CERTIFICATE",
            TransferKind::Points { .. } => "POINTS",
        }
    }
}

/// Transfer request as carried in a queue message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Primary key of the transfer record; also the queue dedup id
    #[serde(default)]
    pub transfer_id: String,
    pub subject_id: String,
    pub source_owner: String,
    pub destination_owner: String,
    /// Informational, e.g. "points threshold 500"
    #[serde(default)]
    pub criteria: String,
    #[serde(default)]
    pub message: String,
    pub kind: TransferKind,
}

impl TransferRequest {
    pub fn certificate(
        transfer_id: impl Into<String>,
        certificate_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            subject_id: certificate_id.into(),
            source_owner: from.into(),
            destination_owner: to.into(),
            criteria: String::new(),
            message: String::new(),
            kind: TransferKind::Certificate { name: name.into() },
        }
    }

    pub fn points(
        transfer_id: impl Into<String>,
        reward_batch_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        reward_type: impl Into<String>,
        points: u32,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            subject_id: reward_batch_id.into(),
            source_owner: from.into(),
            destination_owner: to.into(),
            criteria: String::new(),
            message: String::new(),
            kind: TransferKind::Points {
                reward_type: reward_type.into(),
                points,
            },
        }
    }

    pub fn with_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.criteria = criteria.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Reject requests the saga must never start on
    pub fn validate(&self) -> Result<(), TransferError> {
        let required = [
            ("transferId", &self.transfer_id),
            ("subjectId", &self.subject_id),
            ("sourceOwner", &self.source_owner),
            ("destinationOwner", &self.destination_owner),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(TransferError::InvalidRequest(format!("{field} is required")));
        }

        if let TransferKind::Points {
            reward_type,
            points,
        } = &self.kind
        {
            if *points == 0 {
                return Err(TransferError::InvalidRequest(
                    "points must be greater than zero".to_string(),
                ));
            }
            if !REWARD_TYPES.contains(&reward_type.as_str()) {
                return Err(TransferError::InvalidRequest(format!(
                    "unknown reward type: {reward_type}"
                )));
            }
            if self.source_owner == self.destination_owner {
                return Err(TransferError::InvalidRequest(
                    "cannot transfer within the same owner".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One row of the transfer log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub transfer_id: String,
    pub subject_id: String,
    pub source_owner: String,
    pub destination_owner: String,
    pub criteria: String,
    pub message: String,
    pub kind: TransferKind,
    pub status: TransferStatus,
    /// Empty unless failed
    pub error_detail: String,
    pub last_updated: DateTime<Utc>,
}

impl TransferRecord {
    /// New record in IN_PROGRESS
    pub fn new(request: &TransferRequest, now: DateTime<Utc>) -> Self {
        Self {
            transfer_id: request.transfer_id.clone(),
            subject_id: request.subject_id.clone(),
            source_owner: request.source_owner.clone(),
            destination_owner: request.destination_owner.clone(),
            criteria: request.criteria.clone(),
            message: request.message.clone(),
            kind: request.kind.clone(),
            status: TransferStatus::InProgress,
            error_detail: String::new(),
            last_updated: now,
        }
    }

    /// Move to `status`, stamping `last_updated` strictly after the previous write
    pub fn transition(
        &mut self,
        status: TransferStatus,
        error_detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        if !self.status.can_transition_to(status) {
            return Err(TransferError::InvalidStatusTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.error_detail = error_detail.into();
        self.last_updated = now.max(self.last_updated + chrono::Duration::milliseconds(1));
        Ok(())
    }

    /// Failure reason ("locate", "copy", "commit") if failed
    pub fn reason(&self) -> Option<&'static str> {
        self.status.reason()
    }
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transfer[{}] {} {} -> {} subject={} status={}",
            self.transfer_id,
            self.kind.as_str(),
            self.source_owner,
            self.destination_owner,
            self.subject_id,
            self.status
        )
    }
}

/// How a saga invocation ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// All five steps ran (or resumed) and the record is COMPLETED
    Completed,
    /// Redelivery of a transfer already COMPLETED; nothing re-applied
    AlreadyCompleted,
    /// Redelivery of a transfer already FAILED; nothing re-applied
    PreviouslyFailed(FailureStep),
}
