//! Ledger - authoritative key-value store
//!
//! Holds subject records (where a certificate's artwork lives), award records,
//! reward-point balances and generated items. The only concurrency-control
//! primitive is the per-write [`Precondition`]; no locks are taken across calls.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A ledger item: a flat JSON object
pub type Item = serde_json::Map<String, Value>;

/// Table-scoped primary key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerKey {
    pub table: String,
    pub key: String,
}

impl LedgerKey {
    pub fn new(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.key)
    }
}

/// Condition evaluated against the current item before a write is applied
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// Unconditional write
    None,
    /// Item must not exist (insert-only)
    NotExists,
    /// Item must already exist
    Exists,
    /// Item must exist and `attribute` must equal `value` (optimistic CAS)
    AttributeEquals { attribute: String, value: Value },
    /// Item must be absent, or present with `attribute == value`
    AbsentOrAttributeEquals { attribute: String, value: Value },
}

impl Precondition {
    pub fn attribute_equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Precondition::AttributeEquals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn absent_or_attribute_equals(
        attribute: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Precondition::AbsentOrAttributeEquals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Check the condition against the current item (if any)
    pub fn holds(&self, current: Option<&Item>) -> bool {
        match self {
            Precondition::None => true,
            Precondition::NotExists => current.is_none(),
            Precondition::Exists => current.is_some(),
            Precondition::AttributeEquals { attribute, value } => {
                current.and_then(|item| item.get(attribute)) == Some(value)
            }
            Precondition::AbsentOrAttributeEquals { attribute, value } => match current {
                None => true,
                Some(item) => item.get(attribute) == Some(value),
            },
        }
    }
}

/// One conditional put
#[derive(Debug, Clone)]
pub struct LedgerWrite {
    pub key: LedgerKey,
    pub item: Item,
    pub precondition: Precondition,
}

impl LedgerWrite {
    pub fn new(key: LedgerKey, item: Item, precondition: Precondition) -> Self {
        Self {
            key,
            item,
            precondition,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Condition check failed for {0}")]
    ConditionFailed(String),

    #[error("Duplicate key in bulk write: {0}")]
    DuplicateKey(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::ConditionFailed(_) => "CONDITION_FAILED",
            LedgerError::DuplicateKey(_) => "DUPLICATE_KEY",
            LedgerError::Unavailable(_) => "LEDGER_UNAVAILABLE",
        }
    }
}

/// Ledger capability consumed by the saga and the batch worker
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get(&self, key: &LedgerKey) -> Result<Option<Item>, LedgerError>;

    /// Apply one write if its precondition holds
    async fn conditional_put(&self, write: LedgerWrite) -> Result<(), LedgerError>;

    /// Apply all writes atomically: every precondition is checked first and
    /// nothing is written unless all of them hold. Two writes to the same key
    /// in one call are rejected.
    async fn bulk_write(&self, writes: Vec<LedgerWrite>) -> Result<(), LedgerError>;
}

/// In-process ledger backed by an ordered map
#[derive(Default)]
pub struct MemoryLedger {
    items: Mutex<BTreeMap<LedgerKey, Item>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<LedgerKey, Item>>, LedgerError> {
        self.items
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))
    }

    /// Unconditionally store an item (seeding, fixtures)
    pub fn insert(&self, key: LedgerKey, item: Item) {
        if let Ok(mut items) = self.items.lock() {
            items.insert(key, item);
        }
    }

    /// Snapshot of a single item
    pub fn item(&self, key: &LedgerKey) -> Option<Item> {
        self.items.lock().ok()?.get(key).cloned()
    }

    /// Number of items stored in `table`
    pub fn count(&self, table: &str) -> usize {
        self.items
            .lock()
            .map(|items| items.keys().filter(|k| k.table == table).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get(&self, key: &LedgerKey) -> Result<Option<Item>, LedgerError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn conditional_put(&self, write: LedgerWrite) -> Result<(), LedgerError> {
        let mut items = self.lock()?;
        if !write.precondition.holds(items.get(&write.key)) {
            return Err(LedgerError::ConditionFailed(write.key.to_string()));
        }
        items.insert(write.key, write.item);
        Ok(())
    }

    async fn bulk_write(&self, writes: Vec<LedgerWrite>) -> Result<(), LedgerError> {
        let mut items = self.lock()?;

        let mut seen = HashSet::with_capacity(writes.len());
        for write in &writes {
            if !seen.insert(&write.key) {
                return Err(LedgerError::DuplicateKey(write.key.to_string()));
            }
            if !write.precondition.holds(items.get(&write.key)) {
                return Err(LedgerError::ConditionFailed(write.key.to_string()));
            }
        }

        for write in writes {
            items.insert(write.key, write.item);
        }
        Ok(())
    }
}
