//! Content store - binary blobs by key (certificate art, reward artwork)

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContentError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Content store unavailable: {0}")]
    Unavailable(String),
}

impl ContentError {
    pub fn code(&self) -> &'static str {
        match self {
            ContentError::NotFound(_) => "OBJECT_NOT_FOUND",
            ContentError::Unavailable(_) => "CONTENT_UNAVAILABLE",
        }
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Copy `src_key` to `dst_key`, overwriting the destination
    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<(), ContentError>;

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), ContentError>;

    /// Delete `key`; deleting a missing key succeeds
    async fn delete(&self, key: &str) -> Result<(), ContentError>;

    async fn exists(&self, key: &str) -> Result<bool, ContentError>;
}

/// In-process object store
#[derive(Default)]
pub struct MemoryContentStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<(), ContentError> {
        // Clone out before inserting: holding a shard guard while writing can deadlock
        let body = self
            .object(src_key)
            .ok_or_else(|| ContentError::NotFound(src_key.to_string()))?;
        self.objects.insert(dst_key.to_string(), body);
        Ok(())
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), ContentError> {
        self.objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ContentError> {
        self.objects.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ContentError> {
        Ok(self.objects.contains_key(key))
    }
}
