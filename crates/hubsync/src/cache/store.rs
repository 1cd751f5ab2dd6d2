use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sea_orm::DbErr;
use thiserror::Error;

use super::metadata::{CacheKey, CacheMetadata};

/// Errors that can occur during cache metadata operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Storage for conditional-request metadata.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheMetadata>>;

    /// Store `metadata` unless the stored record was refreshed more recently.
    ///
    /// Returns whether the record was written.
    async fn put(&self, key: &CacheKey, metadata: CacheMetadata) -> Result<bool>;
}

/// Process-local cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<CacheKey, CacheMetadata>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheMetadata>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, metadata: CacheMetadata) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = entries.get(key)
            && existing.last_refresh > metadata.last_refresh
        {
            tracing::debug!(entity = %key.entity, "Skipping stale cache write");
            return Ok(false);
        }
        entries.insert(key.clone(), metadata);
        Ok(true)
    }
}
