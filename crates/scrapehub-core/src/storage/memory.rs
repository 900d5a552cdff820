use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{HistoryStore, SourceStore, StorageError, Versioned};
use crate::history::History;
use crate::source::{NewSource, Source, SourceId};

/// Process-local history store. The compare-and-set happens under the write
/// lock, so it honours the same contract as the Redis store.
#[derive(Default)]
pub struct MemoryHistoryStore {
    docs: RwLock<HashMap<SourceId, Versioned<History>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn get_history(&self, id: &SourceId) -> Result<Option<Versioned<History>>, StorageError> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn put_history(
        &self,
        id: &SourceId,
        history: &History,
        expected: u64,
    ) -> Result<u64, StorageError> {
        let mut docs = self.docs.write().await;
        let current = docs.get(id).map(|d| d.version).unwrap_or(0);
        if current != expected {
            return Err(StorageError::Conflict {
                key: id.to_string(),
                expected,
            });
        }

        let version = current + 1;
        docs.insert(
            id.clone(),
            Versioned {
                version,
                value: history.clone(),
            },
        );
        Ok(version)
    }
}

#[derive(Default)]
pub struct MemorySourceStore {
    sources: RwLock<HashMap<SourceId, Source>>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a source under a caller-chosen id.
    pub async fn insert(&self, source: Source) {
        self.sources.write().await.insert(source.id.clone(), source);
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn get_source(&self, id: &SourceId) -> anyhow::Result<Option<Source>> {
        Ok(self.sources.read().await.get(id).cloned())
    }

    async fn create_source(&self, new: NewSource) -> anyhow::Result<Source> {
        let source = new.into_source(SourceId::generate(), Utc::now());
        self.insert(source.clone()).await;
        Ok(source)
    }

    async fn update_source(&self, id: &SourceId, new: NewSource) -> anyhow::Result<Option<Source>> {
        let mut sources = self.sources.write().await;
        let Some(existing) = sources.get_mut(id) else {
            return Ok(None);
        };
        existing.name = new.name;
        existing.url = new.url;
        existing.selectors = new.selectors;
        existing.updated_at = Utc::now();
        Ok(Some(existing.clone()))
    }
}
