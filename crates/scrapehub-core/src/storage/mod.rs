pub mod memory;
pub mod postgres;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::History;
use crate::source::{NewSource, Source, SourceId};

#[derive(Debug, Error)]
pub enum StorageError {
    /// The stored version moved on since it was read.
    #[error("version conflict on {key}: expected {expected}")]
    Conflict { key: String, expected: u64 },
    #[error("stored document for {key} is unreadable: {message}")]
    Corrupt { key: String, message: String },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(err.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Versioned history documents, one per source.
///
/// A missing history reads as `None`; writing it the first time expects
/// version 0. Every successful write bumps the version by one.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn get_history(&self, id: &SourceId) -> Result<Option<Versioned<History>>, StorageError>;

    /// Replaces the history only if its stored version still equals
    /// `expected`; returns the new version.
    async fn put_history(
        &self,
        id: &SourceId,
        history: &History,
        expected: u64,
    ) -> Result<u64, StorageError>;
}

/// Source definitions. The scrape path only ever calls `get_source`.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn get_source(&self, id: &SourceId) -> anyhow::Result<Option<Source>>;
    async fn create_source(&self, new: NewSource) -> anyhow::Result<Source>;
    /// `None` when there is nothing to update.
    async fn update_source(&self, id: &SourceId, new: NewSource) -> anyhow::Result<Option<Source>>;
}
