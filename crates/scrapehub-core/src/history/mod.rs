pub mod export;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ScrapeError, ScrapeResult};
use crate::selector::SelectorSet;
use crate::source::SourceId;
use crate::storage::{HistoryStore, StorageError};

/// Column selector to extracted text. One entry per column selector.
pub type Row = HashMap<String, String>;

/// One point-in-time extraction: when it finished and what it found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    pub rows: Vec<Row>,
}

impl Snapshot {
    pub fn new(captured_at: DateTime<Utc>, rows: Vec<Row>) -> Self {
        Self { captured_at, rows }
    }
}

/// Every snapshot ever recorded for one source, oldest first.
///
/// `selectors` is the set used by the latest scrape; exports label columns
/// with it, so editing a source later does not relabel stored data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    pub source_id: SourceId,
    #[serde(rename = "selectorSetAtLastScrape")]
    pub selectors: SelectorSet,
    pub snapshots: Vec<Snapshot>,
}

impl History {
    pub fn new(source_id: SourceId, selectors: SelectorSet) -> Self {
        Self {
            source_id,
            selectors,
            snapshots: Vec::new(),
        }
    }

    /// Adds a snapshot, keeping `captured_at` non-decreasing.
    ///
    /// Normally this is a plain push. A snapshot that lost a race against a
    /// later capture lands right after the last entry not newer than itself.
    pub fn push(&mut self, snapshot: Snapshot) {
        let at = self
            .snapshots
            .partition_point(|s| s.captured_at <= snapshot.captured_at);
        self.snapshots.insert(at, snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Merges snapshots into stored histories with compare-and-set.
///
/// Each attempt reads the history and its version, appends, and writes back
/// only if the version is unchanged. A conflicting writer forces a fresh
/// read; after `max_conflict_retries` extra attempts the caller gets
/// [`ScrapeError::ConcurrentUpdateConflict`].
#[derive(Clone)]
pub struct HistoryAccumulator {
    store: Arc<dyn HistoryStore>,
    max_conflict_retries: u32,
}

impl HistoryAccumulator {
    pub fn new(store: Arc<dyn HistoryStore>, max_conflict_retries: u32) -> Self {
        Self {
            store,
            max_conflict_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    pub async fn append_snapshot(
        &self,
        source_id: &SourceId,
        snapshot: Snapshot,
        selectors: &SelectorSet,
    ) -> ScrapeResult<History> {
        let attempts = self.max_conflict_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let current = self
                .store
                .get_history(source_id)
                .await
                .map_err(ScrapeError::storage_read)?;

            let (expected, mut history) = match current {
                Some(stored) => (stored.version, stored.value),
                None => (0, History::new(source_id.clone(), selectors.clone())),
            };

            history.push(snapshot.clone());
            history.selectors = selectors.clone();

            match self.store.put_history(source_id, &history, expected).await {
                Ok(version) => {
                    info!(
                        source = %source_id,
                        version,
                        snapshots = history.len(),
                        rows = snapshot.rows.len(),
                        "Snapshot appended"
                    );
                    return Ok(history);
                }
                Err(StorageError::Conflict { .. }) => {
                    debug!(source = %source_id, attempt, expected, "History changed underneath, retrying");
                }
                Err(e) => return Err(ScrapeError::StorageWrite(e.to_string())),
            }
        }

        warn!(source = %source_id, attempts, "Giving up on contended history");
        Err(ScrapeError::ConcurrentUpdateConflict {
            source_id: source_id.clone(),
            attempts,
        })
    }
}
