use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{ScrapeError, ScrapeResult};
use crate::history::export::{flatten, ExportTable};
use crate::history::{History, HistoryAccumulator, Row};
use crate::scraper::extractor::RowExtractor;
use crate::source::{Source, SourceId};
use crate::storage::SourceStore;

/// Source lookup, extraction and accumulation behind one entry point.
pub struct ScrapeService {
    sources: Arc<dyn SourceStore>,
    extractor: RowExtractor,
    accumulator: HistoryAccumulator,
}

impl ScrapeService {
    pub fn new(
        sources: Arc<dyn SourceStore>,
        extractor: RowExtractor,
        accumulator: HistoryAccumulator,
    ) -> Self {
        Self {
            sources,
            extractor,
            accumulator,
        }
    }

    pub fn sources(&self) -> &Arc<dyn SourceStore> {
        &self.sources
    }

    async fn source(&self, id: &SourceId) -> ScrapeResult<Source> {
        self.sources
            .get_source(id)
            .await
            .map_err(|e| ScrapeError::StorageRead(e.to_string()))?
            .ok_or_else(|| ScrapeError::SourceNotFound(id.clone()))
    }

    /// One extract-and-accumulate cycle. Returns the rows of the new snapshot.
    ///
    /// A failed or cancelled extraction leaves the history untouched.
    pub async fn run_scrape(
        &self,
        id: &SourceId,
        cancel: &CancellationToken,
    ) -> ScrapeResult<Vec<Row>> {
        let source = self.source(id).await?;
        tracing::info!(source = %id, url = %source.url, "Scraping source");

        let snapshot = self
            .extractor
            .extract(&source.url, &source.selectors, cancel)
            .await?;

        if cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }

        let rows = snapshot.rows.clone();
        self.accumulator
            .append_snapshot(id, snapshot, &source.selectors)
            .await?;
        Ok(rows)
    }

    pub async fn history(&self, id: &SourceId) -> ScrapeResult<History> {
        let stored = self
            .accumulator
            .store()
            .get_history(id)
            .await
            .map_err(ScrapeError::storage_read)?;

        match stored {
            Some(stored) => Ok(stored.value),
            None => {
                // Tell "never scraped" apart from "no such source".
                self.source(id).await?;
                Err(ScrapeError::HistoryNotFound(id.clone()))
            }
        }
    }

    pub async fn export_history(&self, id: &SourceId) -> ScrapeResult<ExportTable> {
        Ok(flatten(&self.history(id).await?))
    }
}
