use thiserror::Error;

use crate::scraper::RenderError;
use crate::selector::SelectorError;
use crate::source::SourceId;
use crate::storage::StorageError;

pub type ScrapeResult<T> = Result<T, ScrapeError>;

/// Everything a scrape, history read or export can fail with.
///
/// Extraction failures abort the whole scrape and surface here unchanged;
/// nothing upstream retries them.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("source not found: {0}")]
    SourceNotFound(SourceId),
    #[error("no history recorded for source {0}")]
    HistoryNotFound(SourceId),
    #[error("invalid selectors: {0}")]
    InvalidSelectors(#[from] SelectorError),
    #[error("renderer unavailable: {0}")]
    Renderer(String),
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("page never became ready, waited for {selector}: {message}")]
    ReadinessTimeout { selector: String, message: String },
    #[error("field extraction failed for {selector}{}: {message}", row_suffix(.row))]
    FieldExtraction {
        row: Option<usize>,
        selector: String,
        message: String,
    },
    #[error("history read failed: {0}")]
    StorageRead(String),
    #[error("history write failed: {0}")]
    StorageWrite(String),
    #[error("history for {source_id} kept changing, gave up after {attempts} attempts")]
    ConcurrentUpdateConflict { source_id: SourceId, attempts: u32 },
    #[error("scrape cancelled")]
    Cancelled,
    #[error("scrape exceeded its deadline of {after_ms}ms")]
    TimedOut { after_ms: u64 },
}

fn row_suffix(row: &Option<usize>) -> String {
    match row {
        Some(idx) => format!(" in row {}", idx),
        None => String::new(),
    }
}

impl ScrapeError {
    pub(crate) fn storage_read(err: StorageError) -> Self {
        ScrapeError::StorageRead(err.to_string())
    }

    pub(crate) fn field(row: Option<usize>, selector: &str, err: RenderError) -> Self {
        ScrapeError::FieldExtraction {
            row,
            selector: selector.to_string(),
            message: err.to_string(),
        }
    }
}
