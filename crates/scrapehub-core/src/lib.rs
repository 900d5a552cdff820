#![deny(clippy::all)]

pub use crate::error::{ScrapeError, ScrapeResult};
pub use crate::history::export::ExportTable;
pub use crate::history::{History, HistoryAccumulator, Row, Snapshot};
pub use crate::scraper::extractor::RowExtractor;
pub use crate::scraper::service::ScrapeService;
pub use crate::selector::{SelectorError, SelectorSet};
pub use crate::source::{NewSource, Source, SourceId};

pub mod config;
mod error;
pub mod history;
pub mod scraper;
pub mod selector;
pub mod source;
pub mod storage;

pub use tokio_util::sync::CancellationToken;
