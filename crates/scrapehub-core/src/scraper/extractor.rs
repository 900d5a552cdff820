use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RenderSession, Renderer};
use crate::config::ExtractOptions;
use crate::error::{ScrapeError, ScrapeResult};
use crate::history::{Row, Snapshot};
use crate::selector::SelectorSet;

/// Turns one page into one [`Snapshot`], or fails without producing anything.
///
/// Every call gets its own session from the renderer, and that session is
/// closed before `extract` returns, whatever the outcome.
#[derive(Clone)]
pub struct RowExtractor {
    renderer: Arc<dyn Renderer>,
    options: ExtractOptions,
}

impl RowExtractor {
    pub fn new(renderer: Arc<dyn Renderer>, options: ExtractOptions) -> Self {
        Self { renderer, options }
    }

    pub async fn extract(
        &self,
        url: &str,
        selectors: &SelectorSet,
        cancel: &CancellationToken,
    ) -> ScrapeResult<Snapshot> {
        selectors.validate()?;
        if cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }

        let started = Instant::now();
        let mut session = self
            .renderer
            .open()
            .await
            .map_err(|e| ScrapeError::Renderer(e.to_string()))?;

        let deadline = self.options.scrape_timeout;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
            res = tokio::time::timeout(
                deadline,
                drive(session.as_mut(), url, selectors, self.options.ready_timeout),
            ) => res.unwrap_or_else(|_| Err(ScrapeError::TimedOut {
                after_ms: deadline.as_millis() as u64,
            })),
        };

        // A close that hangs is abandoned; the backend's drop path cleans up.
        match tokio::time::timeout(self.options.close_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(url, "Failed to close render session: {}", e),
            Err(_) => warn!(
                url,
                after_ms = self.options.close_timeout.as_millis() as u64,
                "Render session close timed out"
            ),
        }

        match &outcome {
            Ok(snapshot) => info!(
                url,
                rows = snapshot.rows.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Extraction finished"
            ),
            Err(e) => warn!(url, "Extraction failed: {}", e),
        }
        outcome
    }
}

async fn drive(
    session: &mut dyn RenderSession,
    url: &str,
    selectors: &SelectorSet,
    ready_timeout: Duration,
) -> ScrapeResult<Snapshot> {
    session
        .navigate(url)
        .await
        .map_err(|e| ScrapeError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let ready = selectors.ready_selector();
    session
        .wait_ready(ready, ready_timeout)
        .await
        .map_err(|e| ScrapeError::ReadinessTimeout {
            selector: ready.to_string(),
            message: e.to_string(),
        })?;

    let nodes = session
        .query_all(&selectors.row_selector)
        .await
        .map_err(|e| ScrapeError::field(None, &selectors.row_selector, e))?;
    debug!(url, rows = nodes.len(), "Row nodes found");

    let mut rows = Vec::with_capacity(nodes.len());
    for (idx, node) in nodes.iter().enumerate() {
        let mut row = Row::with_capacity(selectors.column_selectors.len());
        for column in selectors.columns() {
            let text = session
                .text_of(node, column)
                .await
                .map_err(|e| ScrapeError::field(Some(idx), column, e))?;
            row.insert(column.to_string(), text);
        }
        rows.push(row);
    }

    Ok(Snapshot::new(Utc::now(), rows))
}
