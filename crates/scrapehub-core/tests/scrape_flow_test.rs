use async_trait::async_trait;
use scrapehub_core::config::ExtractOptions;
use scrapehub_core::scraper::html::StaticHtmlRenderer;
use scrapehub_core::scraper::{NodeHandle, RenderResult, RenderSession, Renderer};
use scrapehub_core::storage::memory::{MemoryHistoryStore, MemorySourceStore};
use scrapehub_core::storage::{HistoryStore, SourceStore};
use scrapehub_core::{
    CancellationToken, HistoryAccumulator, NewSource, RowExtractor, ScrapeError, ScrapeService,
    SelectorSet, SourceId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PRICES: &str = r#"
<html><body>
  <ul id="prices">
    <li class="item"><span class="name">Apple</span><span class="price">1.20</span></li>
    <li class="item"><span class="name">Pear, green</span><span class="price">0.90</span></li>
  </ul>
</body></html>
"#;

const BROKEN: &str = r#"
<html><body>
  <ul id="prices">
    <li class="item"><span class="name">Apple</span><span class="price">1.25</span></li>
    <li class="item"><span class="name">Pear</span></li>
  </ul>
</body></html>
"#;

fn new_source(url: &str) -> NewSource {
    NewSource {
        name: "fruit".to_string(),
        url: url.to_string(),
        selectors: SelectorSet::new(
            "li.item",
            vec!["span.name".to_string(), "span.price".to_string()],
        )
        .unwrap(),
    }
}

struct Harness {
    service: ScrapeService,
    sources: Arc<MemorySourceStore>,
    histories: Arc<MemoryHistoryStore>,
}

fn harness(renderer: Arc<dyn Renderer>) -> Harness {
    let sources = Arc::new(MemorySourceStore::new());
    let histories = Arc::new(MemoryHistoryStore::new());
    let service = ScrapeService::new(
        sources.clone(),
        RowExtractor::new(renderer, ExtractOptions::default()),
        HistoryAccumulator::new(histories.clone(), 8),
    );
    Harness {
        service,
        sources,
        histories,
    }
}

fn static_pages() -> Arc<dyn Renderer> {
    Arc::new(
        StaticHtmlRenderer::new()
            .with_page("https://shop.test/prices", PRICES)
            .with_page("https://shop.test/broken", BROKEN),
    )
}

#[tokio::test]
async fn test_scrape_appends_and_exports() {
    let h = harness(static_pages());
    let source = h
        .sources
        .create_source(new_source("https://shop.test/prices"))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let rows = h.service.run_scrape(&source.id, &cancel).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["span.name"], "Pear, green");
    assert_eq!(rows[1]["span.price"], "0.90");

    h.service.run_scrape(&source.id, &cancel).await.unwrap();

    let history = h.service.history(&source.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.snapshots[0].captured_at <= history.snapshots[1].captured_at);

    let table = h.service.export_history(&source.id).await.unwrap();
    assert_eq!(table.header, vec!["capturedAt", "span.name", "span.price"]);
    assert_eq!(table.rows.len(), 4);
    assert_eq!(table.rows[3][1..], ["Pear, green", "0.90"]);

    let csv = table.to_csv().unwrap();
    assert!(csv.starts_with("capturedAt,span.name,span.price\n"));
    assert!(csv.contains(",\"Pear, green\",0.90\n"));
}

#[tokio::test]
async fn test_failed_field_leaves_history_untouched() {
    let h = harness(static_pages());
    let source = h
        .sources
        .create_source(new_source("https://shop.test/prices"))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    h.service.run_scrape(&source.id, &cancel).await.unwrap();
    let before = h.histories.get_history(&source.id).await.unwrap().unwrap();

    h.sources
        .update_source(&source.id, new_source("https://shop.test/broken"))
        .await
        .unwrap()
        .unwrap();
    let err = h.service.run_scrape(&source.id, &cancel).await.unwrap_err();

    assert!(matches!(
        err,
        ScrapeError::FieldExtraction { row: Some(1), ref selector, .. } if selector == "span.price"
    ));
    let after = h.histories.get_history(&source.id).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_first_failure_creates_no_history() {
    let h = harness(static_pages());
    let source = h
        .sources
        .create_source(new_source("https://shop.test/broken"))
        .await
        .unwrap();

    assert!(h
        .service
        .run_scrape(&source.id, &CancellationToken::new())
        .await
        .is_err());
    assert!(h.histories.get_history(&source.id).await.unwrap().is_none());
    assert!(matches!(
        h.service.export_history(&source.id).await,
        Err(ScrapeError::HistoryNotFound(_))
    ));
}

#[tokio::test]
async fn test_unknown_source() {
    let h = harness(static_pages());
    let missing = SourceId::from("missing");

    assert!(matches!(
        h.service.run_scrape(&missing, &CancellationToken::new()).await,
        Err(ScrapeError::SourceNotFound(_))
    ));
    assert!(matches!(
        h.service.export_history(&missing).await,
        Err(ScrapeError::SourceNotFound(_))
    ));
}

#[tokio::test]
async fn test_export_keeps_selectors_of_last_scrape() {
    let h = harness(static_pages());
    let source = h
        .sources
        .create_source(new_source("https://shop.test/prices"))
        .await
        .unwrap();
    h.service
        .run_scrape(&source.id, &CancellationToken::new())
        .await
        .unwrap();

    let mut edited = new_source("https://shop.test/prices");
    edited.selectors = SelectorSet::new("li.item", vec!["span.name".to_string()]).unwrap();
    h.sources.update_source(&source.id, edited).await.unwrap();

    let table = h.service.export_history(&source.id).await.unwrap();
    assert_eq!(table.header, vec!["capturedAt", "span.name", "span.price"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scrapes_of_one_source_both_land() {
    let h = Arc::new(harness(static_pages()));
    let source = h
        .sources
        .create_source(new_source("https://shop.test/prices"))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let h = h.clone();
        let id = source.id.clone();
        tasks.push(tokio::spawn(async move {
            h.service.run_scrape(&id, &CancellationToken::new()).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stored = h.histories.get_history(&source.id).await.unwrap().unwrap();
    assert_eq!(stored.value.len(), 2);
    assert_eq!(stored.version, 2);
}

/// Navigation that never completes; records whether its session got closed.
struct HangingRenderer {
    closed: Arc<AtomicBool>,
}

struct HangingSession {
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Renderer for HangingRenderer {
    async fn open(&self) -> RenderResult<Box<dyn RenderSession>> {
        Ok(Box::new(HangingSession {
            closed: self.closed.clone(),
        }))
    }
}

#[async_trait]
impl RenderSession for HangingSession {
    async fn navigate(&mut self, _url: &str) -> RenderResult<()> {
        futures::future::pending().await
    }

    async fn wait_ready(&mut self, _selector: &str, _timeout: Duration) -> RenderResult<()> {
        Ok(())
    }

    async fn query_all(&mut self, _selector: &str) -> RenderResult<Vec<NodeHandle>> {
        Ok(Vec::new())
    }

    async fn text_of(&mut self, _node: &NodeHandle, _selector: &str) -> RenderResult<String> {
        Ok(String::new())
    }

    async fn close(self: Box<Self>) -> RenderResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_cancelled_scrape_closes_session_and_writes_nothing() {
    let closed = Arc::new(AtomicBool::new(false));
    let h = harness(Arc::new(HangingRenderer {
        closed: closed.clone(),
    }));
    let source = h
        .sources
        .create_source(new_source("https://slow.test/"))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        trigger.cancel();
    });

    let err = h.service.run_scrape(&source.id, &cancel).await.unwrap_err();
    assert!(matches!(err, ScrapeError::Cancelled));
    assert!(closed.load(Ordering::SeqCst));
    assert!(h.histories.get_history(&source.id).await.unwrap().is_none());
}
