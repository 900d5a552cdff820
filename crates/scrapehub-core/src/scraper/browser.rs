use super::{NodeHandle, RenderError, RenderResult, RenderSession, Renderer};
use crate::config::BrowserOptions;
use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// A guard that ensures the page is closed when dropped.
///
/// `close()` on the session takes the page out first, so the drop path only
/// fires when a session is abandoned mid-flight (e.g. its future was dropped).
struct PageGuard {
    page: Option<Page>,
}

impl PageGuard {
    fn new(page: Page) -> Self {
        Self { page: Some(page) }
    }

    fn page(&self) -> RenderResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| RenderError::Driver("page already closed".to_string()))
    }

    fn take(&mut self) -> Option<Page> {
        self.page.take()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            tokio::spawn(async move {
                if let Err(e) = page.close().await {
                    debug!("Failed to close page in Drop: {}", e);
                }
            });
        }
    }
}

/// Headless Chromium. One browser process, one tab per session.
#[derive(Clone)]
pub struct BrowserRenderer {
    browser: Arc<Browser>,
    _handle: Arc<JoinHandle<()>>,
}

impl BrowserRenderer {
    pub async fn new(options: &BrowserOptions) -> RenderResult<Self> {
        let mut builder = BrowserConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = &options.proxy_url {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        let config = builder.build().map_err(RenderError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    debug!("Browser handler error: {:?}", h);
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            _handle: Arc::new(handle),
        })
    }
}

#[async_trait]
impl Renderer for BrowserRenderer {
    async fn open(&self) -> RenderResult<Box<dyn RenderSession>> {
        let page = self.browser.new_page("about:blank").await?;
        Ok(Box::new(BrowserSession {
            page: PageGuard::new(page),
            nodes: Vec::new(),
        }))
    }
}

pub struct BrowserSession {
    page: PageGuard,
    nodes: Vec<Element>,
}

impl BrowserSession {
    fn node(&self, handle: &NodeHandle) -> RenderResult<&Element> {
        self.nodes
            .get(handle.index())
            .ok_or(RenderError::StaleHandle(handle.index()))
    }
}

#[async_trait]
impl RenderSession for BrowserSession {
    async fn navigate(&mut self, url: &str) -> RenderResult<()> {
        let page = self.page.page()?;
        page.goto(url)
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn wait_ready(&mut self, selector: &str, timeout: Duration) -> RenderResult<()> {
        let page = self.page.page()?;
        let start = std::time::Instant::now();
        let mut delay = Duration::from_millis(50);

        while start.elapsed() < timeout {
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_millis(500));
        }

        Err(RenderError::Timeout {
            selector: selector.to_string(),
        })
    }

    async fn query_all(&mut self, selector: &str) -> RenderResult<Vec<NodeHandle>> {
        let found = self.page.page()?.find_elements(selector).await?;
        let offset = self.nodes.len();
        let handles = (offset..offset + found.len()).map(NodeHandle::new).collect();
        self.nodes.extend(found);
        Ok(handles)
    }

    async fn text_of(&mut self, node: &NodeHandle, selector: &str) -> RenderResult<String> {
        // querySelectorAll: no match is an empty list, so driver errors stay distinct.
        let found = self.node(node)?.find_elements(selector).await?;
        let field = first_match(found, selector)?;
        Ok(field.inner_text().await?.unwrap_or_default())
    }

    async fn close(mut self: Box<Self>) -> RenderResult<()> {
        self.nodes.clear();
        if let Some(page) = self.page.take() {
            page.close().await?;
        }
        Ok(())
    }
}

fn first_match<T>(found: Vec<T>, selector: &str) -> RenderResult<T> {
    found.into_iter().next().ok_or_else(|| RenderError::NoMatch {
        selector: selector.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chromiumoxide::error::CdpError;

    #[test]
    fn test_first_match_takes_document_order_head() {
        assert_eq!(first_match(vec!["a", "b"], "td").unwrap(), "a");
    }

    #[test]
    fn test_empty_match_is_no_match() {
        let err = first_match(Vec::<u8>::new(), "td.price").unwrap_err();
        assert!(matches!(err, RenderError::NoMatch { ref selector } if selector == "td.price"));
    }

    #[test]
    fn test_driver_failure_is_not_reported_as_no_match() {
        let err = RenderError::from(CdpError::Timeout);
        assert!(matches!(err, RenderError::Driver(_)));
    }
}
