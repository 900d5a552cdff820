use super::{NodeHandle, RenderError, RenderResult, RenderSession, Renderer};
use async_trait::async_trait;
use kuchikiki::iter::NodeIterator;
use kuchikiki::traits::TendrilSink;
use kuchikiki::NodeRef;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Serves fixed HTML documents by URL and evaluates selectors against them
/// without a browser. Scripts never run, so pages are ready or never ready.
#[derive(Clone, Default)]
pub struct StaticHtmlRenderer {
    pages: Arc<HashMap<String, String>>,
}

impl StaticHtmlRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.into(), html.into());
        self
    }
}

#[async_trait]
impl Renderer for StaticHtmlRenderer {
    async fn open(&self) -> RenderResult<Box<dyn RenderSession>> {
        Ok(Box::new(StaticHtmlSession {
            pages: self.pages.clone(),
            html: None,
            nodes: Vec::new(),
        }))
    }
}

/// Row nodes are remembered as (selector, nth match) because the parsed
/// tree is not `Send` and gets rebuilt on every call.
pub struct StaticHtmlSession {
    pages: Arc<HashMap<String, String>>,
    html: Option<String>,
    nodes: Vec<(String, usize)>,
}

impl StaticHtmlSession {
    fn document(&self) -> RenderResult<NodeRef> {
        let html = self
            .html
            .as_deref()
            .ok_or_else(|| RenderError::Driver("no page loaded".to_string()))?;
        Ok(kuchikiki::parse_html().one(html))
    }
}

fn invalid(selector: &str) -> RenderError {
    RenderError::Driver(format!("invalid selector: {}", selector))
}

fn count_matches(doc: &NodeRef, selector: &str) -> RenderResult<usize> {
    Ok(doc.select(selector).map_err(|_| invalid(selector))?.count())
}

fn scoped_text(
    doc: &NodeRef,
    row_selector: &str,
    nth: usize,
    selector: &str,
) -> RenderResult<String> {
    let row = doc
        .select(row_selector)
        .map_err(|_| invalid(row_selector))?
        .nth(nth)
        .ok_or(RenderError::StaleHandle(nth))?;

    let field = row
        .as_node()
        .descendants()
        .select(selector)
        .map_err(|_| invalid(selector))?
        .next()
        .ok_or_else(|| RenderError::NoMatch {
            selector: selector.to_string(),
        })?;

    Ok(field.as_node().text_contents().trim().to_string())
}

#[async_trait]
impl RenderSession for StaticHtmlSession {
    async fn navigate(&mut self, url: &str) -> RenderResult<()> {
        let html = self
            .pages
            .get(url)
            .ok_or_else(|| RenderError::Navigation(format!("no document for {}", url)))?;
        self.html = Some(html.clone());
        self.nodes.clear();
        Ok(())
    }

    async fn wait_ready(&mut self, selector: &str, _timeout: Duration) -> RenderResult<()> {
        if count_matches(&self.document()?, selector)? > 0 {
            Ok(())
        } else {
            Err(RenderError::Timeout {
                selector: selector.to_string(),
            })
        }
    }

    async fn query_all(&mut self, selector: &str) -> RenderResult<Vec<NodeHandle>> {
        let found = count_matches(&self.document()?, selector)?;
        let offset = self.nodes.len();
        self.nodes
            .extend((0..found).map(|nth| (selector.to_string(), nth)));
        Ok((offset..offset + found).map(NodeHandle::new).collect())
    }

    async fn text_of(&mut self, node: &NodeHandle, selector: &str) -> RenderResult<String> {
        let (row_selector, nth) = self
            .nodes
            .get(node.index())
            .ok_or(RenderError::StaleHandle(node.index()))?;
        scoped_text(&self.document()?, row_selector, *nth, selector)
    }

    async fn close(self: Box<Self>) -> RenderResult<()> {
        Ok(())
    }
}
