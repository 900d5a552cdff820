pub mod browser;
pub mod extractor;
pub mod html;
pub mod service;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to start renderer: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("timeout waiting for selector: {selector}")]
    Timeout { selector: String },
    #[error("no element matches {selector}")]
    NoMatch { selector: String },
    #[error("node handle {0} does not belong to this session")]
    StaleHandle(usize),
    #[error("driver error: {0}")]
    Driver(String),
}

impl From<chromiumoxide::error::CdpError> for RenderError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        RenderError::Driver(err.to_string())
    }
}

/// Opaque reference to a node found by [`RenderSession::query_all`].
///
/// Only valid inside the session that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

impl NodeHandle {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Something that can hand out fresh browsing contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open(&self) -> RenderResult<Box<dyn RenderSession>>;
}

/// One browsing context, owned by exactly one extraction.
#[async_trait]
pub trait RenderSession: Send {
    async fn navigate(&mut self, url: &str) -> RenderResult<()>;

    /// Resolves once `selector` matches something, or fails with
    /// [`RenderError::Timeout`].
    async fn wait_ready(&mut self, selector: &str, timeout: Duration) -> RenderResult<()>;

    /// All matches in document order. No match is an empty vec, not an error.
    async fn query_all(&mut self, selector: &str) -> RenderResult<Vec<NodeHandle>>;

    /// Text of the first element matching `selector` inside `node`.
    async fn text_of(&mut self, node: &NodeHandle, selector: &str) -> RenderResult<String>;

    async fn close(self: Box<Self>) -> RenderResult<()>;
}
