//! Browser session capability.
//!
//! The engine never talks to a concrete browser directly; it drives the
//! [`Browser`] and [`PageSession`] traits. The bundled [`StaticBrowser`]
//! implementation satisfies them with an HTTP fetch and a parsed DOM tree,
//! while a real headless browser can be plugged in by the hosting
//! application.

pub mod static_browser;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

pub use static_browser::{
    MemoryFetcher, PageFetcher, ReqwestPageFetcher, StaticBrowser, StaticBrowserConfig, StaticPage,
};

/// Opaque handle naming one DOM node inside one page session.
///
/// Handles are only meaningful to the page that produced them; `page` ties
/// the handle to that page's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub page: u64,
    pub node: u64,
}

/// Failure states surfaced by a browser implementation.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to open {url}: {message}")]
    Navigation { url: String, message: String },
    #[error("invalid selector \"{selector}\": {message}")]
    Selector { selector: String, message: String },
    #[error("stale node handle: node {node} belongs to page {page}, which is not the open document")]
    StaleNode { page: u64, node: u64 },
    #[error("screenshot capture failed: {0}")]
    Capture(String),
    #[error("browser transport error: {0}")]
    Transport(String),
    #[error("not supported by this browser: {0}")]
    Unsupported(&'static str),
}

/// A browser able to open pages.
///
/// Implementations hand out independent sessions; the engine gives each
/// script instance exclusive ownership of the sessions it opens.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Arc<dyn PageSession>, BrowserError>;
}

/// One open browser tab.
///
/// Node handles returned by the query methods embed the session's page id;
/// implementations must reject a handle carrying a foreign page id with
/// [`BrowserError::StaleNode`] instead of guessing.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Identity distinguishing this page from every other page the browser
    /// has opened.
    fn page_id(&self) -> u64;

    /// First element matching `selector`, searched under `within` when given
    /// (descendants only), otherwise over the whole document.
    async fn query_first(
        &self,
        selector: &str,
        within: Option<NodeRef>,
    ) -> Result<Option<NodeRef>, BrowserError>;

    /// Every element matching `selector`, in document order.
    async fn query_all(
        &self,
        selector: &str,
        within: Option<NodeRef>,
    ) -> Result<Vec<NodeRef>, BrowserError>;

    /// Type keyboard input into the page.
    async fn type_text(&self, text: &str) -> Result<(), BrowserError>;

    /// Capture the page as an image artifact.
    async fn screenshot(&self) -> Result<Bytes, BrowserError>;

    /// Release the tab and everything it holds.
    async fn close(&self) -> Result<(), BrowserError>;
}
