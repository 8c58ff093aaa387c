//! Static-document implementation of the browser capability.
//!
//! `StaticBrowser` fetches a page once over HTTP and answers selector
//! queries against the parsed document. There is no JavaScript, no layout
//! and no renderer; `screenshot` captures the page source bytes so the
//! artifact pipeline still works end to end. The transport sits behind
//! [`PageFetcher`] so tests and offline callers can serve canned documents.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderMap as HttpHeaderMap;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{Browser, BrowserError, NodeRef, PageSession};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport used by the static browser to retrieve documents.
///
/// Implementations should return the document body regardless of HTTP
/// status; a 404 page is still a page the script may want to inspect.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, BrowserError>;
}

/// Configuration for the bundled HTTP transport.
#[derive(Debug, Clone)]
pub struct StaticBrowserConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub default_headers: HttpHeaderMap,
}

impl Default for StaticBrowserConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            default_headers: HttpHeaderMap::new(),
        }
    }
}

/// Reqwest-backed fetcher with cookie persistence across navigations.
pub struct ReqwestPageFetcher {
    client: Client,
}

impl ReqwestPageFetcher {
    pub fn new(config: &StaticBrowserConfig) -> Result<Self, BrowserError> {
        let headers = convert_headers(&config.default_headers)?;
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(|err| BrowserError::Transport(err.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing reqwest client, keeping whatever configuration it
    /// already carries.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for ReqwestPageFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, BrowserError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|err| BrowserError::Transport(err.to_string()))?;

        response
            .text()
            .await
            .map_err(|err| BrowserError::Transport(err.to_string()))
    }
}

fn convert_headers(headers: &HttpHeaderMap) -> Result<reqwest::header::HeaderMap, BrowserError> {
    let mut map = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|err| BrowserError::Transport(err.to_string()))?;
        let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes())
            .map_err(|err| BrowserError::Transport(err.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// In-memory fetcher serving registered documents, for offline use.
#[derive(Default)]
pub struct MemoryFetcher {
    documents: RwLock<HashMap<String, String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the document served for `url`. Keys are compared against
    /// the normalized URL string, so `https://example.com` is stored as
    /// `https://example.com/`.
    pub fn insert(&self, url: impl Into<String>, document: impl Into<String>) {
        let raw = url.into();
        let key = match Url::parse(&raw) {
            Ok(parsed) => parsed.to_string(),
            Err(err) => {
                log::warn!("ignoring fixture with unparseable url {raw}: {err}");
                return;
            }
        };
        self.documents
            .write()
            .expect("fetcher lock poisoned")
            .insert(key, document.into());
    }
}

#[async_trait]
impl PageFetcher for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, BrowserError> {
        self.documents
            .read()
            .ok()
            .and_then(|map| map.get(url.as_str()).cloned())
            .ok_or_else(|| BrowserError::Transport(format!("no document registered for {url}")))
    }
}

/// Browser over static documents.
pub struct StaticBrowser {
    fetcher: Arc<dyn PageFetcher>,
    next_page_id: AtomicU64,
}

impl StaticBrowser {
    pub fn new() -> Result<Self, BrowserError> {
        Self::with_config(&StaticBrowserConfig::default())
    }

    pub fn with_config(config: &StaticBrowserConfig) -> Result<Self, BrowserError> {
        Ok(Self::from_fetcher(Arc::new(ReqwestPageFetcher::new(
            config,
        )?)))
    }

    /// Build a browser over any transport.
    pub fn from_fetcher(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            next_page_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Browser for StaticBrowser {
    async fn open(&self, url: &Url) -> Result<Arc<dyn PageSession>, BrowserError> {
        let document = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|err| BrowserError::Navigation {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let id = self.next_page_id.fetch_add(1, Ordering::Relaxed);
        log::debug!("opened page {} at {} ({} bytes)", id, url, document.len());

        Ok(Arc::new(StaticPage {
            id,
            url: url.clone(),
            document,
            nodes: RwLock::new(Vec::new()),
        }))
    }
}

/// One fetched document.
///
/// Node handles index a table of element paths (child positions from the
/// tree root), so the parsed tree never has to live across an await point.
/// Every query reparses the retained source; parsing is deterministic, so a
/// recorded path resolves to the same element each time, whatever its tag.
pub struct StaticPage {
    id: u64,
    url: Url,
    document: String,
    nodes: RwLock<Vec<Vec<usize>>>,
}

impl StaticPage {
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn compile(selector: &str) -> Result<Selector, BrowserError> {
        Selector::parse(selector).map_err(|err| BrowserError::Selector {
            selector: selector.to_string(),
            message: err.to_string(),
        })
    }

    fn remember(&self, element: ElementRef<'_>) -> NodeRef {
        let mut nodes = self.nodes.write().expect("node table poisoned");
        nodes.push(path_to(element));
        NodeRef {
            page: self.id,
            node: (nodes.len() - 1) as u64,
        }
    }

    fn path_of(&self, node: NodeRef) -> Result<Vec<usize>, BrowserError> {
        if node.page != self.id {
            return Err(BrowserError::StaleNode {
                page: node.page,
                node: node.node,
            });
        }
        self.nodes
            .read()
            .ok()
            .and_then(|nodes| nodes.get(node.node as usize).cloned())
            .ok_or(BrowserError::StaleNode {
                page: node.page,
                node: node.node,
            })
    }

    fn query(
        &self,
        selector: &str,
        within: Option<NodeRef>,
        limit: Option<usize>,
    ) -> Result<Vec<NodeRef>, BrowserError> {
        let compiled = Self::compile(selector)?;
        let limit = limit.unwrap_or(usize::MAX);
        let document = Html::parse_document(&self.document);

        match within {
            None => Ok(document
                .select(&compiled)
                .take(limit)
                .map(|element| self.remember(element))
                .collect()),
            Some(root) => {
                let path = self.path_of(root)?;
                let Some(element) = resolve(&document, &path) else {
                    return Err(BrowserError::StaleNode {
                        page: root.page,
                        node: root.node,
                    });
                };
                Ok(element
                    .select(&compiled)
                    .take(limit)
                    .map(|found| self.remember(found))
                    .collect())
            }
        }
    }
}

/// Child positions from the tree root down to `element`. Positions count
/// every sibling node, text and comments included, so a path recorded from
/// one parse resolves against the next parse of the same source.
fn path_to(element: ElementRef<'_>) -> Vec<usize> {
    let mut path = Vec::new();
    let mut current = *element;
    while let Some(parent) = current.parent() {
        let position = parent
            .children()
            .take_while(|sibling| sibling.id() != current.id())
            .count();
        path.push(position);
        current = parent;
    }
    path.reverse();
    path
}

/// Walk a recorded path back down a freshly parsed tree.
fn resolve<'a>(document: &'a Html, path: &[usize]) -> Option<ElementRef<'a>> {
    let mut node = document.tree.root();
    for position in path {
        node = node.children().nth(*position)?;
    }
    ElementRef::wrap(node)
}

#[async_trait]
impl PageSession for StaticPage {
    fn page_id(&self) -> u64 {
        self.id
    }

    async fn query_first(
        &self,
        selector: &str,
        within: Option<NodeRef>,
    ) -> Result<Option<NodeRef>, BrowserError> {
        Ok(self.query(selector, within, Some(1))?.into_iter().next())
    }

    async fn query_all(
        &self,
        selector: &str,
        within: Option<NodeRef>,
    ) -> Result<Vec<NodeRef>, BrowserError> {
        self.query(selector, within, None)
    }

    async fn type_text(&self, _text: &str) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("keyboard input"))
    }

    async fn screenshot(&self) -> Result<Bytes, BrowserError> {
        Ok(Bytes::copy_from_slice(self.document.as_bytes()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        log::debug!("closed page {} at {}", self.id, self.url);
        Ok(())
    }
}
