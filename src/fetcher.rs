use crate::record::{flatten_object, Table};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for the paginated fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Maximum number of pages followed before giving up (default: 1000)
    pub max_pages: usize,
    /// Per-request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig {
            max_pages: 1000,
            timeout_seconds: 30,
        }
    }
}

/// Source of raw JSON pages.
///
/// Implementations can be:
/// - An authenticated HTTP client (production)
/// - An in-memory map of URL to body (testing)
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Retrieves and decodes the page at `url`.
    ///
    /// # Errors
    /// Returns `FetchError::Network` or `FetchError::Status` when the
    /// request fails, and `FetchError::Decode` when the body is not JSON.
    async fn get_page(&self, url: &str) -> Result<serde_json::Value, FetchError>;
}

/// HTTP page source authenticating with a static token.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: Client,
    token: String,
}

impl HttpPageSource {
    /// Creates a page source sending `Authorization: Token <token>` on every request.
    ///
    /// # Errors
    /// Returns `FetchError::ClientCreation` if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>, config: &FetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| FetchError::ClientCreation(e.to_string()))?;

        Ok(HttpPageSource {
            client,
            token: token.into(),
        })
    }

    fn authorization(&self) -> String {
        format!("Token {}", self.token)
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn get_page(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Canned response for [`InMemoryPageSource`].
#[derive(Debug, Clone)]
enum CannedPage {
    Body(String),
    Status(u16),
}

/// In-memory page source keyed by URL.
///
/// Unknown URLs answer with HTTP 404.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPageSource {
    pages: HashMap<String, CannedPage>,
}

impl InMemoryPageSource {
    pub fn new() -> Self {
        InMemoryPageSource::default()
    }

    /// Registers a JSON page body.
    pub fn add_page(&mut self, url: impl Into<String>, body: serde_json::Value) {
        self.pages.insert(url.into(), CannedPage::Body(body.to_string()));
    }

    /// Registers a raw page body, which may be invalid JSON.
    pub fn add_raw_page(&mut self, url: impl Into<String>, body: impl Into<String>) {
        self.pages.insert(url.into(), CannedPage::Body(body.into()));
    }

    /// Registers an error status for a URL.
    pub fn add_status(&mut self, url: impl Into<String>, status: u16) {
        self.pages.insert(url.into(), CannedPage::Status(status));
    }
}

#[async_trait]
impl PageSource for InMemoryPageSource {
    async fn get_page(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        match self.pages.get(url) {
            Some(CannedPage::Body(body)) => {
                serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))
            }
            Some(CannedPage::Status(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// Follows cursor pagination and flattens every result into a [`Table`].
pub struct Fetcher {
    source: Box<dyn PageSource>,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(source: Box<dyn PageSource>, config: FetcherConfig) -> Self {
        Fetcher { source, config }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetches every page starting at `endpoint`.
    ///
    /// Pages are requested one after another; each page's `next` URL is
    /// followed until it is absent, null or empty. Rows keep page order,
    /// then in-page order.
    ///
    /// # Errors
    /// Any failing page aborts the whole fetch. Exceeding
    /// `FetcherConfig::max_pages` yields `FetchError::PageLimitExceeded`.
    pub async fn fetch(&self, endpoint: &str) -> Result<Table, FetchError> {
        let mut table = Table::new();
        let mut next = Some(endpoint.to_string());
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if pages >= self.config.max_pages {
                return Err(FetchError::PageLimitExceeded(self.config.max_pages));
            }
            pages += 1;

            log::debug!("Fetching page {} from {}", pages, url);
            let body = self.source.get_page(&url).await?;
            let page = parse_page(&body)?;

            for record in page.results {
                table.push(record);
            }
            next = page.next;
        }

        log::info!("Fetched {} records across {} pages", table.len(), pages);
        Ok(table)
    }
}

struct Page {
    results: Vec<crate::record::Record>,
    next: Option<String>,
}

fn parse_page(body: &serde_json::Value) -> Result<Page, FetchError> {
    let object = body
        .as_object()
        .ok_or_else(|| FetchError::Decode("page body is not a JSON object".to_string()))?;

    let results = match object.get("results") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.as_object().map(flatten_object).ok_or_else(|| {
                    FetchError::Decode(format!("result {} is not a JSON object", index))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(FetchError::Decode("'results' is not a list".to_string()));
        }
    };

    let next = match object.get("next") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(url)) if url.trim().is_empty() => None,
        Some(serde_json::Value::String(url)) => Some(url.clone()),
        Some(_) => {
            return Err(FetchError::Decode("'next' is not a URL string".to_string()));
        }
    };

    Ok(Page { results, next })
}

/// Errors that can occur while fetching paginated submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// HTTP client creation failed
    ClientCreation(String),
    /// Transport failure (connection, timeout, body read)
    Network(String),
    /// Upstream answered with a non-2xx status
    Status { url: String, status: u16 },
    /// Page body is not the expected structured data
    Decode(String),
    /// Cursor chain did not terminate within the page limit
    PageLimitExceeded(usize),
}

impl FetchError {
    /// True for transport and status failures.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_)
                | FetchError::Status { .. }
                | FetchError::PageLimitExceeded(_)
                | FetchError::ClientCreation(_)
        )
    }

    /// True when a page body could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self, FetchError::Decode(_))
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::ClientCreation(msg) => write!(f, "Client creation error: {}", msg),
            FetchError::Network(msg) => write!(f, "Network error: {}", msg),
            FetchError::Status { url, status } => {
                write!(f, "Network error: HTTP {} from {}", status, url)
            }
            FetchError::Decode(msg) => write!(f, "Decode error: {}", msg),
            FetchError::PageLimitExceeded(limit) => {
                write!(f, "Network error: pagination exceeded {} pages", limit)
            }
        }
    }
}

impl std::error::Error for FetchError {}
