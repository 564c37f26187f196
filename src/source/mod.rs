//! Source adapters for book discovery.
//!
//! Each supported source implements [`SourceAdapter`]: a paginated
//! `search` producing lightweight candidates and a `fetch_detail`
//! promoting one candidate to a full record. Adapters normalize wire
//! failures into the [`SourceError`] taxonomy so the retry layer can
//! classify them without knowing which source they came from.

mod amazon;
mod leanpub;
mod packtpub;

pub use amazon::AmazonAdapter;
pub use leanpub::LeanpubAdapter;
pub use packtpub::PacktpubAdapter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::warn;

use crate::book::{CandidateReference, DetailRecord, SourceKind};

/// Browser User-Agent pool; one is drawn per request so traffic from a
/// long run does not present a single fingerprint.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/93.0.4577.63 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/94.0.4606.81 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/95.0.4638.69 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:90.0) Gecko/20100101 Firefox/90.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:91.0) Gecko/20100101 Firefox/91.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:92.0) Gecko/20100101 Firefox/92.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:93.0) Gecko/20100101 Firefox/93.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36 Edg/91.0.864.59",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Safari/537.36 Edg/92.0.902.55",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/93.0.4577.63 Safari/537.36 Edg/93.0.961.44",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.3 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:89.0) Gecko/20100101 Firefox/89.0",
];

/// Draws a random User-Agent from the shared pool.
#[must_use]
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Errors surfaced by source adapters.
///
/// The variants carry classification, not just a message: the retry
/// layer maps NotFound to a permanent failure, RateLimited to a
/// backoff-and-retry, and the rest to plain transient retries.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// The resource does not exist at the source (HTTP 404/410, or a
    /// source-level "gone" signal such as an unpublished catalog entry).
    #[error("not found: {0}")]
    NotFound(String),

    /// The source is throttling us (HTTP 429, or 403 used as a throttle).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The request did not complete within its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Network failure, 5xx, or a malformed response worth retrying.
    #[error("transient error fetching {url}: {message}")]
    Transient { url: String, message: String },
}

impl SourceError {
    /// Maps an HTTP status into the error taxonomy.
    ///
    /// Returns `None` for success statuses.
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode, url: &str) -> Option<Self> {
        if status.is_success() {
            return None;
        }
        Some(match status.as_u16() {
            404 | 410 => Self::NotFound(url.to_string()),
            // Marketplaces answer 403 to throttled clients, not 429.
            403 | 429 => Self::RateLimited(url.to_string()),
            code => Self::Transient {
                url: url.to_string(),
                message: format!("HTTP status {code}"),
            },
        })
    }

    /// Maps a reqwest transport error into the taxonomy.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            Self::Timeout(url.to_string())
        } else {
            Self::Transient {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Candidates in on-page order.
    pub candidates: Vec<CandidateReference>,
    /// Whether the source indicates another page exists.
    pub has_more: bool,
}

/// A book source: paginated search plus per-candidate detail fetch.
///
/// Implementations must be stateless across calls (shared `&self`,
/// called concurrently from the fetch pool). Uses `async_trait` for
/// object safety; the pipeline holds adapters as `Arc<dyn SourceAdapter>`.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which source this adapter serves.
    fn kind(&self) -> SourceKind;

    /// Fetches one page of search results. Pages are 1-based.
    async fn search(&self, query: &str, page: u32) -> Result<SearchPage, SourceError>;

    /// Fetches the full detail record for a surviving candidate.
    async fn fetch_detail(&self, candidate: &CandidateReference)
        -> Result<DetailRecord, SourceError>;
}

/// Adapter collection keyed by source.
#[derive(Default)]
pub struct SourceRegistry {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, replacing any previous one for the same source.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Looks up the adapter for a source.
    #[must_use]
    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Registered sources, in default run order.
    #[must_use]
    pub fn kinds(&self) -> Vec<SourceKind> {
        SourceKind::all()
            .iter()
            .copied()
            .filter(|kind| self.adapters.contains_key(kind))
            .collect()
    }
}

/// Builds the shared HTTP client used by all adapters.
///
/// Cookies are enabled because the marketplace sets session cookies on
/// the first response and serves degraded pages without them.
///
/// # Errors
///
/// Returns [`SourceError::Transient`] if the TLS backend fails to
/// initialize.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .cookie_store(true)
        .gzip(true)
        .build()
        .map_err(|err| SourceError::Transient {
            url: String::new(),
            message: format!("failed to build HTTP client: {err}"),
        })
}

/// Builds the registry with every supported adapter.
///
/// Adapters whose setup fails (selector compilation) are skipped with a
/// warning so the remaining sources still run.
#[must_use]
pub fn build_default_registry(client: &reqwest::Client) -> SourceRegistry {
    let mut registry = SourceRegistry::new();

    match AmazonAdapter::new(client.clone()) {
        Ok(adapter) => registry.register(Arc::new(adapter)),
        Err(error) => warn!(
            error = %error,
            "amazon adapter unavailable; continuing with remaining sources"
        ),
    }

    match LeanpubAdapter::new(client.clone()) {
        Ok(adapter) => registry.register(Arc::new(adapter)),
        Err(error) => warn!(
            error = %error,
            "leanpub adapter unavailable; continuing with remaining sources"
        ),
    }

    match PacktpubAdapter::new(client.clone()) {
        Ok(adapter) => registry.register(Arc::new(adapter)),
        Err(error) => warn!(
            error = %error,
            "packtpub adapter unavailable; continuing with remaining sources"
        ),
    }

    registry
}
