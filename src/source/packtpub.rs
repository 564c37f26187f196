//! Packtpub catalog adapter.
//!
//! Search results are HTML product cards that carry the title and a
//! catalog item id in analytics data attributes; the item id embeds the
//! ISBN-13, which serves as the source-native identifier. Detail pages
//! put the bibliographic fields in a key/value sidebar, so extraction
//! walks key spans and reads the sibling value span.

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use crate::book::{extract_year, CandidateReference, DetailRecord, SourceKind};
use crate::fingerprint::Fingerprint;
use crate::source::{random_user_agent, SearchPage, SourceAdapter, SourceError};

const DEFAULT_BASE_URL: &str = "https://www.packtpub.com";

/// Adapter for the Packtpub web catalog.
pub struct PacktpubAdapter {
    client: reqwest::Client,
    base_url: Url,
    card: Selector,
    card_link: Selector,
    card_title: Selector,
    next_page: Selector,
    detail_title: Selector,
    detail_authors: Selector,
    detail_authors_alt: Selector,
    detail_key: Selector,
    detail_value: Selector,
    detail_description: Selector,
    detail_tags: Selector,
    isbn13_pattern: Regex,
}

fn sel(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|err| SourceError::Transient {
        url: String::new(),
        message: format!("invalid selector '{css}': {err}"),
    })
}

impl PacktpubAdapter {
    /// Creates the adapter against the production site.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Transient`] if a selector fails to compile.
    pub fn new(client: reqwest::Client) -> Result<Self, SourceError> {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    /// Creates the adapter against a custom endpoint, for tests.
    ///
    /// # Errors
    ///
    /// Same contract as [`PacktpubAdapter::new`].
    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client,
            base_url: Url::parse(base_url).map_err(|err| SourceError::Transient {
                url: base_url.to_string(),
                message: format!("invalid base URL: {err}"),
            })?,
            card: sel(".product-card-v2")?,
            card_link: sel("a.product-result-info-link")?,
            card_title: sel("div.product-result-title")?,
            next_page: sel("a.next-page-link")?,
            detail_title: sel("h1.product-title")?,
            detail_authors: sel("div.authors span")?,
            detail_authors_alt: sel(".product-page-author a")?,
            detail_key: sel("span.product-details-section-key")?,
            detail_value: sel("span.product-details-section-value")?,
            detail_description: sel(".product-book-content-details div.content-text")?,
            detail_tags: sel("div.product-page-rhs a")?,
            isbn13_pattern: Regex::new(r"(\d{13})").map_err(|err| SourceError::Transient {
                url: String::new(),
                message: format!("invalid pattern: {err}"),
            })?,
        })
    }

    fn search_url(&self, query: &str, page: u32) -> Result<Url, SourceError> {
        let mut url = self
            .base_url
            .join("/en-us/search")
            .map_err(|err| SourceError::Transient {
                url: self.base_url.to_string(),
                message: format!("failed to build search URL: {err}"),
            })?;
        url.query_pairs_mut()
            .append_pair("country", "us")
            .append_pair("language", "en")
            .append_pair("format", "eBook")
            .append_pair("status", "Available")
            .append_pair("q", query)
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    /// Extracts candidates from one search page. Synchronous: the parsed
    /// document must not outlive this call.
    fn parse_search_page(&self, html: &str) -> SearchPage {
        let document = Html::parse_document(html);

        let mut candidates = Vec::new();
        for card in document.select(&self.card) {
            let Some(link) = card.select(&self.card_link).next() else {
                continue;
            };
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Ok(detail_url) = self.base_url.join(href) else {
                continue;
            };

            // Analytics attributes are more stable than the rendered text.
            let title = card
                .value()
                .attr("data-analytics-item-title")
                .map(str::to_string)
                .filter(|t| !t.trim().is_empty())
                .or_else(|| card.select(&self.card_title).next().map(collapse_text))
                .unwrap_or_default();

            // Item ids look like "US-9781803239545-EBOOK".
            let native_id = card
                .value()
                .attr("data-analytics-item-id")
                .and_then(|id| self.isbn13_pattern.captures(id))
                .map(|caps| caps[1].to_string());

            candidates.push(CandidateReference {
                source: SourceKind::Packtpub,
                title,
                native_id,
                detail_url: detail_url.to_string(),
                search_rank: candidates.len() + 1,
            });
        }

        let has_more = document.select(&self.next_page).next().is_some();

        SearchPage {
            candidates,
            has_more,
        }
    }

    /// Reads the value span that follows a sidebar key span whose text
    /// starts with `key`.
    fn sidebar_value(&self, document: &Html, key: &str) -> Option<String> {
        for key_el in document.select(&self.detail_key) {
            if !collapse_text(key_el).starts_with(key) {
                continue;
            }
            let value = key_el
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|sibling| self.detail_value.matches(sibling))
                .map(collapse_text)
                .filter(|text| !text.is_empty());
            if value.is_some() {
                return value;
            }
        }
        None
    }

    /// Extracts detail fields from a product page. Synchronous for the
    /// same reason as [`PacktpubAdapter::parse_search_page`].
    fn parse_detail_page(&self, html: &str, url: &str) -> DetailRecord {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.detail_title)
            .next()
            .map(collapse_text)
            .unwrap_or_default();

        let mut authors: Vec<String> = document
            .select(&self.detail_authors)
            .map(collapse_text)
            .filter(|name| !name.is_empty())
            .collect();
        if authors.is_empty() {
            authors = document
                .select(&self.detail_authors_alt)
                .map(collapse_text)
                .filter(|name| !name.is_empty())
                .collect();
        }

        let isbn13 = self.sidebar_value(&document, "ISBN-13");
        let publication_date = self.sidebar_value(&document, "Publication date");

        let description = document
            .select(&self.detail_description)
            .next()
            .map(collapse_text)
            .filter(|text| !text.is_empty());

        let tags: Vec<String> = document
            .select(&self.detail_tags)
            .map(collapse_text)
            .filter(|tag| !tag.is_empty())
            .collect();

        let year = publication_date.as_deref().and_then(extract_year);
        let fingerprint = Fingerprint::compute(&title, &authors, year);

        DetailRecord {
            source: SourceKind::Packtpub,
            native_id: None,
            url: url.to_string(),
            title,
            authors,
            isbn10: None,
            isbn13,
            tags,
            publication_date,
            year,
            description,
            fingerprint,
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(|err| SourceError::from_reqwest(&err, url))?;

        if let Some(err) = SourceError::from_status(response.status(), url) {
            return Err(err);
        }

        response
            .text()
            .await
            .map_err(|err| SourceError::from_reqwest(&err, url))
    }
}

fn collapse_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for piece in element.text() {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(piece);
    }
    out
}

#[async_trait]
impl SourceAdapter for PacktpubAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Packtpub
    }

    #[instrument(skip(self), fields(source = "packtpub"))]
    async fn search(&self, query: &str, page: u32) -> Result<SearchPage, SourceError> {
        let url = self.search_url(query, page)?;
        let body = self.fetch_page(url.as_str()).await?;
        let result = self.parse_search_page(&body);
        debug!(
            page,
            count = result.candidates.len(),
            has_more = result.has_more,
            "packtpub search page fetched"
        );
        Ok(result)
    }

    #[instrument(skip(self, candidate), fields(source = "packtpub", url = %candidate.detail_url))]
    async fn fetch_detail(
        &self,
        candidate: &CandidateReference,
    ) -> Result<DetailRecord, SourceError> {
        let body = self.fetch_page(&candidate.detail_url).await?;
        let mut record = self.parse_detail_page(&body, &candidate.detail_url);
        record.native_id = candidate
            .native_id
            .clone()
            .or_else(|| record.isbn13.clone());
        Ok(record)
    }
}
