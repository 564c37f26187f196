//! Amazon marketplace adapter.
//!
//! Search pages and detail pages are plain HTML; extraction is CSS
//! selector lookups over the fetched document. Sponsored result cards
//! wrap the real product URL inside a `/sspa/click` redirect whose
//! `url` query parameter carries the destination path; those are
//! unwrapped so the candidate points at the true detail page.
//!
//! `scraper::Html` is not `Send`, so every parse happens inside a
//! synchronous helper that drops the document before the surrounding
//! future suspends.

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::book::{extract_year, CandidateReference, DetailRecord, SourceKind};
use crate::fingerprint::Fingerprint;
use crate::source::{random_user_agent, SearchPage, SourceAdapter, SourceError};

const DEFAULT_BASE_URL: &str = "https://www.amazon.com";

struct SearchSelectors {
    card: Selector,
    title: Selector,
    detail_link: Selector,
    next_page: Selector,
    no_results: Selector,
}

struct DetailSelectors {
    title: Selector,
    authors: Selector,
    authors_alt: Selector,
    isbn10: Selector,
    isbn13: Selector,
    publication_date: Selector,
    description: Selector,
    description_alt: Selector,
    tags: Selector,
}

/// Adapter for the Amazon book marketplace.
pub struct AmazonAdapter {
    client: reqwest::Client,
    base_url: Url,
    search: SearchSelectors,
    detail: DetailSelectors,
    asin_pattern: Regex,
}

fn sel(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|err| SourceError::Transient {
        url: String::new(),
        message: format!("invalid selector '{css}': {err}"),
    })
}

fn parse_base(base_url: &str) -> Result<Url, SourceError> {
    Url::parse(base_url).map_err(|err| SourceError::Transient {
        url: base_url.to_string(),
        message: format!("invalid base URL: {err}"),
    })
}

impl AmazonAdapter {
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
    /// Same contract as [`AmazonAdapter::new`].
    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client,
            base_url: parse_base(base_url)?,
            search: SearchSelectors {
                card: sel(r#"[data-component-type="s-search-result"]"#)?,
                title: sel("h2 span")?,
                detail_link: sel("a.a-link-normal.s-line-clamp-2.s-link-style.a-text-normal")?,
                next_page: sel("a.s-pagination-next")?,
                no_results: sel("div.s-no-results-box h1.a-size-large")?,
            },
            detail: DetailSelectors {
                title: sel("#productTitle")?,
                authors: sel(".author a.a-link-normal")?,
                authors_alt: sel("#bylineInfo .a-link-normal")?,
                isbn10: sel("#rpi-attribute-book_details-isbn10 .rpi-attribute-value span")?,
                isbn13: sel("#rpi-attribute-book_details-isbn13 .rpi-attribute-value span")?,
                publication_date: sel(
                    "#rpi-attribute-book_details-publication_date .rpi-attribute-value span, \
                     #rpi-attribute-audiobook_details-release-date .rpi-attribute-value span",
                )?,
                description: sel("#bookDescription_feature_div .a-expander-content")?,
                description_alt: sel("#productDescription p")?,
                tags: sel("#detailBulletsWrapper_feature_div ul.zg_hrsr a")?,
            },
            asin_pattern: Regex::new(r"/(?:dp|gp/product)/([A-Z0-9]{10})").map_err(|err| {
                SourceError::Transient {
                    url: String::new(),
                    message: format!("invalid pattern: {err}"),
                }
            })?,
        })
    }

    fn search_url(&self, query: &str, page: u32) -> Result<Url, SourceError> {
        let mut url = self
            .base_url
            .join("/s")
            .map_err(|err| SourceError::Transient {
                url: self.base_url.to_string(),
                message: format!("failed to build search URL: {err}"),
            })?;
        url.query_pairs_mut()
            .append_pair("i", "stripbooks-intl-ship")
            .append_pair("k", query)
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    /// Resolves a result-card href to (detail URL, ASIN if derivable).
    ///
    /// Sponsored hrefs route through `/sspa/click`; the destination path
    /// is in the `url` query parameter, and the ASIN is re-derived from
    /// the destination's product path. Cards whose sponsored wrapper has
    /// no destination are unusable.
    fn resolve_card_href(
        &self,
        raw_href: &str,
        card_asin: Option<&str>,
    ) -> Option<(String, Option<String>)> {
        if raw_href.contains("/sspa/click") {
            let wrapped = self.base_url.join(raw_href).ok()?;
            let embedded = wrapped
                .query_pairs()
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned())?;
            let detail = self.base_url.join(&embedded).ok()?;
            let asin = self.derive_asin(detail.path());
            Some((detail.to_string(), asin))
        } else {
            let detail = self.base_url.join(raw_href).ok()?;
            Some((detail.to_string(), card_asin.map(str::to_string)))
        }
    }

    /// Reads the ASIN out of a `/dp/<ASIN>` or `/gp/product/<ASIN>`
    /// product path or URL.
    fn derive_asin(&self, url: &str) -> Option<String> {
        self.asin_pattern
            .captures(url)
            .map(|caps| caps[1].to_string())
    }

    /// Extracts candidates from one search page. Synchronous: the parsed
    /// document must not outlive this call.
    fn parse_search_page(&self, html: &str) -> SearchPage {
        let document = Html::parse_document(html);

        if document.select(&self.search.no_results).next().is_some() {
            return SearchPage {
                candidates: Vec::new(),
                has_more: false,
            };
        }

        let mut candidates = Vec::new();
        for card in document.select(&self.search.card) {
            let card_asin = card
                .value()
                .attr("data-asin")
                .filter(|asin| !asin.is_empty());

            let Some(link) = card.select(&self.search.detail_link).next() else {
                continue;
            };
            let Some(raw_href) = link.value().attr("href") else {
                continue;
            };
            let Some((detail_url, asin)) = self.resolve_card_href(raw_href, card_asin) else {
                warn!(href = raw_href, "skipping card with unusable link");
                continue;
            };

            let title = card
                .select(&self.search.title)
                .next()
                .map(collapse_text)
                .unwrap_or_default();

            candidates.push(CandidateReference {
                source: SourceKind::Amazon,
                title,
                native_id: asin,
                detail_url,
                search_rank: candidates.len() + 1,
            });
        }

        // The next-page link loses its anchor form when disabled, so any
        // match here means another page exists.
        let has_more = document.select(&self.search.next_page).next().is_some();

        SearchPage {
            candidates,
            has_more,
        }
    }

    /// Extracts detail fields from a product page. Synchronous for the
    /// same reason as [`AmazonAdapter::parse_search_page`].
    fn parse_detail_page(&self, html: &str, url: &str) -> DetailRecord {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.detail.title)
            .next()
            .map(collapse_text)
            .unwrap_or_default();

        let mut authors: Vec<String> = document
            .select(&self.detail.authors)
            .map(collapse_text)
            .filter(|name| !name.is_empty())
            .collect();
        if authors.is_empty() {
            authors = document
                .select(&self.detail.authors_alt)
                .map(collapse_text)
                .filter(|name| !name.is_empty())
                .collect();
        }
        dedupe_preserving_order(&mut authors);

        let isbn10 = first_text(&document, &self.detail.isbn10);
        let isbn13 = first_text(&document, &self.detail.isbn13);
        let publication_date = first_text(&document, &self.detail.publication_date);

        let description = first_text(&document, &self.detail.description)
            .or_else(|| first_text(&document, &self.detail.description_alt));

        let tags: Vec<String> = document
            .select(&self.detail.tags)
            .map(collapse_text)
            .filter(|tag| !tag.is_empty())
            .collect();

        let year = publication_date.as_deref().and_then(extract_year);
        let fingerprint = Fingerprint::compute(&title, &authors, year);

        DetailRecord {
            source: SourceKind::Amazon,
            native_id: None,
            url: url.to_string(),
            title,
            authors,
            isbn10,
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

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(collapse_text)
        .filter(|text| !text.is_empty())
}

fn dedupe_preserving_order(values: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    values.retain(|value| seen.insert(value.clone()));
}

#[async_trait]
impl SourceAdapter for AmazonAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Amazon
    }

    #[instrument(skip(self), fields(source = "amazon"))]
    async fn search(&self, query: &str, page: u32) -> Result<SearchPage, SourceError> {
        let url = self.search_url(query, page)?;
        let body = self.fetch_page(url.as_str()).await?;
        let result = self.parse_search_page(&body);
        debug!(
            page,
            count = result.candidates.len(),
            has_more = result.has_more,
            "amazon search page fetched"
        );
        Ok(result)
    }

    #[instrument(skip(self, candidate), fields(source = "amazon", url = %candidate.detail_url))]
    async fn fetch_detail(
        &self,
        candidate: &CandidateReference,
    ) -> Result<DetailRecord, SourceError> {
        let body = self.fetch_page(&candidate.detail_url).await?;
        let mut record = self.parse_detail_page(&body, &candidate.detail_url);
        record.native_id = candidate
            .native_id
            .clone()
            .or_else(|| self.derive_asin(&candidate.detail_url));
        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn adapter() -> AmazonAdapter {
        AmazonAdapter::new(reqwest::Client::new()).unwrap()
    }

    const SEARCH_PAGE: &str = r#"
        <html><body>
          <div data-component-type="s-search-result" data-asin="B0ABCDEF12">
            <h2><span>Rust in Action</span></h2>
            <a class="a-link-normal s-line-clamp-2 s-link-style a-text-normal"
               href="/Rust-Action/dp/B0ABCDEF12/ref=sr_1_1"></a>
          </div>
          <div data-component-type="s-search-result" data-asin="">
            <h2><span>Sponsored Rust Book</span></h2>
            <a class="a-link-normal s-line-clamp-2 s-link-style a-text-normal"
               href="/sspa/click?ie=UTF8&amp;spc=X&amp;url=%2FSponsored-Rust%2Fdp%2FB0SPONSOR1%2Fref%3Dsr"></a>
          </div>
          <a class="s-pagination-next" href="/s?k=rust&amp;page=2">Next</a>
        </body></html>"#;

    #[test]
    fn test_parse_search_page_extracts_cards() {
        let page = adapter().parse_search_page(SEARCH_PAGE);
        assert_eq!(page.candidates.len(), 2);
        assert!(page.has_more);

        let first = &page.candidates[0];
        assert_eq!(first.title, "Rust in Action");
        assert_eq!(first.native_id.as_deref(), Some("B0ABCDEF12"));
        assert!(first.detail_url.starts_with("https://www.amazon.com/Rust-Action/dp/"));
        assert_eq!(first.search_rank, 1);
    }

    #[test]
    fn test_sponsored_card_unwraps_destination_and_asin() {
        let page = adapter().parse_search_page(SEARCH_PAGE);
        let sponsored = &page.candidates[1];
        assert_eq!(
            sponsored.detail_url,
            "https://www.amazon.com/Sponsored-Rust/dp/B0SPONSOR1/ref=sr"
        );
        assert_eq!(sponsored.native_id.as_deref(), Some("B0SPONSOR1"));
    }

    #[test]
    fn test_sponsored_card_without_destination_is_skipped() {
        let html = r#"
            <div data-component-type="s-search-result">
              <h2><span>Broken</span></h2>
              <a class="a-link-normal s-line-clamp-2 s-link-style a-text-normal"
                 href="/sspa/click?ie=UTF8&amp;spc=X"></a>
            </div>"#;
        let page = adapter().parse_search_page(html);
        assert!(page.candidates.is_empty());
    }

    #[test]
    fn test_no_results_page() {
        let html = r#"
            <div class="s-no-results-box"><h1 class="a-size-large">No results</h1></div>"#;
        let page = adapter().parse_search_page(html);
        assert!(page.candidates.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn test_last_page_has_no_more() {
        let html = r#"
            <div data-component-type="s-search-result" data-asin="B0ABCDEF12">
              <h2><span>Only Book</span></h2>
              <a class="a-link-normal s-line-clamp-2 s-link-style a-text-normal"
                 href="/Only-Book/dp/B0ABCDEF12"></a>
            </div>
            <span class="s-pagination-next s-pagination-disabled">Next</span>"#;
        let page = adapter().parse_search_page(html);
        assert_eq!(page.candidates.len(), 1);
        assert!(!page.has_more);
    }

    #[test]
    fn test_parse_detail_page_full_record() {
        let html = r##"
            <html><body>
              <span id="productTitle"> Rust in Action </span>
              <span class="author"><a class="a-link-normal" href="#">Tim McNamara</a></span>
              <div id="rpi-attribute-book_details-isbn10">
                <div class="rpi-attribute-value"><span>1617294551</span></div>
              </div>
              <div id="rpi-attribute-book_details-isbn13">
                <div class="rpi-attribute-value"><span>978-1617294556</span></div>
              </div>
              <div id="rpi-attribute-book_details-publication_date">
                <div class="rpi-attribute-value"><span>June 29, 2021</span></div>
              </div>
              <div id="bookDescription_feature_div">
                <div class="a-expander-content">Systems programming with Rust.</div>
              </div>
              <div id="detailBulletsWrapper_feature_div">
                <ul class="zg_hrsr"><li><a href="#">Programming</a></li></ul>
              </div>
            </body></html>"##;

        let record = adapter().parse_detail_page(html, "https://www.amazon.com/dp/B0ABCDEF12");
        assert_eq!(record.title, "Rust in Action");
        assert_eq!(record.authors, vec!["Tim McNamara"]);
        assert_eq!(record.isbn10.as_deref(), Some("1617294551"));
        assert_eq!(record.isbn13.as_deref(), Some("978-1617294556"));
        assert_eq!(record.publication_date.as_deref(), Some("June 29, 2021"));
        assert_eq!(record.year, Some(2021));
        assert_eq!(record.tags, vec!["Programming"]);
        assert_eq!(
            record.description.as_deref(),
            Some("Systems programming with Rust.")
        );
    }

    #[test]
    fn test_parse_detail_page_byline_fallback_dedupes_authors() {
        let html = r##"
            <div id="bylineInfo">
              <a class="a-link-normal" href="#">Jane Roe</a>
              <a class="a-link-normal" href="#">Jane Roe</a>
            </div>"##;
        let record = adapter().parse_detail_page(html, "https://www.amazon.com/dp/B0ABCDEF12");
        assert_eq!(record.authors, vec!["Jane Roe"]);
        assert!(record.title.is_empty());
    }

    #[test]
    fn test_derive_asin_from_product_url() {
        let adapter = adapter();
        assert_eq!(
            adapter.derive_asin("https://www.amazon.com/Rust-Action/dp/B0ABCDEF12/ref=sr_1_1"),
            Some("B0ABCDEF12".to_string())
        );
        assert_eq!(
            adapter.derive_asin("https://www.amazon.com/gp/product/1617294551"),
            Some("1617294551".to_string())
        );
        assert_eq!(adapter.derive_asin("https://www.amazon.com/s?k=rust"), None);
    }

    #[test]
    fn test_search_url_encodes_query() {
        let url = adapter().search_url("c++ programming", 2).unwrap();
        assert!(url.as_str().contains("k=c%2B%2B+programming"));
        assert!(url.as_str().contains("page=2"));
    }
}
