//! Leanpub catalog adapter.
//!
//! Leanpub exposes a cached JSON API, so no HTML parsing is involved:
//! search walks the paginated `simple_books` endpoint and details come
//! from the per-slug book endpoint. Authors arrive as a JSON:API
//! side-array (`included`) referenced by id from each book's
//! relationships.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::book::{extract_year, CandidateReference, DetailRecord, SourceKind};
use crate::fingerprint::Fingerprint;
use crate::source::{random_user_agent, SearchPage, SourceAdapter, SourceError};

const DEFAULT_BASE_URL: &str = "https://leanpub.com";

/// Full pages carry exactly this many entries; a short page is the last.
const PAGE_SIZE: usize = 100;

/// Adapter for the Leanpub JSON API.
pub struct LeanpubAdapter {
    client: reqwest::Client,
    base_url: String,
    closing_p: Regex,
    closing_li: Regex,
    any_tag: Regex,
    blank_runs: Regex,
    space_runs: Regex,
}

impl LeanpubAdapter {
    /// Creates the adapter against the production endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Transient`] if the description-cleanup
    /// patterns fail to compile.
    pub fn new(client: reqwest::Client) -> Result<Self, SourceError> {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    /// Creates the adapter against a custom endpoint, for tests.
    ///
    /// # Errors
    ///
    /// Same contract as [`LeanpubAdapter::new`].
    pub fn with_base_url(
        client: reqwest::Client,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            closing_p: compile(r"(?i)</p>")?,
            closing_li: compile(r"(?i)</li>")?,
            any_tag: compile(r"<[^>]*>")?,
            blank_runs: compile(r"\n{3,}")?,
            space_runs: compile(r" {2,}")?,
        })
    }

    fn detail_url(&self, slug: &str) -> String {
        format!("{}/api/v1/cache/books/{slug}.json", self.base_url)
    }

    /// Flattens the `about_the_book` HTML fragment into readable text.
    ///
    /// Closing paragraphs become blank lines and list items become line
    /// breaks before all remaining tags are stripped.
    fn clean_description(&self, html: &str) -> Option<String> {
        let text = unescape_entities(html);
        let text = self.closing_p.replace_all(&text, "\n\n");
        let text = self.closing_li.replace_all(&text, "\n");
        let text = self.any_tag.replace_all(&text, "");
        let text = self.blank_runs.replace_all(&text, "\n\n");
        let text = self.space_runs.replace_all(&text, " ");
        let text = text.trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

fn compile(pattern: &str) -> Result<Regex, SourceError> {
    Regex::new(pattern).map_err(|err| SourceError::Transient {
        url: String::new(),
        message: format!("invalid pattern: {err}"),
    })
}

/// Minimal entity decoding for catalog description fragments.
fn unescape_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

#[async_trait]
impl SourceAdapter for LeanpubAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Leanpub
    }

    #[instrument(skip(self), fields(source = "leanpub"))]
    async fn search(&self, query: &str, page: u32) -> Result<SearchPage, SourceError> {
        let url = format!("{}/api/v1/cache/simple_books.json", self.base_url);
        let page_param = page.to_string();
        let page_size_param = PAGE_SIZE.to_string();
        let params = [
            ("bookstore", "true"),
            ("filter_erotica", "true"),
            ("include", "accepted_authors"),
            ("language", "eng"),
            ("page", page_param.as_str()),
            ("page_size", page_size_param.as_str()),
            ("search", query),
            ("searchable", "true"),
            ("sellable", "true"),
            ("sort", "bestsellers_last_week"),
            ("type", "book"),
        ];

        let response = self
            .client
            .get(&url)
            .query(&params)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(|err| SourceError::from_reqwest(&err, &url))?;

        if let Some(err) = SourceError::from_status(response.status(), &url) {
            return Err(err);
        }

        let payload: SearchPayload =
            response
                .json()
                .await
                .map_err(|err| SourceError::Transient {
                    url: url.clone(),
                    message: format!("malformed search payload: {err}"),
                })?;

        let page_len = payload.data.len();
        let candidates = payload
            .data
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let title = item.attributes.title.clone()?;
                let slug = item.attributes.slug.as_deref()?;
                Some(CandidateReference {
                    source: SourceKind::Leanpub,
                    title,
                    native_id: item.id.clone(),
                    detail_url: self.detail_url(slug),
                    search_rank: index + 1,
                })
            })
            .collect();

        debug!(page, count = page_len, "leanpub search page fetched");

        Ok(SearchPage {
            candidates,
            has_more: page_len == PAGE_SIZE,
        })
    }

    #[instrument(skip(self, candidate), fields(source = "leanpub", url = %candidate.detail_url))]
    async fn fetch_detail(
        &self,
        candidate: &CandidateReference,
    ) -> Result<DetailRecord, SourceError> {
        let url = &candidate.detail_url;

        let response = self
            .client
            .get(url)
            .query(&[("include", "accepted_authors")])
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(|err| SourceError::from_reqwest(&err, url))?;

        if let Some(err) = SourceError::from_status(response.status(), url) {
            return Err(err);
        }

        let payload: DetailPayload =
            response
                .json()
                .await
                .map_err(|err| SourceError::Transient {
                    url: url.clone(),
                    message: format!("malformed detail payload: {err}"),
                })?;

        let Some(book) = payload.data else {
            return Err(SourceError::NotFound(url.clone()));
        };

        // Unpublished books have no publication timestamp; they carry no
        // detail worth keeping and never will at this URL.
        let Some(published_at) = book.attributes.last_published_at.as_deref() else {
            return Err(SourceError::NotFound(format!("unpublished book at {url}")));
        };

        let publication_date = published_at
            .split_once('T')
            .map_or(published_at, |(date, _)| date)
            .to_string();

        let title = book.attributes.title.clone().unwrap_or_default();

        // Relationship order is authoritative; the included array is an
        // unordered lookup table.
        let lookup: std::collections::HashMap<&str, &str> = payload
            .included
            .iter()
            .filter(|item| matches!(item.kind.as_deref(), Some("Author" | "SimpleAuthor")))
            .filter_map(|item| Some((item.id.as_deref()?, item.attributes.name.as_deref()?)))
            .collect();
        let authors: Vec<String> = book
            .relationships
            .accepted_authors
            .data
            .iter()
            .filter_map(|author_ref| author_ref.id.as_deref())
            .filter_map(|id| lookup.get(id).map(|name| (*name).to_string()))
            .collect();

        let tags: Vec<String> = book
            .attributes
            .categories
            .iter()
            .filter_map(|category| category.name.clone())
            .collect();

        let description = book
            .attributes
            .about_the_book
            .as_deref()
            .and_then(|html| self.clean_description(html));

        let year = extract_year(&publication_date);
        let fingerprint = Fingerprint::compute(&title, &authors, year);

        Ok(DetailRecord {
            source: SourceKind::Leanpub,
            native_id: book.id.clone().or_else(|| candidate.native_id.clone()),
            url: url.clone(),
            title,
            authors,
            isbn10: None,
            isbn13: None,
            tags,
            publication_date: Some(publication_date),
            year,
            description,
            fingerprint,
        })
    }
}

#[derive(Deserialize)]
struct SearchPayload {
    #[serde(default)]
    data: Vec<BookItem>,
}

#[derive(Deserialize)]
struct DetailPayload {
    data: Option<BookItem>,
    #[serde(default)]
    included: Vec<IncludedItem>,
}

#[derive(Deserialize)]
struct BookItem {
    id: Option<String>,
    #[serde(default)]
    attributes: BookAttributes,
    #[serde(default)]
    relationships: Relationships,
}

#[derive(Deserialize, Default)]
struct BookAttributes {
    title: Option<String>,
    slug: Option<String>,
    about_the_book: Option<String>,
    last_published_at: Option<String>,
    #[serde(default)]
    categories: Vec<Category>,
}

#[derive(Deserialize, Default)]
struct Category {
    name: Option<String>,
}

#[derive(Deserialize, Default)]
struct Relationships {
    #[serde(default)]
    accepted_authors: AuthorRefs,
}

#[derive(Deserialize, Default)]
struct AuthorRefs {
    #[serde(default)]
    data: Vec<AuthorRef>,
}

#[derive(Deserialize)]
struct AuthorRef {
    id: Option<String>,
}

#[derive(Deserialize)]
struct IncludedItem {
    #[serde(rename = "type")]
    kind: Option<String>,
    id: Option<String>,
    #[serde(default)]
    attributes: IncludedAttributes,
}

#[derive(Deserialize, Default)]
struct IncludedAttributes {
    name: Option<String>,
}
