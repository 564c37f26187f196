//! Data model for the discovery pipeline.
//!
//! [`CandidateReference`] is a lightweight, unverified hit from a search
//! page. Candidates flow through the deduplicators and, if they survive,
//! are promoted to detail-fetch work producing a [`DetailRecord`]. Each
//! surviving candidate yields exactly one [`Outcome`], consumed once by
//! the result aggregator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Supported book sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Marketplace with HTML search pages and native item ids (ASINs).
    Amazon,
    /// API-backed catalog returning JSON search and detail payloads.
    Leanpub,
    /// HTML catalog with paginated search results.
    Packtpub,
}

impl SourceKind {
    /// Stable lowercase tag, used for store columns and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::Leanpub => "leanpub",
            Self::Packtpub => "packtpub",
        }
    }

    /// All supported sources, in default run order.
    #[must_use]
    pub fn all() -> &'static [SourceKind] {
        &[Self::Amazon, Self::Leanpub, Self::Packtpub]
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "amazon" => Ok(Self::Amazon),
            "leanpub" => Ok(Self::Leanpub),
            "packtpub" => Ok(Self::Packtpub),
            other => Err(format!(
                "unknown source '{other}' (expected one of: amazon, leanpub, packtpub)"
            )),
        }
    }
}

/// An unverified book reference produced by the search stage.
///
/// Immutable once created; either promoted to a detail fetch or dropped
/// by a deduplicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateReference {
    /// Which source surfaced this candidate.
    pub source: SourceKind,
    /// Title as shown on the search page. May be empty until the detail
    /// fetch fills in the authoritative value.
    pub title: String,
    /// Source-native identifier (e.g. an ASIN or catalog id), when the
    /// source provides one.
    pub native_id: Option<String>,
    /// Absolute URL of the detail page or detail API endpoint.
    pub detail_url: String,
    /// Ordinal position within its search page, for diagnostics only.
    pub search_rank: usize,
}

impl CandidateReference {
    /// Pre-fetch fingerprint approximation from the search-page title.
    ///
    /// Authors and year are unknown before the detail fetch, so this is a
    /// cheap pre-filter key, not a correctness guarantee; the scheduler
    /// recomputes the fingerprint from the detail record.
    #[must_use]
    pub fn approximate_fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.title, &[], None)
    }
}

/// A fully fetched book record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub source: SourceKind,
    /// Source-native identifier carried over from the candidate (or
    /// re-read from the detail payload when the source provides one).
    pub native_id: Option<String>,
    pub url: String,
    pub title: String,
    /// Ordered author list as extracted; may be empty.
    pub authors: Vec<String>,
    pub isbn10: Option<String>,
    pub isbn13: Option<String>,
    pub tags: Vec<String>,
    /// Publication date exactly as scraped.
    pub publication_date: Option<String>,
    /// Year derived from `publication_date`, when parseable.
    pub year: Option<i32>,
    pub description: Option<String>,
    /// Always present, even for an empty title (low-confidence hash of
    /// the empty string); never dropped.
    pub fingerprint: Fingerprint,
}

/// Why a candidate was classified as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    /// Seen earlier within the same search run.
    IntraBatch,
    /// Already present in the persistent store.
    AlreadyInStore,
}

impl fmt::Display for DuplicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntraBatch => f.write_str("intra-batch"),
            Self::AlreadyInStore => f.write_str("already-in-store"),
        }
    }
}

/// A detail fetch that ended in failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFetch {
    pub url: String,
    pub source: SourceKind,
    /// Last error observed, for the failed-URL report.
    pub last_error: String,
    /// Attempts consumed, including the final one.
    pub attempts: u32,
    /// True for not-found / missing-title failures, false when the retry
    /// budget was exhausted on transient errors.
    pub permanent: bool,
}

/// Terminal classification of one surviving candidate.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Detail fetch succeeded and the record is new.
    Success(DetailRecord),
    /// Candidate collapsed onto an already-known identity.
    Duplicate {
        kind: DuplicateKind,
        /// The native id or fingerprint that collided.
        key: String,
    },
    /// Detail fetch failed permanently or exhausted its retry budget.
    Failed(FailedFetch),
}

/// Extracts a publication year from a scraped date string.
///
/// Accepts `YYYY-MM-DD`, `Month D, YYYY` and bare `YYYY` shapes, the
/// formats observed across the supported sources.
#[must_use]
pub fn extract_year(date: &str) -> Option<i32> {
    let date = date.trim();
    if date.is_empty() {
        return None;
    }

    // ISO date: the year is the leading segment.
    if let Some((head, _)) = date.split_once('-') {
        return parse_year_token(head);
    }

    // Bare year.
    if let Some(year) = parse_year_token(date) {
        return Some(year);
    }

    // "December 17, 2019" and friends: the year is the trailing token.
    date.rsplit(|c: char| c.is_whitespace() || c == ',')
        .find_map(parse_year_token)
}

fn parse_year_token(token: &str) -> Option<i32> {
    let token = token.trim();
    if token.len() != 4 || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year = token.parse::<i32>().ok()?;
    (1000..=2999).contains(&year).then_some(year)
}
