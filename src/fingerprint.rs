//! Content-hash identity for book records.
//!
//! A [`Fingerprint`] is a SHA-256 digest over the normalized tuple
//! (title, authors, year). It is the primary dedup key at every tier:
//! within a search batch, against the persistent store before a detail
//! fetch, and again after the fetch once the authoritative fields are
//! known.
//!
//! Normalization rules:
//! - title: trimmed, lowercased
//! - authors: each trimmed and lowercased, empty entries dropped, then
//!   sorted so that author order never changes the identity
//! - year: decimal string, or empty when absent
//!
//! The three parts are joined with ASCII unit/record separators, which do
//! not occur in natural text, before hashing. `compute` is total: empty
//! titles and empty author lists produce a valid (low-confidence)
//! fingerprint rather than an error.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Separator between the title, author and year parts.
const FIELD_SEPARATOR: char = '\u{1f}';

/// Separator between normalized author names.
const AUTHOR_SEPARATOR: char = '\u{1e}';

/// Stable content-hash identity for a book, hex-encoded SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint for a (title, authors, year) tuple.
    ///
    /// Invariant under author permutation and under whitespace/case
    /// variation in title and author names. Distinct spellings remain
    /// distinct; no fuzzy matching happens here.
    #[must_use]
    pub fn compute(title: &str, authors: &[String], year: Option<i32>) -> Self {
        let title = title.trim().to_lowercase();

        let mut authors: Vec<String> = authors
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        authors.sort();
        let authors = authors.join(&AUTHOR_SEPARATOR.to_string());

        let year = year.map(|y| y.to_string()).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
        hasher.update(authors.as_bytes());
        hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
        hasher.update(year.as_bytes());

        let digest = hasher.finalize();
        Self(hex_encode(&digest))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing to a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    out
}
