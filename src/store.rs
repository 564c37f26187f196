//! Dedup store client.
//!
//! [`BookStore`] is the single source of cross-run truth: existence
//! checks keyed by fingerprint or source-native id, and a conflict-aware
//! insert. Uniqueness is enforced by the store's indexes, not by any
//! in-process lock, so two pipelines (or two processes) racing through
//! the check-then-insert sequence cannot double-insert: the loser's
//! insert reports `inserted: false` instead of failing.

use thiserror::Error;
use tracing::instrument;

use crate::book::{DetailRecord, SourceKind};
use crate::db::Database;
use crate::fingerprint::Fingerprint;

/// Errors from store operations.
///
/// A uniqueness conflict is deliberately NOT an error; `insert` reports
/// it through its boolean return value.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database operation failed.
    #[error("store database error: {0}")]
    Database(String),

    /// A record field could not be encoded for storage.
    #[error("failed to encode record field: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Returns true when a sqlx error is a uniqueness-constraint conflict.
fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                || db_err
                    .code()
                    .as_deref()
                    .is_some_and(|code| code.starts_with("SQLITE_CONSTRAINT"))
        }
        _ => false,
    }
}

/// Persistent dedup store over SQLite.
///
/// Cheap to clone; all clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct BookStore {
    db: Database,
}

impl BookStore {
    /// Creates a store client over an established database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Checks whether a record with this fingerprint exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(fingerprint = %fingerprint))]
    pub async fn exists_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<bool, StoreError> {
        let count: (i64,) =
            sqlx::query_as(r"SELECT COUNT(*) FROM books WHERE fingerprint = ?")
                .bind(fingerprint.as_str())
                .fetch_one(self.db.pool())
                .await?;

        Ok(count.0 > 0)
    }

    /// Checks whether a record with this source-native id exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(source = %source, native_id = %native_id))]
    pub async fn exists_by_native_id(
        &self,
        source: SourceKind,
        native_id: &str,
    ) -> Result<bool, StoreError> {
        let count: (i64,) =
            sqlx::query_as(r"SELECT COUNT(*) FROM books WHERE source = ? AND native_id = ?")
                .bind(source.as_str())
                .bind(native_id)
                .fetch_one(self.db.pool())
                .await?;

        Ok(count.0 > 0)
    }

    /// Inserts a detail record.
    ///
    /// Returns `Ok(true)` when the record was stored, `Ok(false)` when a
    /// uniqueness constraint (fingerprint or (source, native_id)) made it
    /// a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for any failure other than a
    /// uniqueness conflict.
    #[instrument(skip(self, record), fields(source = %record.source, title = %record.title))]
    pub async fn insert(&self, record: &DetailRecord) -> Result<bool, StoreError> {
        let authors = serde_json::to_string(&record.authors)?;
        let tags = serde_json::to_string(&record.tags)?;

        let result = sqlx::query(
            r"INSERT INTO books (
                source,
                native_id,
                url,
                title,
                authors,
                isbn10,
                isbn13,
                tags,
                publication_date,
                year,
                description,
                fingerprint
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.source.as_str())
        .bind(record.native_id.as_deref())
        .bind(&record.url)
        .bind(&record.title)
        .bind(authors)
        .bind(record.isbn10.as_deref())
        .bind(record.isbn13.as_deref())
        .bind(tags)
        .bind(record.publication_date.as_deref())
        .bind(record.year)
        .bind(record.description.as_deref())
        .bind(record.fingerprint.as_str())
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Total number of stored records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as(r"SELECT COUNT(*) FROM books")
            .fetch_one(self.db.pool())
            .await?;

        Ok(count.0)
    }

    /// Closes the underlying connection pool.
    pub async fn close(self) {
        self.db.close().await;
    }
}
