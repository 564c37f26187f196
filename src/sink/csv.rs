//! CSV file sink: one file for collected books, one for failed URLs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::book::{DetailRecord, FailedFetch};
use crate::sink::{OutputSink, SinkError};

const BOOK_HEADERS: [&str; 11] = [
    "source",
    "title",
    "authors",
    "isbn10",
    "isbn13",
    "tags",
    "publication_date",
    "year",
    "url",
    "description",
    "fingerprint",
];

const FAILURE_HEADERS: [&str; 5] = ["url", "source", "error", "attempts", "permanent"];

/// Writes run results to CSV files.
pub struct CsvSink {
    books_path: PathBuf,
    failures_path: PathBuf,
}

impl CsvSink {
    /// Creates a sink writing `<prefix>_books.csv` and
    /// `<prefix>_failed_urls.csv`.
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            books_path: PathBuf::from(format!("{prefix}_books.csv")),
            failures_path: PathBuf::from(format!("{prefix}_failed_urls.csv")),
        }
    }

    /// Creates a sink with explicit output paths.
    #[must_use]
    pub fn new(books_path: impl Into<PathBuf>, failures_path: impl Into<PathBuf>) -> Self {
        Self {
            books_path: books_path.into(),
            failures_path: failures_path.into(),
        }
    }

    #[must_use]
    pub fn books_path(&self) -> &Path {
        &self.books_path
    }

    #[must_use]
    pub fn failures_path(&self) -> &Path {
        &self.failures_path
    }

    fn write_books(&self, records: &[DetailRecord]) -> Result<(), SinkError> {
        let mut writer = csv::Writer::from_path(&self.books_path)?;
        writer.write_record(BOOK_HEADERS)?;

        for record in records {
            writer.write_record([
                record.source.as_str(),
                record.title.as_str(),
                &record.authors.join("; "),
                record.isbn10.as_deref().unwrap_or(""),
                record.isbn13.as_deref().unwrap_or(""),
                &record.tags.join("; "),
                record.publication_date.as_deref().unwrap_or(""),
                &record.year.map(|y| y.to_string()).unwrap_or_default(),
                record.url.as_str(),
                record.description.as_deref().unwrap_or(""),
                record.fingerprint.as_str(),
            ])?;
        }

        writer.flush()?;
        Ok(())
    }

    fn write_failures(&self, failures: &[FailedFetch]) -> Result<(), SinkError> {
        let mut writer = csv::Writer::from_path(&self.failures_path)?;
        writer.write_record(FAILURE_HEADERS)?;

        for failure in failures {
            writer.write_record([
                failure.url.as_str(),
                failure.source.as_str(),
                failure.last_error.as_str(),
                &failure.attempts.to_string(),
                if failure.permanent { "true" } else { "false" },
            ])?;
        }

        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl OutputSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    #[instrument(skip_all, fields(books = records.len(), failures = failures.len()))]
    async fn flush(
        &self,
        records: &[DetailRecord],
        failures: &[FailedFetch],
    ) -> Result<(), SinkError> {
        self.write_books(records)?;
        info!(path = %self.books_path.display(), count = records.len(), "books written");

        // No failures file on a clean run.
        if !failures.is_empty() {
            self.write_failures(failures)?;
            info!(
                path = %self.failures_path.display(),
                count = failures.len(),
                "failed URLs written"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::book::SourceKind;
    use crate::fingerprint::Fingerprint;

    fn record(title: &str) -> DetailRecord {
        let authors = vec!["A. One".to_string(), "B. Two".to_string()];
        DetailRecord {
            source: SourceKind::Packtpub,
            native_id: None,
            url: format!("https://e.com/{title}"),
            title: title.to_string(),
            authors: authors.clone(),
            isbn10: Some("1234567890".to_string()),
            isbn13: None,
            tags: vec!["rust".to_string()],
            publication_date: Some("2024-05-01".to_string()),
            year: Some(2024),
            description: Some("About, with commas".to_string()),
            fingerprint: Fingerprint::compute(title, &authors, Some(2024)),
        }
    }

    #[tokio::test]
    async fn test_flush_writes_books_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("books.csv"), dir.path().join("failed.csv"));

        sink.flush(&[record("One"), record("Two")], &[]).await.unwrap();

        let content = std::fs::read_to_string(sink.books_path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "source,title,authors,isbn10,isbn13,tags,publication_date,year,url,description,fingerprint"
        );
        assert_eq!(lines.count(), 2);
        assert!(content.contains("A. One; B. Two"));
        // Commas in fields must be quoted, not split.
        assert!(content.contains("\"About, with commas\""));
    }

    #[tokio::test]
    async fn test_no_failures_file_on_clean_run() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("books.csv"), dir.path().join("failed.csv"));

        sink.flush(&[record("One")], &[]).await.unwrap();

        assert!(sink.books_path().exists());
        assert!(!sink.failures_path().exists());
    }

    #[tokio::test]
    async fn test_failures_file_written_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("books.csv"), dir.path().join("failed.csv"));

        let failure = FailedFetch {
            url: "https://e.com/broken".to_string(),
            source: SourceKind::Amazon,
            last_error: "timed out".to_string(),
            attempts: 3,
            permanent: false,
        };
        sink.flush(&[], &[failure]).await.unwrap();

        let content = std::fs::read_to_string(sink.failures_path()).unwrap();
        assert!(content.starts_with("url,source,error,attempts,permanent"));
        assert!(content.contains("https://e.com/broken,amazon,timed out,3,false"));
    }

    #[test]
    fn test_prefix_naming() {
        let sink = CsvSink::with_prefix("run1");
        assert_eq!(sink.books_path(), Path::new("run1_books.csv"));
        assert_eq!(sink.failures_path(), Path::new("run1_failed_urls.csv"));
    }
}
