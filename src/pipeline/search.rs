//! Search stage: sequential page walk for one (source, query) pair.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::book::CandidateReference;
use crate::source::{SourceAdapter, SourceError};

/// Walks search pages 1..=`max_pages` in order, concatenating candidates.
///
/// Pagination stops when the source reports no further page, the page
/// cap is reached, or cancellation fires. A failure on the first page
/// fails the whole search; a failure on a later page truncates it,
/// keeping what earlier pages produced.
///
/// # Errors
///
/// Returns the page-1 [`SourceError`] when the search could not start
/// at all.
#[instrument(skip(adapter, cancel), fields(source = %adapter.kind()))]
pub async fn run_search(
    adapter: &dyn SourceAdapter,
    query: &str,
    max_pages: u32,
    cancel: &CancellationToken,
) -> Result<Vec<CandidateReference>, SourceError> {
    let mut candidates = Vec::new();

    for page in 1..=max_pages.max(1) {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(page, "search cancelled");
                break;
            }
            result = adapter.search(query, page) => result,
        };

        match result {
            Ok(search_page) => {
                candidates.extend(search_page.candidates);
                if !search_page.has_more {
                    break;
                }
            }
            Err(err) if page == 1 => return Err(err),
            Err(err) => {
                warn!(page, error = %err, "search page failed; keeping earlier pages");
                break;
            }
        }
    }

    info!(
        query,
        count = candidates.len(),
        "search finished"
    );
    Ok(candidates)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::book::{DetailRecord, SourceKind};
    use crate::source::SearchPage;

    /// Adapter scripted with one canned result per page.
    struct ScriptedSearch {
        pages: Vec<Result<SearchPage, SourceError>>,
        calls: AtomicU32,
    }

    impl ScriptedSearch {
        fn new(pages: Vec<Result<SearchPage, SourceError>>) -> Self {
            Self {
                pages,
                calls: AtomicU32::new(0),
            }
        }
    }

    fn candidate(title: &str, rank: usize) -> CandidateReference {
        CandidateReference {
            source: SourceKind::Leanpub,
            title: title.to_string(),
            native_id: None,
            detail_url: format!("https://example.com/{rank}"),
            search_rank: rank,
        }
    }

    fn page_of(titles: &[&str], has_more: bool) -> Result<SearchPage, SourceError> {
        Ok(SearchPage {
            candidates: titles
                .iter()
                .enumerate()
                .map(|(i, t)| candidate(t, i + 1))
                .collect(),
            has_more,
        })
    }

    #[async_trait]
    impl SourceAdapter for ScriptedSearch {
        fn kind(&self) -> SourceKind {
            SourceKind::Leanpub
        }

        async fn search(&self, _query: &str, page: u32) -> Result<SearchPage, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages[(page - 1) as usize].clone()
        }

        async fn fetch_detail(
            &self,
            _candidate: &CandidateReference,
        ) -> Result<DetailRecord, SourceError> {
            unreachable!("search tests never fetch details")
        }
    }

    #[tokio::test]
    async fn test_walks_pages_until_no_more() {
        let adapter = ScriptedSearch::new(vec![
            page_of(&["A", "B"], true),
            page_of(&["C"], false),
            page_of(&["never"], false),
        ]);
        let cancel = CancellationToken::new();

        let out = run_search(&adapter, "rust", 10, &cancel).await.unwrap();
        let titles: Vec<&str> = out.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_page_cap_stops_pagination() {
        let adapter = ScriptedSearch::new(vec![
            page_of(&["A"], true),
            page_of(&["B"], true),
            page_of(&["C"], true),
        ]);
        let cancel = CancellationToken::new();

        let out = run_search(&adapter, "rust", 2, &cancel).await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_first_page_error_fails_search() {
        let adapter = ScriptedSearch::new(vec![Err(SourceError::Transient {
            url: "u".into(),
            message: "boom".into(),
        })]);
        let cancel = CancellationToken::new();

        assert!(run_search(&adapter, "rust", 3, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_later_page_error_truncates() {
        let adapter = ScriptedSearch::new(vec![
            page_of(&["A"], true),
            Err(SourceError::Timeout("u".into())),
        ]);
        let cancel = CancellationToken::new();

        let out = run_search(&adapter, "rust", 5, &cancel).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "A");
    }

    #[tokio::test]
    async fn test_cancellation_returns_accumulated_pages() {
        let adapter = ScriptedSearch::new(vec![page_of(&["A"], true), page_of(&["B"], true)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out = run_search(&adapter, "rust", 5, &cancel).await.unwrap();
        assert!(out.is_empty());
    }
}
