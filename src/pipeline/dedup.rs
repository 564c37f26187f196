//! Candidate deduplication.
//!
//! Two tiers run before any detail fetch: an in-memory pass collapsing
//! repeats within the current batch, then a store pass dropping
//! candidates the persistent store already knows. A third, post-fetch
//! check lives in the fetch scheduler, where the authoritative
//! fingerprint is finally available.

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::book::CandidateReference;
use crate::store::BookStore;

/// Identity key for intra-batch dedup: the native id when present,
/// otherwise the (title, url) pair. The prefix keeps the two key
/// families from colliding.
fn batch_key(candidate: &CandidateReference) -> String {
    match &candidate.native_id {
        Some(id) => format!("id:{id}"),
        None => format!("tu:{}\u{1f}{}", candidate.title, candidate.detail_url),
    }
}

/// Collapses repeats within one batch, first occurrence wins.
///
/// Returns the survivors in original order and the number dropped.
#[must_use]
pub fn dedup_within_batch(
    candidates: Vec<CandidateReference>,
) -> (Vec<CandidateReference>, usize) {
    let mut seen = std::collections::HashSet::new();
    let before = candidates.len();

    let survivors: Vec<CandidateReference> = candidates
        .into_iter()
        .filter(|candidate| seen.insert(batch_key(candidate)))
        .collect();

    let dropped = before - survivors.len();
    debug!(before, dropped, "intra-batch dedup");
    (survivors, dropped)
}

/// Partitions candidates into fresh vs already-known-to-the-store.
///
/// Existence checks run concurrently, at most `concurrency` in flight,
/// and results keep the input order. A candidate with a native id is
/// checked by (source, native id); otherwise by its approximate
/// fingerprint. A store read error counts as "not known": the candidate
/// proceeds, and the post-fetch re-check plus the insert constraint
/// still prevent a double record.
#[instrument(skip_all, fields(count = candidates.len()))]
pub async fn partition_against_store(
    store: &BookStore,
    candidates: Vec<CandidateReference>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> (Vec<CandidateReference>, usize) {
    if candidates.is_empty() {
        return (Vec::new(), 0);
    }

    let checks = stream::iter(candidates)
        .map(|candidate| async move {
            let known = match &candidate.native_id {
                Some(native_id) => store.exists_by_native_id(candidate.source, native_id).await,
                None => {
                    store
                        .exists_by_fingerprint(&candidate.approximate_fingerprint())
                        .await
                }
            };
            let known = match known {
                Ok(known) => known,
                Err(err) => {
                    warn!(
                        url = %candidate.detail_url,
                        error = %err,
                        "store check failed; treating candidate as new"
                    );
                    false
                }
            };
            (candidate, known)
        })
        .buffered(concurrency.max(1));

    let mut fresh = Vec::new();
    let mut known_count = 0usize;

    tokio::pin!(checks);
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = checks.next() => next,
        };
        match next {
            Some((candidate, true)) => {
                debug!(url = %candidate.detail_url, "candidate already in store");
                known_count += 1;
            }
            Some((candidate, false)) => fresh.push(candidate),
            None => break,
        }
    }

    (fresh, known_count)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::book::{DetailRecord, SourceKind};
    use crate::db::Database;
    use crate::fingerprint::Fingerprint;

    fn candidate(
        title: &str,
        native_id: Option<&str>,
        url: &str,
        rank: usize,
    ) -> CandidateReference {
        CandidateReference {
            source: SourceKind::Amazon,
            title: title.to_string(),
            native_id: native_id.map(str::to_string),
            detail_url: url.to_string(),
            search_rank: rank,
        }
    }

    #[test]
    fn test_intra_batch_first_occurrence_wins_on_native_id() {
        let (survivors, dropped) = dedup_within_batch(vec![
            candidate("First", Some("A1"), "https://e.com/1", 1),
            candidate("Second", Some("A2"), "https://e.com/2", 2),
            candidate("First again", Some("A1"), "https://e.com/3", 3),
        ]);

        assert_eq!(dropped, 1);
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].title, "First");
        assert_eq!(survivors[1].title, "Second");
    }

    #[test]
    fn test_intra_batch_falls_back_to_title_url() {
        let (survivors, dropped) = dedup_within_batch(vec![
            candidate("T", None, "https://e.com/x", 1),
            candidate("T", None, "https://e.com/x", 2),
            // Same title, different URL: distinct identity.
            candidate("T", None, "https://e.com/y", 3),
        ]);

        assert_eq!(dropped, 1);
        assert_eq!(survivors.len(), 2);
    }

    #[test]
    fn test_intra_batch_id_and_title_keys_do_not_collide() {
        let (survivors, dropped) = dedup_within_batch(vec![
            candidate("X", Some("K"), "https://e.com/1", 1),
            // No native id; must not collide with the id key above.
            candidate("K", None, "https://e.com/1", 2),
        ]);
        assert_eq!(dropped, 0);
        assert_eq!(survivors.len(), 2);
    }

    async fn seeded_store() -> BookStore {
        let store = BookStore::new(Database::new_in_memory().await.unwrap());
        let title = "Known Book";
        let record = DetailRecord {
            source: SourceKind::Amazon,
            native_id: Some("KNOWN00001".to_string()),
            url: "https://e.com/known".to_string(),
            title: title.to_string(),
            authors: vec![],
            isbn10: None,
            isbn13: None,
            tags: vec![],
            publication_date: None,
            year: None,
            description: None,
            fingerprint: Fingerprint::compute(title, &[], None),
        };
        store.insert(&record).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_store_partition_by_native_id() {
        let store = seeded_store().await;
        let cancel = CancellationToken::new();

        let (fresh, known) = partition_against_store(
            &store,
            vec![
                candidate("Known Book", Some("KNOWN00001"), "https://e.com/known", 1),
                candidate("New Book", Some("NEW0000001"), "https://e.com/new", 2),
            ],
            4,
            &cancel,
        )
        .await;

        assert_eq!(known, 1);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].title, "New Book");
    }

    #[tokio::test]
    async fn test_store_partition_by_fingerprint_without_native_id() {
        let store = seeded_store().await;
        let cancel = CancellationToken::new();

        let (fresh, known) = partition_against_store(
            &store,
            vec![
                candidate("Known Book", None, "https://other.com/1", 1),
                candidate("Unseen Book", None, "https://other.com/2", 2),
            ],
            4,
            &cancel,
        )
        .await;

        assert_eq!(known, 1);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].title, "Unseen Book");
    }

    #[tokio::test]
    async fn test_store_partition_preserves_order() {
        let store = seeded_store().await;
        let cancel = CancellationToken::new();

        let input: Vec<CandidateReference> = (1..=8)
            .map(|i| {
                candidate(
                    &format!("Book {i}"),
                    None,
                    &format!("https://e.com/{i}"),
                    i,
                )
            })
            .collect();

        let (fresh, known) = partition_against_store(&store, input, 3, &cancel).await;
        assert_eq!(known, 0);
        let ranks: Vec<usize> = fresh.iter().map(|c| c.search_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_store_partition_cancelled_returns_early() {
        let store = seeded_store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (fresh, known) = partition_against_store(
            &store,
            vec![candidate("Book", None, "https://e.com/1", 1)],
            4,
            &cancel,
        )
        .await;

        assert!(fresh.is_empty());
        assert_eq!(known, 0);
    }
}
