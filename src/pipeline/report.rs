//! Result aggregation.
//!
//! One [`Aggregator`] is shared by every concurrent source pipeline; it
//! keeps one counter block per (source, query) segment plus the
//! collected records and failures, and performs no I/O itself. A success
//! whose fingerprint was already recorded earlier in the run is
//! reclassified as a duplicate, so the report never carries the same
//! identity twice. Output sinks consume an immutable [`RunReport`]
//! snapshot after the run.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::debug;

use crate::book::{DetailRecord, DuplicateKind, FailedFetch, Outcome, SourceKind};

/// Shared run counters and collected results.
#[derive(Debug, Default)]
pub struct Aggregator {
    segments: Mutex<HashMap<(SourceKind, String), RunCounts>>,
    recorded_fingerprints: Mutex<HashSet<String>>,
    records: Mutex<Vec<DetailRecord>>,
    failures: Mutex<Vec<FailedFetch>>,
}

/// Counter totals for one (source, query) segment, or summed for the
/// whole run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunCounts {
    /// Raw candidates produced by the search stage.
    pub candidates: usize,
    /// Dropped by intra-batch dedup.
    pub intra_duplicates: usize,
    /// Dropped by the pre-fetch store check.
    pub store_duplicates: usize,
    /// Reclassified by the post-fetch fingerprint re-check, or collapsed
    /// onto an identity already recorded earlier in this run.
    pub post_fetch_duplicates: usize,
    pub succeeded: usize,
    pub failed_permanent: usize,
    /// Retry budget exhausted on transient failures.
    pub failed_exhausted: usize,
}

impl RunCounts {
    /// Total failures of either kind.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed_permanent + self.failed_exhausted
    }

    /// Total duplicates across all three tiers.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.intra_duplicates + self.store_duplicates + self.post_fetch_duplicates
    }

    fn merge(&mut self, other: &RunCounts) {
        self.candidates += other.candidates;
        self.intra_duplicates += other.intra_duplicates;
        self.store_duplicates += other.store_duplicates;
        self.post_fetch_duplicates += other.post_fetch_duplicates;
        self.succeeded += other.succeeded;
        self.failed_permanent += other.failed_permanent;
        self.failed_exhausted += other.failed_exhausted;
    }
}

/// Counters for one (source, query) pair.
#[derive(Debug, Clone)]
pub struct SegmentCounts {
    pub source: SourceKind,
    pub query: String,
    pub counts: RunCounts,
}

/// Immutable end-of-run snapshot consumed by the sinks.
#[derive(Debug)]
pub struct RunReport {
    /// Totals summed across all segments.
    pub counts: RunCounts,
    /// Per-(source, query) counters, ordered by source then query.
    pub segments: Vec<SegmentCounts>,
    pub records: Vec<DetailRecord>,
    pub failures: Vec<FailedFetch>,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_segment(
        &self,
        source: SourceKind,
        query: &str,
        update: impl FnOnce(&mut RunCounts),
    ) {
        if let Ok(mut segments) = self.segments.lock() {
            update(segments.entry((source, query.to_string())).or_default());
        }
    }

    /// Records how many raw candidates a search produced.
    pub fn add_candidates(&self, source: SourceKind, query: &str, count: usize) {
        self.with_segment(source, query, |counts| counts.candidates += count);
    }

    /// Records candidates dropped by intra-batch dedup.
    pub fn add_intra_duplicates(&self, source: SourceKind, query: &str, count: usize) {
        self.with_segment(source, query, |counts| counts.intra_duplicates += count);
    }

    /// Records candidates dropped by the pre-fetch store check.
    pub fn add_store_duplicates(&self, source: SourceKind, query: &str, count: usize) {
        self.with_segment(source, query, |counts| counts.store_duplicates += count);
    }

    /// Consumes one terminal outcome from the fetch scheduler.
    ///
    /// A success whose fingerprint matches one already recorded in this
    /// run is reclassified as an already-in-store duplicate: nothing is
    /// inserted until the sinks flush, so the store's unique index has
    /// not seen the first copy yet, and the report must not carry the
    /// identity twice.
    pub fn record_outcome(&self, source: SourceKind, query: &str, outcome: Outcome) {
        let outcome = match outcome {
            Outcome::Success(record) => {
                let first_occurrence = self
                    .recorded_fingerprints
                    .lock()
                    .map(|mut seen| seen.insert(record.fingerprint.as_str().to_string()))
                    .unwrap_or(true);
                if first_occurrence {
                    Outcome::Success(record)
                } else {
                    Outcome::Duplicate {
                        kind: DuplicateKind::AlreadyInStore,
                        key: record.fingerprint.as_str().to_string(),
                    }
                }
            }
            other => other,
        };

        match outcome {
            Outcome::Success(record) => {
                self.with_segment(source, query, |counts| counts.succeeded += 1);
                if let Ok(mut records) = self.records.lock() {
                    records.push(record);
                }
            }
            Outcome::Duplicate { kind, key } => {
                debug!(%kind, key, "duplicate outcome");
                match kind {
                    DuplicateKind::IntraBatch => {
                        self.with_segment(source, query, |counts| counts.intra_duplicates += 1);
                    }
                    DuplicateKind::AlreadyInStore => {
                        self.with_segment(source, query, |counts| {
                            counts.post_fetch_duplicates += 1;
                        });
                    }
                }
            }
            Outcome::Failed(failure) => {
                if failure.permanent {
                    self.with_segment(source, query, |counts| counts.failed_permanent += 1);
                } else {
                    self.with_segment(source, query, |counts| counts.failed_exhausted += 1);
                }
                if let Ok(mut failures) = self.failures.lock() {
                    failures.push(failure);
                }
            }
        }
    }

    /// Takes the final snapshot, draining segments and collected records.
    #[must_use]
    pub fn snapshot(&self) -> RunReport {
        let mut segments: Vec<SegmentCounts> = self
            .segments
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
            .into_iter()
            .map(|((source, query), counts)| SegmentCounts {
                source,
                query,
                counts,
            })
            .collect();
        segments.sort_by(|a, b| {
            a.source
                .as_str()
                .cmp(b.source.as_str())
                .then_with(|| a.query.cmp(&b.query))
        });

        let mut counts = RunCounts::default();
        for segment in &segments {
            counts.merge(&segment.counts);
        }

        let records = self
            .records
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();
        let failures = self
            .failures
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();

        RunReport {
            counts,
            segments,
            records,
            failures,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;

    fn success(title: &str) -> Outcome {
        Outcome::Success(DetailRecord {
            source: SourceKind::Leanpub,
            native_id: None,
            url: format!("https://e.com/{title}"),
            title: title.to_string(),
            authors: vec![],
            isbn10: None,
            isbn13: None,
            tags: vec![],
            publication_date: None,
            year: None,
            description: None,
            fingerprint: Fingerprint::compute(title, &[], None),
        })
    }

    fn failure(permanent: bool) -> Outcome {
        Outcome::Failed(FailedFetch {
            url: "https://e.com/f".to_string(),
            source: SourceKind::Amazon,
            last_error: "boom".to_string(),
            attempts: 3,
            permanent,
        })
    }

    #[test]
    fn test_counters_accumulate_across_outcomes() {
        let agg = Aggregator::new();
        agg.add_candidates(SourceKind::Leanpub, "rust", 5);
        agg.add_intra_duplicates(SourceKind::Leanpub, "rust", 1);
        agg.add_store_duplicates(SourceKind::Leanpub, "rust", 2);

        agg.record_outcome(SourceKind::Leanpub, "rust", success("a"));
        agg.record_outcome(SourceKind::Leanpub, "rust", success("b"));
        agg.record_outcome(SourceKind::Leanpub, "rust", failure(true));
        agg.record_outcome(SourceKind::Leanpub, "rust", failure(false));
        agg.record_outcome(
            SourceKind::Leanpub,
            "rust",
            Outcome::Duplicate {
                kind: DuplicateKind::AlreadyInStore,
                key: "fp".to_string(),
            },
        );

        let report = agg.snapshot();
        assert_eq!(report.counts.candidates, 5);
        assert_eq!(report.counts.intra_duplicates, 1);
        assert_eq!(report.counts.store_duplicates, 2);
        assert_eq!(report.counts.post_fetch_duplicates, 1);
        assert_eq!(report.counts.succeeded, 2);
        assert_eq!(report.counts.failed_permanent, 1);
        assert_eq!(report.counts.failed_exhausted, 1);
        assert_eq!(report.counts.failed(), 2);
        assert_eq!(report.counts.duplicates(), 4);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.failures.len(), 2);
    }

    #[test]
    fn test_intra_batch_duplicate_outcome_counts_in_intra_tier() {
        let agg = Aggregator::new();
        agg.record_outcome(
            SourceKind::Amazon,
            "rust",
            Outcome::Duplicate {
                kind: DuplicateKind::IntraBatch,
                key: "id:X".to_string(),
            },
        );
        let report = agg.snapshot();
        assert_eq!(report.counts.intra_duplicates, 1);
        assert_eq!(report.counts.post_fetch_duplicates, 0);
    }

    #[test]
    fn test_repeated_success_identity_reclassified_as_duplicate() {
        // Two queries surfacing the same book: nothing reaches the store
        // mid-run, so both fetches succeed, but only the first may be
        // reported as a success.
        let agg = Aggregator::new();
        agg.record_outcome(SourceKind::Leanpub, "first", success("Same Book"));
        agg.record_outcome(SourceKind::Leanpub, "second", success("Same Book"));

        let report = agg.snapshot();
        assert_eq!(report.counts.succeeded, 1);
        assert_eq!(report.counts.post_fetch_duplicates, 1);
        assert_eq!(report.records.len(), 1);
    }

    #[test]
    fn test_segments_keep_per_source_query_counts() {
        let agg = Aggregator::new();
        agg.add_candidates(SourceKind::Leanpub, "rust", 2);
        agg.record_outcome(SourceKind::Leanpub, "rust", success("A"));
        agg.add_candidates(SourceKind::Amazon, "rust", 1);
        agg.record_outcome(SourceKind::Amazon, "rust", failure(true));

        let report = agg.snapshot();
        assert_eq!(report.segments.len(), 2);
        // Ordered by source name.
        assert_eq!(report.segments[0].source, SourceKind::Amazon);
        assert_eq!(report.segments[0].counts.failed_permanent, 1);
        assert_eq!(report.segments[0].counts.succeeded, 0);
        assert_eq!(report.segments[1].source, SourceKind::Leanpub);
        assert_eq!(report.segments[1].counts.succeeded, 1);
        // Totals sum the segments.
        assert_eq!(report.counts.candidates, 3);
        assert_eq!(report.counts.succeeded, 1);
    }

    #[test]
    fn test_queries_of_one_source_are_separate_segments() {
        let agg = Aggregator::new();
        agg.add_candidates(SourceKind::Leanpub, "alpha", 1);
        agg.add_candidates(SourceKind::Leanpub, "beta", 1);

        let report = agg.snapshot();
        assert_eq!(report.segments.len(), 2);
        assert_eq!(report.segments[0].query, "alpha");
        assert_eq!(report.segments[1].query, "beta");
    }

    #[test]
    fn test_snapshot_drains_records() {
        let agg = Aggregator::new();
        agg.record_outcome(SourceKind::Leanpub, "rust", success("a"));
        assert_eq!(agg.snapshot().records.len(), 1);
        assert!(agg.snapshot().records.is_empty());
    }

    #[test]
    fn test_aggregator_is_shareable_across_threads() {
        use std::sync::Arc;

        let agg = Arc::new(Aggregator::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let agg = Arc::clone(&agg);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    agg.record_outcome(SourceKind::Amazon, "rust", failure(false));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(agg.snapshot().counts.failed_exhausted, 400);
    }
}
