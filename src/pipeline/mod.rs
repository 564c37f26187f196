//! Discovery pipeline: search, dedup, fetch, aggregate.
//!
//! One [`SourcePipeline`] runs a single source across all queries:
//! search pages produce candidates, two dedup tiers thin them out, the
//! fetch scheduler turns the survivors into outcomes, and everything
//! lands in the shared [`Aggregator`]. [`run_all`] drives the
//! configured sources as independent concurrent pipelines; one source
//! failing or stalling never blocks the others.

pub mod dedup;
pub mod fetch;
pub mod report;
pub mod retry;
pub mod search;

pub use fetch::{DetailFetchScheduler, FetchSettings};
pub use report::{Aggregator, RunCounts, RunReport, SegmentCounts};
pub use retry::{FailureType, RetryDecision, RetryPolicy};

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::book::SourceKind;
use crate::config::PipelineConfig;
use crate::source::{SourceError, SourceRegistry};
use crate::store::BookStore;

/// Pipeline-level failures. Per-candidate problems become outcomes, not
/// errors; these abort a whole source run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The registry has no adapter for a requested source.
    #[error("no adapter registered for source '{0}'")]
    UnknownSource(SourceKind),

    /// Every query's search failed for this source.
    #[error("all searches failed for source '{source}': {last_error}")]
    AllSearchesFailed {
        source: SourceKind,
        #[source]
        last_error: SourceError,
    },

    /// The source's task aborted or panicked.
    #[error("source pipeline task failed: {0}")]
    TaskFailed(String),
}

/// The per-source run: all queries through search, dedup and fetch.
struct SourcePipeline {
    kind: SourceKind,
    scheduler: DetailFetchScheduler,
    adapter: Arc<dyn crate::source::SourceAdapter>,
    store: BookStore,
    config: PipelineConfig,
}

impl SourcePipeline {
    #[instrument(skip_all, fields(source = %self.kind))]
    async fn run(
        &self,
        aggregator: &Aggregator,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut any_search_succeeded = false;
        let mut last_error = None;

        for query in &self.config.queries {
            if cancel.is_cancelled() {
                break;
            }

            let candidates = match search::run_search(
                self.adapter.as_ref(),
                query,
                self.config.max_search_pages,
                cancel,
            )
            .await
            {
                Ok(candidates) => {
                    any_search_succeeded = true;
                    candidates
                }
                Err(err) => {
                    warn!(query, error = %err, "search failed; skipping query");
                    last_error = Some(err);
                    continue;
                }
            };

            aggregator.add_candidates(self.kind, query, candidates.len());

            let (survivors, intra_dropped) = dedup::dedup_within_batch(candidates);
            aggregator.add_intra_duplicates(self.kind, query, intra_dropped);

            let (fresh, known) = dedup::partition_against_store(
                &self.store,
                survivors,
                self.config.concurrency,
                cancel,
            )
            .await;
            aggregator.add_store_duplicates(self.kind, query, known);

            info!(
                query,
                fresh = fresh.len(),
                intra_dropped,
                store_known = known,
                "query candidates deduplicated"
            );

            self.scheduler.run(query, fresh, aggregator, cancel).await;
        }

        match (any_search_succeeded, last_error) {
            (false, Some(last_error)) => Err(PipelineError::AllSearchesFailed {
                source: self.kind,
                last_error,
            }),
            _ => Ok(()),
        }
    }
}

/// Runs every configured source as an independent concurrent pipeline.
///
/// Returns one result per source; a failed source does not remove what
/// it already aggregated.
pub async fn run_all(
    registry: &SourceRegistry,
    store: &BookStore,
    config: &PipelineConfig,
    aggregator: Arc<Aggregator>,
    cancel: &CancellationToken,
) -> Vec<(SourceKind, Result<(), PipelineError>)> {
    let mut handles = Vec::new();

    for kind in &config.sources {
        let kind = *kind;
        let Some(adapter) = registry.get(kind) else {
            warn!(source = %kind, "no adapter registered; skipping source");
            handles.push((kind, None));
            continue;
        };

        let pipeline = SourcePipeline {
            kind,
            scheduler: DetailFetchScheduler::new(
                Arc::clone(&adapter),
                store.clone(),
                config.retry_policy(),
                config.fetch_settings(),
            ),
            adapter,
            store: store.clone(),
            config: config.clone(),
        };
        let aggregator = Arc::clone(&aggregator);
        let cancel = cancel.clone();

        handles.push((
            kind,
            Some(tokio::spawn(async move {
                pipeline.run(&aggregator, &cancel).await
            })),
        ));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (kind, handle) in handles {
        let result = match handle {
            None => Err(PipelineError::UnknownSource(kind)),
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(err) => {
                    warn!(source = %kind, error = %err, "source pipeline task panicked");
                    Err(PipelineError::TaskFailed(err.to_string()))
                }
            },
        };
        results.push((kind, result));
    }
    results
}
