//! Detail fetch scheduler.
//!
//! Surviving candidates are fetched concurrently under a semaphore
//! bound, in waves separated by a randomized pause so a burst of
//! candidates does not hammer a source. Each fetch runs the retry loop
//! and ends in exactly one [`Outcome`]; a fetched record is re-checked
//! against the store by its authoritative fingerprint before it may be
//! classified a success, catching collisions the cheap pre-fetch check
//! could not see.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::book::{CandidateReference, DuplicateKind, FailedFetch, Outcome};
use crate::fingerprint::Fingerprint;
use crate::pipeline::report::Aggregator;
use crate::pipeline::retry::{classify, RetryDecision, RetryPolicy};
use crate::source::{SourceAdapter, SourceError};
use crate::store::BookStore;

/// Default in-flight fetch bound per source.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default per-attempt deadline.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default candidates per pacing wave.
pub const DEFAULT_WAVE_SIZE: usize = 10;

/// Default inter-wave pause range.
pub const DEFAULT_WAVE_DELAY: (Duration, Duration) =
    (Duration::from_secs(1), Duration::from_secs(3));

/// Tuning knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Maximum concurrent detail fetches.
    pub concurrency: usize,
    /// Deadline for a single fetch attempt.
    pub attempt_timeout: Duration,
    /// Candidates dispatched per wave.
    pub wave_size: usize,
    /// Inter-wave pause, drawn uniformly from this range. A zero range
    /// disables pacing (used by tests).
    pub wave_delay: (Duration, Duration),
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            wave_size: DEFAULT_WAVE_SIZE,
            wave_delay: DEFAULT_WAVE_DELAY,
        }
    }
}

impl FetchSettings {
    /// Settings for tests: no pacing, immediate everything.
    #[must_use]
    pub fn unpaced(concurrency: usize) -> Self {
        Self {
            concurrency,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            wave_size: usize::MAX,
            wave_delay: (Duration::ZERO, Duration::ZERO),
        }
    }
}

/// Bounded-concurrency fetch pool for one source.
pub struct DetailFetchScheduler {
    adapter: Arc<dyn SourceAdapter>,
    store: BookStore,
    policy: RetryPolicy,
    settings: FetchSettings,
    semaphore: Arc<Semaphore>,
}

impl DetailFetchScheduler {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        store: BookStore,
        policy: RetryPolicy,
        settings: FetchSettings,
    ) -> Self {
        let concurrency = settings.concurrency.max(1);
        Self {
            adapter,
            store,
            policy,
            settings,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Fetches every candidate, recording one outcome per candidate into
    /// the aggregator under the given query's segment. Cancellation stops
    /// dispatch between waves and interrupts in-flight retries;
    /// already-finished outcomes stay recorded.
    #[instrument(skip_all, fields(source = %self.adapter.kind(), query, count = candidates.len()))]
    pub async fn run(
        &self,
        query: &str,
        candidates: Vec<CandidateReference>,
        aggregator: &Aggregator,
        cancel: &CancellationToken,
    ) {
        let wave_size = self.settings.wave_size.max(1);

        for (wave_index, wave) in candidates.chunks(wave_size).enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if wave_index > 0 && !self.pause_between_waves(cancel).await {
                break;
            }

            let mut handles = Vec::with_capacity(wave.len());
            for candidate in wave {
                let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                    break;
                };

                let adapter = Arc::clone(&self.adapter);
                let store = self.store.clone();
                let policy = self.policy.clone();
                let attempt_timeout = self.settings.attempt_timeout;
                let candidate = candidate.clone();
                let cancel = cancel.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    fetch_with_retry(
                        adapter.as_ref(),
                        &store,
                        &policy,
                        attempt_timeout,
                        &candidate,
                        &cancel,
                    )
                    .await
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok(Some(outcome)) => {
                        aggregator.record_outcome(self.adapter.kind(), query, outcome);
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "fetch task panicked"),
                }
            }
        }

        info!("fetch wave processing finished");
    }

    /// Sleeps the randomized inter-wave pause. Returns false when
    /// cancellation fired during the pause.
    async fn pause_between_waves(&self, cancel: &CancellationToken) -> bool {
        let (min, max) = self.settings.wave_delay;
        if max.is_zero() {
            return true;
        }
        let delay = if max > min {
            let span_ms = (max - min).as_millis() as u64;
            let extra = rand::thread_rng().gen_range(0..=span_ms);
            min + Duration::from_millis(extra)
        } else {
            min
        };
        debug!(delay_ms = delay.as_millis(), "pacing before next wave");
        tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

/// Runs the retry loop for one candidate.
///
/// Returns `None` only when cancellation interrupted the fetch before a
/// terminal outcome was reached.
async fn fetch_with_retry(
    adapter: &dyn SourceAdapter,
    store: &BookStore,
    policy: &RetryPolicy,
    attempt_timeout: Duration,
    candidate: &CandidateReference,
    cancel: &CancellationToken,
) -> Option<Outcome> {
    let mut attempt: u32 = 1;

    loop {
        let attempt_result = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            result = tokio::time::timeout(attempt_timeout, adapter.fetch_detail(candidate)) => {
                result.unwrap_or_else(|_| {
                    Err(SourceError::Timeout(candidate.detail_url.clone()))
                })
            }
        };

        match attempt_result {
            Ok(record) => {
                // A detail page without a title yields an unusable record;
                // refetching would only produce the same page.
                if record.title.trim().is_empty() {
                    return Some(Outcome::Failed(FailedFetch {
                        url: candidate.detail_url.clone(),
                        source: candidate.source,
                        last_error: "detail page has no title".to_string(),
                        attempts: attempt,
                        permanent: true,
                    }));
                }

                let mut record = record;
                record.fingerprint =
                    Fingerprint::compute(&record.title, &record.authors, record.year);

                // Authoritative-fingerprint re-check: the pre-fetch pass
                // only saw the search-page title.
                match store.exists_by_fingerprint(&record.fingerprint).await {
                    Ok(true) => {
                        debug!(url = %record.url, "post-fetch duplicate");
                        return Some(Outcome::Duplicate {
                            kind: DuplicateKind::AlreadyInStore,
                            key: record.fingerprint.as_str().to_string(),
                        });
                    }
                    Ok(false) => {}
                    Err(err) => {
                        // Insert-time uniqueness still guards the store.
                        warn!(error = %err, "post-fetch store check failed");
                    }
                }

                return Some(Outcome::Success(record));
            }
            Err(error) => {
                let failure_type = classify(&error);
                match policy.decide(failure_type, attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next,
                    } => {
                        debug!(
                            url = %candidate.detail_url,
                            attempt,
                            error = %error,
                            "fetch attempt failed; retrying"
                        );
                        if !delay.is_zero() {
                            tokio::select! {
                                biased;
                                () = cancel.cancelled() => return None,
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                        attempt = next;
                    }
                    RetryDecision::GiveUp { permanent } => {
                        return Some(Outcome::Failed(FailedFetch {
                            url: candidate.detail_url.clone(),
                            source: candidate.source,
                            last_error: error.to_string(),
                            attempts: attempt,
                            permanent,
                        }));
                    }
                }
            }
        }
    }
}
