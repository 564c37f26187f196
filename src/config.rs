//! Run configuration assembled from CLI flags.

use std::time::Duration;

use crate::book::SourceKind;
use crate::pipeline::fetch::FetchSettings;
use crate::pipeline::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};

/// Default search page cap per (source, query).
pub const DEFAULT_MAX_SEARCH_PAGES: u32 = 3;

/// Everything one pipeline run needs to know.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sources to run, in order.
    pub sources: Vec<SourceKind>,
    /// Search queries; each runs against every source.
    pub queries: Vec<String>,
    /// Maximum concurrent detail fetches per source.
    pub concurrency: usize,
    /// Retry budget per fetch, including the initial attempt.
    pub max_attempts: u32,
    /// Deadline for one fetch attempt.
    pub attempt_timeout: Duration,
    /// Search page cap per (source, query).
    pub max_search_pages: u32,
    /// Candidates per pacing wave.
    pub wave_size: usize,
    /// Inter-wave pause range; a zero range disables pacing.
    pub wave_delay: (Duration, Duration),
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: SourceKind::all().to_vec(),
            queries: Vec::new(),
            concurrency: crate::pipeline::fetch::DEFAULT_CONCURRENCY,
            max_attempts: crate::pipeline::retry::DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: crate::pipeline::fetch::DEFAULT_ATTEMPT_TIMEOUT,
            max_search_pages: DEFAULT_MAX_SEARCH_PAGES,
            wave_size: crate::pipeline::fetch::DEFAULT_WAVE_SIZE,
            wave_delay: crate::pipeline::fetch::DEFAULT_WAVE_DELAY,
        }
    }
}

impl PipelineConfig {
    /// Retry policy derived from this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    /// Fetch scheduler settings derived from this configuration.
    #[must_use]
    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            concurrency: self.concurrency,
            attempt_timeout: self.attempt_timeout,
            wave_size: self.wave_size,
            wave_delay: self.wave_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_covers_all_sources() {
        let config = PipelineConfig::default();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_search_pages, 3);
    }

    #[test]
    fn test_retry_policy_uses_configured_budget() {
        let config = PipelineConfig {
            max_attempts: 5,
            ..PipelineConfig::default()
        };
        assert_eq!(config.retry_policy().max_attempts(), 5);
    }
}
