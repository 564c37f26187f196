//! Store sink: persists collected records into the dedup store.

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::book::{DetailRecord, FailedFetch};
use crate::sink::{OutputSink, SinkError};
use crate::store::BookStore;

/// Inserts run results into the persistent store.
///
/// Insert-time uniqueness conflicts are expected here: another process
/// (or another source in this run) may have stored the same identity
/// after our post-fetch check. Conflicts are counted, not raised.
pub struct StoreSink {
    store: BookStore,
}

impl StoreSink {
    #[must_use]
    pub fn new(store: BookStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OutputSink for StoreSink {
    fn name(&self) -> &str {
        "store"
    }

    #[instrument(skip_all, fields(count = records.len()))]
    async fn flush(
        &self,
        records: &[DetailRecord],
        _failures: &[FailedFetch],
    ) -> Result<(), SinkError> {
        let mut inserted = 0usize;
        let mut duplicates = 0usize;
        let mut errors = 0usize;

        for record in records {
            match self.store.insert(record).await {
                Ok(true) => inserted += 1,
                Ok(false) => {
                    duplicates += 1;
                }
                Err(err) => {
                    errors += 1;
                    warn!(url = %record.url, error = %err, "failed to store record");
                }
            }
        }

        info!(inserted, duplicates, errors, "store sink summary");
        Ok(())
    }
}
