//! Output sinks for run results.
//!
//! Sinks consume the final [`RunReport`](crate::pipeline::RunReport)
//! contents after the pipelines finish; they never run mid-pipeline. A
//! sink failing is logged and does not stop the other sinks.

mod csv;
mod store;

pub use csv::CsvSink;
pub use store::StoreSink;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::book::{DetailRecord, FailedFetch};
use crate::store::StoreError;

/// Errors from flushing a sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error writing output: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV serialization error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("store write error: {0}")]
    Store(#[from] StoreError),
}

/// A destination for collected records and the failed-URL report.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Sink name for logs.
    fn name(&self) -> &str;

    /// Writes the run's records and failures.
    async fn flush(
        &self,
        records: &[DetailRecord],
        failures: &[FailedFetch],
    ) -> Result<(), SinkError>;
}

/// Flushes every sink, logging failures. Returns the number of sinks
/// that flushed cleanly.
pub async fn flush_all(
    sinks: &[Box<dyn OutputSink>],
    records: &[DetailRecord],
    failures: &[FailedFetch],
) -> usize {
    let mut flushed = 0;
    for sink in sinks {
        match sink.flush(records, failures).await {
            Ok(()) => {
                info!(sink = sink.name(), "sink flushed");
                flushed += 1;
            }
            Err(err) => error!(sink = sink.name(), error = %err, "sink flush failed"),
        }
    }
    flushed
}
