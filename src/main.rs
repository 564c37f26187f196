//! CLI entry point for the bookscout tool.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bookscout::cli::Args;
use bookscout::pipeline::{self, Aggregator};
use bookscout::sink::{self, CsvSink, OutputSink, StoreSink};
use bookscout::source::{build_default_registry, build_http_client};
use bookscout::{BookStore, Database, PipelineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    if !args.csv && !args.store {
        bail!("no output selected; pass --csv, --store, or both");
    }

    let config = PipelineConfig {
        sources: args.selected_sources(),
        queries: args.queries.clone(),
        concurrency: usize::from(args.concurrency),
        max_attempts: u32::from(args.max_attempts),
        attempt_timeout: Duration::from_secs(u64::from(args.timeout)),
        max_search_pages: u32::from(args.max_pages),
        ..PipelineConfig::default()
    };

    info!(
        sources = ?config.sources,
        queries = config.queries.len(),
        "bookscout starting"
    );

    let db = Database::new(Path::new(&args.db)).await?;
    let store = BookStore::new(db);

    let client = build_http_client(config.attempt_timeout)?;
    let registry = build_default_registry(&client);

    // Ctrl-C cancels dispatch; in-flight results are kept and flushed.
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; finishing in-flight work");
            ctrl_c_cancel.cancel();
        }
    });

    let aggregator = Arc::new(Aggregator::new());
    let results = pipeline::run_all(
        &registry,
        &store,
        &config,
        Arc::clone(&aggregator),
        &cancel,
    )
    .await;

    for (kind, result) in &results {
        if let Err(err) = result {
            warn!(source = %kind, error = %err, "source pipeline failed");
        }
    }

    let report = aggregator.snapshot();
    for segment in &report.segments {
        info!(
            source = %segment.source,
            query = %segment.query,
            candidates = segment.counts.candidates,
            intra_duplicates = segment.counts.intra_duplicates,
            store_duplicates = segment.counts.store_duplicates,
            post_fetch_duplicates = segment.counts.post_fetch_duplicates,
            succeeded = segment.counts.succeeded,
            failed = segment.counts.failed(),
            "source/query summary"
        );
    }
    info!(
        candidates = report.counts.candidates,
        intra_duplicates = report.counts.intra_duplicates,
        store_duplicates = report.counts.store_duplicates,
        post_fetch_duplicates = report.counts.post_fetch_duplicates,
        succeeded = report.counts.succeeded,
        failed = report.counts.failed(),
        "run complete"
    );

    let mut sinks: Vec<Box<dyn OutputSink>> = Vec::new();
    if args.csv {
        sinks.push(Box::new(CsvSink::with_prefix(&args.output)));
    }
    if args.store {
        sinks.push(Box::new(StoreSink::new(store.clone())));
    }

    let flushed = sink::flush_all(&sinks, &report.records, &report.failures).await;
    if flushed < sinks.len() {
        warn!(
            flushed,
            total = sinks.len(),
            "some sinks failed; see errors above"
        );
    }

    store.close().await;
    Ok(())
}
