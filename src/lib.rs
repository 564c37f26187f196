//! Book discovery and deduplication pipeline.
//!
//! Searches multiple book sources, collapses duplicate hits across
//! three tiers (within a batch, against the persistent store before
//! fetching, and again after fetching by authoritative fingerprint),
//! fetches detail pages under a concurrency bound with retry and
//! backoff, and writes the collected records to CSV and/or the store.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod book;
pub mod cli;
pub mod config;
pub mod db;
pub mod fingerprint;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod store;

pub use book::{
    extract_year, CandidateReference, DetailRecord, DuplicateKind, FailedFetch, Outcome,
    SourceKind,
};
pub use config::PipelineConfig;
pub use db::Database;
pub use fingerprint::Fingerprint;
pub use pipeline::{Aggregator, RetryPolicy, RunCounts, RunReport, SegmentCounts};
pub use sink::{CsvSink, OutputSink, StoreSink};
pub use source::{
    build_default_registry, build_http_client, SourceAdapter, SourceError, SourceRegistry,
};
pub use store::BookStore;
