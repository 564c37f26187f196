//! CLI argument definitions using clap derive macros.

use clap::Parser;

use crate::book::SourceKind;
use crate::config::DEFAULT_MAX_SEARCH_PAGES;
use crate::pipeline::fetch::DEFAULT_CONCURRENCY;
use crate::pipeline::retry::DEFAULT_MAX_ATTEMPTS;

/// Discover, deduplicate and collect book records from web sources.
///
/// Each query runs against every selected source; discovered books are
/// deduplicated against each other and against the local store before
/// their detail pages are fetched.
#[derive(Parser, Debug)]
#[command(name = "bookscout")]
#[command(author, version, about)]
pub struct Args {
    /// Search queries (at least one)
    #[arg(required = true)]
    pub queries: Vec<String>,

    /// Sources to search (repeatable; default: all)
    #[arg(short = 's', long = "source", value_parser = parse_source)]
    pub sources: Vec<SourceKind>,

    /// Maximum concurrent detail fetches per source (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum fetch attempts including the first (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_ATTEMPTS as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_attempts: u8,

    /// Per-attempt timeout in seconds (1-300)
    #[arg(short = 't', long, default_value_t = 30, value_parser = clap::value_parser!(u16).range(1..=300))]
    pub timeout: u16,

    /// Maximum search pages per source and query (1-100)
    #[arg(short = 'p', long, default_value_t = DEFAULT_MAX_SEARCH_PAGES as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub max_pages: u8,

    /// Write collected books and failed URLs to CSV files
    #[arg(long)]
    pub csv: bool,

    /// Persist collected books into the local store
    #[arg(long)]
    pub store: bool,

    /// Path of the dedup store database
    #[arg(long, default_value = "books.db")]
    pub db: String,

    /// Output file prefix for CSV files
    #[arg(short = 'o', long, default_value = "bookscout")]
    pub output: String,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_source(value: &str) -> Result<SourceKind, String> {
    value.parse()
}

impl Args {
    /// Sources to run: explicit selection, or all when none given.
    #[must_use]
    pub fn selected_sources(&self) -> Vec<SourceKind> {
        if self.sources.is_empty() {
            SourceKind::all().to_vec()
        } else {
            let mut seen = std::collections::HashSet::new();
            self.sources
                .iter()
                .copied()
                .filter(|kind| seen.insert(*kind))
                .collect()
        }
    }
}
