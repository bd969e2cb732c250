//! bioRxiv scrapers.
//!
//! Scraping follows the usual two-phase pattern:
//!
//! 1. **Discovery**: find the detail-page URLs of papers posted on the
//!    target date
//! 2. **Detail**: load each detail page and parse it into a
//!    [`PaperRecord`](crate::models::PaperRecord)
//!
//! # Discovery strategies
//!
//! | Strategy | Module | Method |
//! |----------|--------|--------|
//! | `search` | [`search`] | Single-day search, follow the pager, read DOI links |
//! | `probe`  | [`probe`]  | Walk the "recent" listing until the date falls behind the target |
//!
//! `search` is the default: it asks the site for exactly one day and needs
//! no termination heuristics.
//!
//! All page access goes through [`page::PageSource`], which keeps failure
//! handling (timeouts, retries, skips) in one place.

pub mod detail;
pub mod page;
pub mod probe;
pub mod search;

use crate::schema::CompiledSchema;
use chrono::NaiveDate;
use clap::ValueEnum;
use page::{PageSource, RetryPolicy};
use std::fmt;
use std::time::Duration;
use url::Url;

/// How candidate URLs are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Discovery {
    /// Single-day search endpoint with pagination.
    Search,
    /// Sequential probing of the "recent" listing.
    Probe,
}

impl fmt::Display for Discovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discovery::Search => f.write_str("search"),
            Discovery::Probe => f.write_str("probe"),
        }
    }
}

impl Discovery {
    /// Retry policy for the listing pages this strategy loads.
    ///
    /// Probing retries a listing page straight away: a window of pages is
    /// in flight together and a backed-off sibling would hold up the whole
    /// window. Search pages back off like detail pages.
    pub fn listing_retry(self, attempts: usize, attempt_timeout: Duration) -> RetryPolicy {
        match self {
            Discovery::Search => RetryPolicy::with_backoff(attempts, attempt_timeout),
            Discovery::Probe => RetryPolicy::immediate(attempts, attempt_timeout),
        }
    }
}

/// Knobs for discovery, taken from the CLI.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub strategy: Discovery,
    pub base: Url,
    pub results_per_page: usize,
    pub probe_width: usize,
    pub max_pages: usize,
}

/// Run the configured discovery strategy.
pub async fn discover<S: PageSource>(
    source: &S,
    schema: &CompiledSchema,
    options: &DiscoveryOptions,
    target_date: NaiveDate,
) -> Vec<String> {
    match options.strategy {
        Discovery::Search => {
            search::discover(source, schema, &options.base, target_date, options.results_per_page)
                .await
        }
        Discovery::Probe => {
            probe::discover(
                source,
                schema,
                &options.base,
                target_date,
                options.probe_width,
                options.max_pages,
            )
            .await
        }
    }
}
