//! # bioRxiv Trending
//!
//! Finds the bioRxiv preprints posted yesterday, ranks them by how much they
//! were shared, and posts a summary card for each of the top papers.
//!
//! ## Usage
//!
//! ```sh
//! biorxiv_trending --dry-run -o ./cards
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Date**: resolve "yesterday" in a fixed time zone
//! 2. **Discovery**: find the detail-page URLs of that day's papers
//! 3. **Fetching**: load detail pages in throttled concurrent batches
//! 4. **Ranking**: keep the top N by attention count
//! 5. **Publishing**: per paper, extract the PDF text, summarize it with an
//!    LLM, render a card and post it
//! 6. **Output**: write a JSON run report

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::path::Path;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};
use url::Url;

mod api;
mod batch;
mod cli;
mod dates;
mod error;
mod extract;
mod handles;
mod models;
mod outputs;
mod pipeline;
mod post;
mod rank;
mod render;
mod schema;
mod scrapers;
mod utils;

use api::{AwfulBackend, PaperSummarizer, load_llm};
use cli::Cli;
use error::ConfigError;
use extract::PdfExtractor;
use handles::{AnyHandles, GithubHandles, NoHandles};
use models::RunReport;
use outputs::json;
use pipeline::{Stages, discover_and_rank, publish_ranked};
use post::{AnyPublisher, DryRunPublisher, XPublisher};
use render::CardRenderer;
use schema::PageSchema;
use scrapers::DiscoveryOptions;
use scrapers::page::{HttpPageSource, RetryPolicy, RetryingSource, build_client};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("biorxiv_trending starting up");

    let args = Cli::parse();
    debug!(?args.discovery, %args.output_dir, dry_run = args.dry_run, "Parsed CLI arguments");

    // ---- Configuration: everything here is fatal ----
    let target_date = dates::resolve_target_date(&args.timezone)?;
    info!(%target_date, timezone = %args.timezone, "Resolved target date");

    if args.needs_x_token() && args.x_access_token.is_none() {
        error!("X_ACCESS_TOKEN is required unless --dry-run or --discover-only is set");
        return Err(ConfigError::MissingCredential("X_ACCESS_TOKEN").into());
    }

    let schema = PageSchema::load(args.schema.as_deref())?.compile()?;
    let base = Url::parse(&args.base_url).map_err(ConfigError::from)?;

    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Discover, fetch, rank ----
    let settings = args.run_settings();
    let client = build_client(settings.load_timeout)?;

    // Downstream setup reads local assets and the LLM config; do it before
    // the scrape so a bad setup fails in seconds, not after it.
    let downstream = if args.needs_downstream() {
        Some(Downstream::prepare(&args, client.clone()).await?)
    } else {
        None
    };

    let http = HttpPageSource::new(client);
    let listing_source = RetryingSource::new(
        http.clone(),
        args.discovery.listing_retry(settings.attempts, settings.load_timeout),
    );
    let detail_source = RetryingSource::new(
        http,
        RetryPolicy::with_backoff(settings.attempts, settings.load_timeout),
    );
    let options = DiscoveryOptions {
        strategy: args.discovery,
        base,
        results_per_page: args.results_per_page,
        probe_width: args.probe_width,
        max_pages: args.max_pages,
    };

    let ranked = discover_and_rank(
        &listing_source,
        &detail_source,
        &schema,
        &options,
        settings,
        target_date,
        args.top,
    )
    .await;
    for (i, record) in ranked.ranked.iter().enumerate() {
        info!(
            rank = i + 1,
            attention = record.attention_count,
            title = %record.title,
            url = %record.source_url,
            "Ranked paper"
        );
    }

    // ---- Per-paper publishing ----
    let outcomes = match &downstream {
        Some(downstream) => {
            publish_ranked(
                &downstream.stages(),
                &ranked.ranked,
                Path::new(&args.output_dir),
                args.post_delay(),
            )
            .await
        }
        None => {
            info!("--discover-only set; skipping extraction, summaries and posts");
            Vec::new()
        }
    };

    // ---- Run report ----
    let report = RunReport {
        target_date,
        generated_at: Utc::now(),
        discovery: options.strategy.to_string(),
        candidates: ranked.candidates,
        fetched: ranked.fetched,
        ranked: ranked.ranked,
        outcomes,
    };
    if let Err(e) = json::write_run_report(&report, Path::new(&args.output_dir)).await {
        error!(error = %e, "Failed to write run report");
    }

    let failed = report.outcomes.iter().filter(|o| o.is_failure()).count();
    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        ranked = report.ranked.len(),
        failed,
        "Execution complete"
    );

    Ok(())
}

/// The per-paper stages, built once per run.
struct Downstream {
    extractor: PdfExtractor,
    summarizer: PaperSummarizer<AwfulBackend>,
    renderer: CardRenderer,
    handles: AnyHandles,
    publisher: AnyPublisher,
}

impl Downstream {
    /// Load card assets, the tokenizer and the LLM config.
    ///
    /// Cheap local checks run first, so a missing font fails before the
    /// LLM config is even read.
    ///
    /// # Errors
    ///
    /// Any setup failure. These are fatal: nothing has been scraped yet.
    #[instrument(level = "info", skip_all)]
    async fn prepare(args: &Cli, client: reqwest::Client) -> Result<Self, Box<dyn Error>> {
        let renderer =
            CardRenderer::load(&args.background, &args.text_font, &args.brand_font, &args.brand)?;
        let extractor = PdfExtractor::new(client.clone(), args.token_budget, &args.tokenizer_model)?;
        let (config, template) = load_llm(args.config.as_deref(), &args.template).await?;
        let summarizer = PaperSummarizer::new(AwfulBackend { config, template });

        let handles = if args.lookup_handles {
            AnyHandles::Github(GithubHandles::new(client.clone(), args.github_token.clone()))
        } else {
            AnyHandles::Disabled(NoHandles)
        };
        let publisher = match (&args.x_access_token, args.dry_run) {
            (Some(token), false) => AnyPublisher::X(XPublisher::new(client, token.clone())),
            _ => AnyPublisher::DryRun(DryRunPublisher),
        };
        info!(dry_run = args.dry_run, lookup_handles = args.lookup_handles, "Downstream stages ready");

        Ok(Self {
            extractor,
            summarizer,
            renderer,
            handles,
            publisher,
        })
    }

    fn stages(
        &self,
    ) -> Stages<'_, PdfExtractor, PaperSummarizer<AwfulBackend>, CardRenderer, AnyHandles, AnyPublisher>
    {
        Stages {
            extractor: &self.extractor,
            summarizer: &self.summarizer,
            renderer: &self.renderer,
            handles: &self.handles,
            publisher: &self.publisher,
        }
    }
}
