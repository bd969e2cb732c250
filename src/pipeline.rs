//! The two halves of a run.
//!
//! [`discover_and_rank`] finds yesterday's papers, fetches them in batches
//! and keeps the most shared ones. [`publish_ranked`] then takes each ranked
//! paper through extract → summarize → render → handles → publish.

use crate::api::Summarize;
use crate::batch::{RunContext, RunSettings, fetch_all};
use crate::extract::DocumentText;
use crate::handles::HandleLookup;
use crate::models::{ItemOutcome, ItemStatus, PaperRecord, Stage};
use crate::post::Publisher;
use crate::rank::top_n;
use crate::render::{Card, RenderCard};
use crate::schema::CompiledSchema;
use crate::scrapers::page::PageSource;
use crate::scrapers::{DiscoveryOptions, discover};
use crate::utils::slugify_title;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

const SLUG_LEN: usize = 60;

/// Result of the scraping half of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranked {
    pub candidates: usize,
    pub fetched: usize,
    pub ranked: Vec<PaperRecord>,
}

/// Discover candidate URLs, fetch them and keep the top `top` by attention.
///
/// # Arguments
///
/// * `listing` - Source for search/listing pages, retried per the strategy
/// * `detail` - Source for detail pages
/// * `settings` - Batch size, pause and per-page budget for the fetch
///
/// # Returns
///
/// The candidate and fetched counts plus the ranked records. Discovery or
/// fetch failures never surface here; they only shrink the result.
#[instrument(level = "info", skip(listing, detail, schema, options, settings), fields(strategy = %options.strategy))]
pub async fn discover_and_rank<L: PageSource, S: PageSource>(
    listing: &L,
    detail: &S,
    schema: &CompiledSchema,
    options: &DiscoveryOptions,
    settings: RunSettings,
    target_date: NaiveDate,
    top: usize,
) -> Ranked {
    let urls = discover(listing, schema, options, target_date).await;
    if urls.is_empty() {
        warn!("Discovery found no papers");
    }
    info!(candidates = urls.len(), "Discovery complete");

    let ctx = RunContext::new(target_date, settings);
    let outcome = fetch_all(&ctx, detail, schema, &urls).await;
    let ranked = top_n(&outcome.records, top);
    info!(
        fetched = outcome.records.len(),
        batches = outcome.batch_sizes.len(),
        ranked = ranked.len(),
        "Ranking complete"
    );

    Ranked {
        candidates: urls.len(),
        fetched: outcome.records.len(),
        ranked,
    }
}

/// Everything the per-paper loop needs.
///
/// Each stage is a trait so tests can swap in fakes; `main` builds the real
/// ones once, before any page is scraped.
pub struct Stages<'a, D, M, R, H, P> {
    pub extractor: &'a D,
    pub summarizer: &'a M,
    pub renderer: &'a R,
    pub handles: &'a H,
    pub publisher: &'a P,
}

/// Card file for a ranked paper: `{dir}/{rank:02}-{slug}.jpg`.
pub fn card_path(output_dir: &Path, rank: usize, title: &str) -> PathBuf {
    let slug = slugify_title(title, SLUG_LEN);
    let slug = if slug.is_empty() { "paper".to_string() } else { slug };
    output_dir.join(format!("{rank:02}-{slug}.jpg"))
}

/// Process every ranked paper in order, pausing `post_delay` between papers.
///
/// # Arguments
///
/// * `stages` - Extractor, summarizer, renderer, handle lookup and publisher
/// * `ranked` - Papers in rank order; rank 1 is processed first
/// * `output_dir` - Where cards are written
/// * `post_delay` - Pause between two papers; none after the last
///
/// # Returns
///
/// One [`ItemOutcome`] per paper, in rank order. A failing paper is recorded
/// with the stage it failed in and the loop moves on.
#[instrument(level = "info", skip_all, fields(papers = ranked.len()))]
pub async fn publish_ranked<D, M, R, H, P>(
    stages: &Stages<'_, D, M, R, H, P>,
    ranked: &[PaperRecord],
    output_dir: &Path,
    post_delay: Duration,
) -> Vec<ItemOutcome>
where
    D: DocumentText,
    M: Summarize,
    R: RenderCard,
    H: HandleLookup,
    P: Publisher,
{
    let mut outcomes = Vec::with_capacity(ranked.len());
    for (i, record) in ranked.iter().enumerate() {
        let rank = i + 1;
        let status = process_item(stages, record, rank, output_dir).await;
        if let ItemStatus::Failed { stage, error } = &status {
            error!(rank, url = %record.source_url, ?stage, %error, "Paper failed; continuing");
        }
        outcomes.push(ItemOutcome {
            rank,
            source_url: record.source_url.clone(),
            title: record.title.clone(),
            status,
        });

        if rank < ranked.len() && !post_delay.is_zero() {
            info!(delay = ?post_delay, "Waiting before next paper");
            sleep(post_delay).await;
        }
    }

    let failed = outcomes.iter().filter(|o| o.is_failure()).count();
    info!(processed = outcomes.len(), failed, "Per-paper loop complete");
    outcomes
}

/// Run one paper through every stage, stopping at the first failure.
#[instrument(level = "info", skip(stages, record, output_dir), fields(url = %record.source_url))]
async fn process_item<D, M, R, H, P>(
    stages: &Stages<'_, D, M, R, H, P>,
    record: &PaperRecord,
    rank: usize,
    output_dir: &Path,
) -> ItemStatus
where
    D: DocumentText,
    M: Summarize,
    R: RenderCard,
    H: HandleLookup,
    P: Publisher,
{
    let failed = |stage: Stage, e: &dyn std::fmt::Display| ItemStatus::Failed {
        stage,
        error: e.to_string(),
    };

    let text = match stages.extractor.document_text(record).await {
        Ok(text) => text,
        Err(e) => return failed(Stage::Extract, &e),
    };

    let summary = match stages.summarizer.summarize(&text).await {
        Ok(summary) => summary,
        Err(e) => return failed(Stage::Summarize, &e),
    };

    let card = Card {
        title: &record.title,
        bullets: summary.bullets(),
        label: &record.subject_area,
    };
    let image_path = match stages
        .renderer
        .render(&card, &card_path(output_dir, rank, &record.title))
    {
        Ok(path) => path,
        Err(e) => return failed(Stage::Render, &e),
    };

    let handles = stages.handles.handles(record, &text).await;

    let image = image_path.display().to_string();
    match stages
        .publisher
        .publish(&record.title, &record.source_url, &image_path, &handles)
        .await
    {
        Ok(Some(post_id)) => ItemStatus::Posted {
            post_id,
            image_path: image,
        },
        Ok(None) => ItemStatus::Rendered { image_path: image },
        Err(e) => failed(Stage::Publish, &e),
    }
}
