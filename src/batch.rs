//! Batched concurrent detail fetching.
//!
//! URLs are split into consecutive batches. Every URL of a batch is fetched
//! concurrently on the current task and the batch is awaited as a whole;
//! one slow or failing page never cancels its siblings. Between batches the
//! orchestrator sleeps to keep the load on bioRxiv polite.
//!
//! Results land in the run's [`RunContext`], which owns the only record
//! collection of a run.

use crate::models::PaperRecord;
use crate::schema::CompiledSchema;
use crate::scrapers::detail::fetch_detail;
use crate::scrapers::page::PageSource;
use chrono::NaiveDate;
use futures::future::join_all;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Per-run fetch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    /// Timeout of a single page load attempt.
    pub load_timeout: Duration,
    /// Attempts per URL before it is dropped.
    pub attempts: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay: Duration::from_secs(5),
            load_timeout: Duration::from_secs(60),
            attempts: 3,
        }
    }
}

#[derive(Debug, Default)]
struct RecordSink {
    seen: HashSet<String>,
    records: Vec<PaperRecord>,
}

/// State of one pipeline run. Create one per run; never reuse.
#[derive(Debug)]
pub struct RunContext {
    target_date: NaiveDate,
    settings: RunSettings,
    sink: Mutex<RecordSink>,
}

impl RunContext {
    pub fn new(target_date: NaiveDate, settings: RunSettings) -> Self {
        Self {
            target_date,
            settings,
            sink: Mutex::new(RecordSink::default()),
        }
    }

    pub fn target_date(&self) -> NaiveDate {
        self.target_date
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Append a record.
    ///
    /// Records from another day, or for a URL already recorded, are rejected
    /// and `false` is returned.
    pub async fn record(&self, record: PaperRecord) -> bool {
        if record.publication_date != self.target_date {
            debug!(url = %record.source_url, "Rejected record from another day");
            return false;
        }
        let mut sink = self.sink.lock().await;
        if !sink.seen.insert(record.source_url.clone()) {
            debug!(url = %record.source_url, "Rejected duplicate record");
            return false;
        }
        sink.records.push(record);
        true
    }

    pub async fn len(&self) -> usize {
        self.sink.lock().await.records.len()
    }

    /// Copy of the records collected so far, in append order.
    pub async fn snapshot(&self) -> Vec<PaperRecord> {
        self.sink.lock().await.records.clone()
    }

    /// Consume the context and hand back its records.
    pub fn into_records(self) -> Vec<PaperRecord> {
        self.sink.into_inner().records
    }
}

/// What [`fetch_all`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Records of the whole run so far, in append order.
    pub records: Vec<PaperRecord>,
    /// Number of URLs in each batch, in execution order.
    pub batch_sizes: Vec<usize>,
    /// Batches that kept records but no record with a non-zero count.
    /// Ranking is meaningless for such a batch.
    pub zero_attention_batches: usize,
}

/// Fetch every URL in batches of `ctx.settings().batch_size`.
///
/// Records pass through [`RunContext::record`], so the output only holds
/// papers from the target date with distinct URLs, and is never longer than
/// `urls`.
///
/// # Arguments
///
/// * `ctx` - The run's context; receives every accepted record
/// * `source` - Page source, expected to carry its own retry budget
/// * `schema` - Compiled selectors for detail pages
/// * `urls` - Detail URLs from discovery
///
/// # Returns
///
/// The records collected so far plus per-batch bookkeeping. Failed pages
/// are logged and dropped; this function never fails.
#[instrument(level = "info", skip_all, fields(urls = urls.len(), target_date = %ctx.target_date()))]
pub async fn fetch_all<S: PageSource>(
    ctx: &RunContext,
    source: &S,
    schema: &CompiledSchema,
    urls: &[String],
) -> FetchOutcome {
    let settings = *ctx.settings();
    let batch_size = settings.batch_size.max(1);
    let target_date = ctx.target_date();
    let total_batches = urls.len().div_ceil(batch_size);
    let mut batch_sizes = Vec::with_capacity(total_batches);
    let mut zero_attention_batches = 0usize;

    for (i, batch) in urls.chunks(batch_size).enumerate() {
        info!(batch = i + 1, of = total_batches, size = batch.len(), "Fetching batch");

        let counts: Vec<u64> = join_all(batch.iter().map(|url| async move {
            match fetch_detail(source, schema, url, target_date).await {
                Some(record) => {
                    let count = record.attention_count;
                    ctx.record(record).await.then_some(count)
                }
                None => None,
            }
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

        batch_sizes.push(batch.len());
        let kept = counts.len();
        info!(batch = i + 1, kept, total = ctx.len().await, "Batch complete");

        if kept > 0 && counts.iter().all(|&c| c == 0) {
            zero_attention_batches += 1;
            warn!(
                batch = i + 1,
                kept,
                "Every paper in this batch has an attention count of 0; \
                 the counter may no longer be in the served HTML"
            );
        }

        if i + 1 < total_batches && !settings.batch_delay.is_zero() {
            debug!(delay = ?settings.batch_delay, "Pausing between batches");
            sleep(settings.batch_delay).await;
        }
    }

    FetchOutcome {
        records: ctx.snapshot().await,
        batch_sizes,
        zero_attention_batches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PageSchema;
    use crate::scrapers::detail::fixtures::detail_html;
    use crate::scrapers::page::fixtures::StaticSource;
    use std::sync::atomic::Ordering;

    fn target() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 8).unwrap()
    }

    fn settings(batch_size: usize, delay_secs: u64) -> RunSettings {
        RunSettings {
            batch_size,
            batch_delay: Duration::from_secs(delay_secs),
            ..RunSettings::default()
        }
    }

    fn record(url: &str, date: NaiveDate) -> PaperRecord {
        PaperRecord {
            source_url: url.to_string(),
            publication_date: date,
            title: "t".into(),
            abstract_text: "a".into(),
            subject_area: "s".into(),
            attention_count: 1,
        }
    }

    #[tokio::test]
    async fn test_context_rejects_other_day_and_duplicates() {
        let ctx = RunContext::new(target(), RunSettings::default());
        assert!(ctx.record(record("https://x/1", target())).await);
        assert!(!ctx.record(record("https://x/1", target())).await);
        let yesterday = target().pred_opt().unwrap();
        assert!(!ctx.record(record("https://x/2", yesterday)).await);
        assert_eq!(ctx.into_records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_of_fifty_with_pauses() {
        let urls: Vec<String> = (0..120).map(|i| format!("https://x/{i}")).collect();
        let mut source = StaticSource::new();
        for url in &urls {
            source = source.page(url, detail_html("May 8, 2024", Some("1"), &[]));
        }
        let schema = PageSchema::biorxiv().compile().unwrap();
        let ctx = RunContext::new(target(), settings(50, 5));

        let started = tokio::time::Instant::now();
        let outcome = fetch_all(&ctx, &source, &schema, &urls).await;
        let elapsed = started.elapsed();

        assert_eq!(outcome.batch_sizes, vec![50, 50, 20]);
        assert_eq!(outcome.records.len(), 120);
        // Two pauses: after the first and second batch, not after the last.
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(15));
        // Fetches overlap within a batch but never exceed it.
        let peak = source.max_in_flight.load(Ordering::SeqCst);
        assert!(peak > 1 && peak <= 50, "peak in flight was {peak}");
        // Batches run in order.
        let requested = source.requested.lock().unwrap().clone();
        assert!(requested[..50].iter().all(|u| urls[..50].contains(u)));
        assert!(requested[100..].iter().all(|u| urls[100..].contains(u)));
    }

    #[tokio::test]
    async fn test_output_only_contains_target_date_and_never_grows() {
        let source = StaticSource::new()
            .page("https://x/a", detail_html("May 8, 2024", Some("3"), &[]))
            .page("https://x/b", detail_html("May 7, 2024", Some("9"), &[]))
            .page("https://x/c", detail_html("May 9, 2024", Some("4"), &[]))
            .page("https://x/d", "<html>broken</html>");
        let urls: Vec<String> = ["a", "b", "c", "d", "missing"]
            .iter()
            .map(|s| format!("https://x/{s}"))
            .collect();
        let schema = PageSchema::biorxiv().compile().unwrap();
        let ctx = RunContext::new(target(), settings(2, 0));

        let outcome = fetch_all(&ctx, &source, &schema, &urls).await;
        assert!(outcome.records.len() <= urls.len());
        assert!(outcome.records.iter().all(|r| r.publication_date == target()));
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.batch_sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_redirects_to_same_paper_are_deduplicated() {
        let source = StaticSource::new()
            .redirect("https://doi.org/1", "https://x/paper", detail_html("May 8, 2024", Some("3"), &[]))
            .redirect("https://doi.org/1v2", "https://x/paper", detail_html("May 8, 2024", Some("3"), &[]));
        let urls = vec!["https://doi.org/1".to_string(), "https://doi.org/1v2".to_string()];
        let schema = PageSchema::biorxiv().compile().unwrap();
        let ctx = RunContext::new(target(), settings(10, 0));

        let outcome = fetch_all(&ctx, &source, &schema, &urls).await;
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_without_any_counter_is_flagged() {
        let source = StaticSource::new()
            .page("https://x/a", detail_html("May 8, 2024", None, &[]))
            .page("https://x/b", detail_html("May 8, 2024", None, &[]))
            .page("https://x/c", detail_html("May 8, 2024", Some("7"), &[]))
            .page("https://x/d", detail_html("May 8, 2024", None, &[]));
        let urls: Vec<String> = ["a", "b", "c", "d"]
            .iter()
            .map(|s| format!("https://x/{s}"))
            .collect();
        let schema = PageSchema::biorxiv().compile().unwrap();
        let ctx = RunContext::new(target(), settings(2, 0));

        let outcome = fetch_all(&ctx, &source, &schema, &urls).await;
        assert_eq!(outcome.records.len(), 4);
        // [a, b] are all zero; [c, d] has one real count.
        assert_eq!(outcome.zero_attention_batches, 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let source = StaticSource::new();
        let schema = PageSchema::biorxiv().compile().unwrap();
        let ctx = RunContext::new(target(), settings(50, 5));
        let outcome = fetch_all(&ctx, &source, &schema, &[]).await;
        assert!(outcome.records.is_empty());
        assert!(outcome.batch_sizes.is_empty());
        assert_eq!(outcome.zero_attention_batches, 0);
    }
}
