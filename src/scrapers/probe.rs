//! Discovery by probing the "recent" listing page by page.
//!
//! The recent listing is reverse-chronological, one posting day per page
//! heading. Pages are fetched a few at a time; a page dated on the target
//! day contributes its article links, a newer page is skipped, and the first
//! older page ends the search.
//!
//! Results of a batch are examined in page-index order, not arrival order,
//! so a slow in-range page is never lost because an older sibling finished
//! first.

use super::page::PageSource;
use super::search::resolve;
use crate::dates::parse_long_date;
use crate::schema::{CompiledSchema, Field};
use chrono::NaiveDate;
use futures::future::join_all;
use itertools::Itertools;
use scraper::Html;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const DEFAULT_PROBE_WIDTH: usize = 5;
pub const DEFAULT_MAX_PAGES: usize = 200;

/// What one listing page says about the target date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageVerdict {
    /// Dated on the target day; carries the article links.
    Match(Vec<String>),
    Newer,
    Older,
    /// Failed to load, or no parsable date heading.
    Empty,
}

/// URL of listing page `index`.
pub fn listing_url(base: &Url, index: usize) -> String {
    format!(
        "{}/content/early/recent?page={index}",
        base.as_str().trim_end_matches('/')
    )
}

/// Classify a listing page against the target date.
pub fn classify(schema: &CompiledSchema, html: &str, base: &Url, target: NaiveDate) -> PageVerdict {
    let document = Html::parse_document(html);
    let Some(date) = schema
        .first(&document, Field::ListingDate)
        .and_then(|heading| parse_long_date(&heading))
    else {
        return PageVerdict::Empty;
    };

    if date == target {
        let links = schema
            .all(&document, Field::ListingArticle)
            .into_iter()
            .filter_map(|href| resolve(base, &href))
            .collect();
        PageVerdict::Match(links)
    } else if date > target {
        PageVerdict::Newer
    } else {
        PageVerdict::Older
    }
}

/// Fold one batch of verdicts, in page-index order, into `urls`.
///
/// Returns `true` when the search should stop: an older page was seen, or
/// the whole batch was empty (past the end of the listing).
fn absorb_batch(verdicts: Vec<PageVerdict>, urls: &mut Vec<String>) -> bool {
    if verdicts.iter().all(|v| *v == PageVerdict::Empty) {
        return true;
    }
    for verdict in verdicts {
        match verdict {
            PageVerdict::Match(links) => urls.extend(links),
            PageVerdict::Newer | PageVerdict::Empty => {}
            PageVerdict::Older => return true,
        }
    }
    false
}

/// Probe listing pages from index 0 until the listing moves past `target`.
///
/// `source` is expected to carry its own retry budget; a page that still
/// fails counts as empty.
#[instrument(level = "info", skip(source, schema, base))]
pub async fn discover<S: PageSource>(
    source: &S,
    schema: &CompiledSchema,
    base: &Url,
    target: NaiveDate,
    width: usize,
    max_pages: usize,
) -> Vec<String> {
    let width = width.max(1);
    let mut urls = Vec::new();
    let mut next = 0usize;

    while next < max_pages {
        let indices: Vec<usize> = (next..(next + width).min(max_pages)).collect();
        next += indices.len();

        let verdicts = join_all(indices.iter().map(|&index| async move {
            let url = listing_url(base, index);
            match source.load(&url).await {
                Ok(page) => classify(schema, &page.html, base, target),
                Err(e) => {
                    warn!(%url, error = %e, "Listing page did not load; treating as empty");
                    PageVerdict::Empty
                }
            }
        }))
        .await;

        debug!(first = indices[0], ?verdicts, "Probed batch");
        if absorb_batch(verdicts, &mut urls) {
            break;
        }
    }

    let urls: Vec<String> = urls.into_iter().unique().collect();
    info!(count = urls.len(), pages_probed = next, "Collected candidate paper URLs");
    urls
}
