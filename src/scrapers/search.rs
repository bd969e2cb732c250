//! Discovery through the bioRxiv search endpoint.
//!
//! One search restricted to a single day (`limit_from` = `limit_to` = target
//! date) lists every paper posted that day. The pager under the results gives
//! the remaining listing pages; each listing page gives DOI links.
//!
//! # URL Pattern
//!
//! ```text
//! https://www.biorxiv.org/search/jcode%3Abiorxiv%20limit_from%3A2024-05-08%20limit_to%3A2024-05-08%20numresults%3A75%20sort%3Arelevance-rank%20format_result%3Astandard
//! ```

use super::page::PageSource;
use crate::schema::{CompiledSchema, Field};
use chrono::NaiveDate;
use itertools::Itertools;
use scraper::Html;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Results per search page.
pub const DEFAULT_RESULTS_PER_PAGE: usize = 75;

/// Build the single-day search URL.
pub fn search_url(base: &Url, date: NaiveDate, results_per_page: usize) -> String {
    let terms = [
        "jcode:biorxiv".to_string(),
        format!("limit_from:{date}"),
        format!("limit_to:{date}"),
        format!("numresults:{results_per_page}"),
        "sort:relevance-rank".to_string(),
        "format_result:standard".to_string(),
    ];
    let query = urlencoding::encode(&terms.join(" ")).into_owned();
    format!("{}/search/{}", base.as_str().trim_end_matches('/'), query)
}

/// Find every listing page of the search results, first page included.
///
/// An unreachable search page or a page without the pager container means no
/// papers were posted (or the markup changed); both yield an empty list.
#[instrument(level = "info", skip(source, schema, base))]
pub async fn discover_listing_pages<S: PageSource>(
    source: &S,
    schema: &CompiledSchema,
    base: &Url,
    search_url: &str,
) -> Vec<String> {
    let page = match source.load(search_url).await {
        Ok(page) => page,
        Err(e) => {
            warn!(error = %e, "Search page did not load; treating as no papers");
            return Vec::new();
        }
    };

    match parse_pager(schema, &page.html, base, search_url) {
        Some(pages) => {
            info!(count = pages.len(), "Discovered listing pages");
            pages
        }
        None => {
            warn!("Pager container not found; treating as no papers");
            Vec::new()
        }
    }
}

/// Listing page URLs from the pager, starting with `first_page`.
///
/// `None` when the pager container is absent.
pub fn parse_pager(
    schema: &CompiledSchema,
    html: &str,
    base: &Url,
    first_page: &str,
) -> Option<Vec<String>> {
    let document = Html::parse_document(html);
    if !schema.contains(&document, Field::PagerContainer) {
        return None;
    }
    let links = schema
        .all(&document, Field::PagerLink)
        .into_iter()
        .filter_map(|href| resolve(base, &href));
    Some(
        std::iter::once(first_page.to_string())
            .chain(links)
            .unique()
            .collect(),
    )
}

/// Open each listing page in order and collect the detail URLs it links to.
///
/// Listing pages that fail to load are skipped. Duplicates are dropped,
/// keeping the first occurrence.
#[instrument(level = "info", skip_all, fields(pages = listing_pages.len()))]
pub async fn collect_detail_urls<S: PageSource>(
    source: &S,
    schema: &CompiledSchema,
    base: &Url,
    listing_pages: &[String],
) -> Vec<String> {
    let mut urls = Vec::new();
    for listing in listing_pages {
        match source.load(listing).await {
            Ok(page) => {
                let found = parse_result_links(schema, &page.html, base);
                debug!(%listing, count = found.len(), "Collected result links");
                urls.extend(found);
            }
            Err(e) => warn!(%listing, error = %e, "Listing page did not load; skipping"),
        }
    }
    let urls: Vec<String> = urls.into_iter().unique().collect();
    info!(count = urls.len(), "Collected candidate paper URLs");
    urls
}

/// Result links on one listing page, resolved against `base`.
pub fn parse_result_links(schema: &CompiledSchema, html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    schema
        .all(&document, Field::ResultLink)
        .into_iter()
        .filter_map(|link| resolve(base, &link))
        .collect()
}

/// Resolve a possibly relative link.
pub(crate) fn resolve(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(|u| u.to_string())
}

/// Run the whole search strategy for `date`.
pub async fn discover<S: PageSource>(
    source: &S,
    schema: &CompiledSchema,
    base: &Url,
    date: NaiveDate,
    results_per_page: usize,
) -> Vec<String> {
    let first = search_url(base, date, results_per_page);
    let listing_pages = discover_listing_pages(source, schema, base, &first).await;
    if listing_pages.is_empty() {
        return Vec::new();
    }
    collect_detail_urls(source, schema, base, &listing_pages).await
}
