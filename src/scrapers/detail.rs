//! bioRxiv detail-page scraper.
//!
//! Loads one paper page, checks that it was posted on the target date and
//! turns it into a [`PaperRecord`]. A page posted on any other day is not an
//! error, it simply yields nothing.

use super::page::{LoadedPage, PageSource};
use crate::dates::parse_long_date;
use crate::error::ParseError;
use crate::models::{NOT_AVAILABLE, PaperRecord};
use crate::schema::{CompiledSchema, Field};
use chrono::NaiveDate;
use scraper::Html;
use tracing::{debug, instrument, warn};

/// Fetch and parse one detail page.
///
/// Returns `None` when the page could not be loaded within the retry budget
/// of `source`, when a required field does not parse, or when the paper was
/// posted on a different day than `target_date`.
#[instrument(level = "info", skip(source, schema), fields(%url))]
pub async fn fetch_detail<S: PageSource>(
    source: &S,
    schema: &CompiledSchema,
    url: &str,
    target_date: NaiveDate,
) -> Option<PaperRecord> {
    let page = match source.load(url).await {
        Ok(page) => page,
        Err(e) => {
            warn!(error = %e, "Skipping paper; page did not load");
            return None;
        }
    };

    match parse_detail(schema, &page, target_date) {
        Ok(Some(record)) => {
            debug!(attention_count = record.attention_count, title = %record.title, "Parsed paper");
            Some(record)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "Skipping paper; detail page did not parse");
            None
        }
    }
}

/// Parse a loaded detail page.
///
/// `Ok(None)` means the page is fine but belongs to another day.
pub fn parse_detail(
    schema: &CompiledSchema,
    page: &LoadedPage,
    target_date: NaiveDate,
) -> Result<Option<PaperRecord>, ParseError> {
    let document = Html::parse_document(&page.html);

    if !schema.contains(&document, Field::AttentionCount) {
        debug!(url = %page.url, "Attention counter not rendered; counting as zero");
    }

    let date_text = schema
        .first(&document, Field::PostedDate)
        .ok_or(ParseError::MissingDate)?;
    let publication_date =
        parse_long_date(&date_text).ok_or_else(|| ParseError::BadDate(date_text.clone()))?;

    if publication_date != target_date {
        debug!(url = %page.url, %publication_date, %target_date, "Posted on another day; filtered");
        return Ok(None);
    }

    let count_text = schema
        .first(&document, Field::AttentionCount)
        .unwrap_or_else(|| "0".to_string());
    let attention_count = parse_count(&count_text)?;

    let or_na = |value: Option<String>| value.unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let subjects = schema.all(&document, Field::SubjectArea);
    let subject_area = if subjects.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        subjects.join(", ")
    };

    Ok(Some(PaperRecord {
        source_url: page.url.clone(),
        publication_date,
        title: or_na(schema.first(&document, Field::Title)),
        abstract_text: or_na(schema.first(&document, Field::Abstract)),
        subject_area,
        attention_count,
    }))
}

/// Parse a displayed count such as `37` or `1,204`.
fn parse_count(text: &str) -> Result<u64, ParseError> {
    let digits: String = text.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    digits
        .parse::<u64>()
        .map_err(|_| ParseError::BadCount(text.to_string()))
}
