//! Data models for discovered papers and the outcome of processing them.
//!
//! - [`PaperRecord`]: one paper parsed from its detail page
//! - [`Summary`]: the three-bullet summary returned by the LLM
//! - [`ItemOutcome`]: what happened to a ranked paper downstream
//! - [`RunReport`]: everything a run produced, serialized to JSON

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for optional page fields that were not found.
pub const NOT_AVAILABLE: &str = "N/A";

/// A paper published on the run's target date.
///
/// Records are built by [`crate::scrapers::detail::parse_detail`] only after
/// the date filter passes, and are never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PaperRecord {
    /// Final detail-page URL after redirects. Unique within a run.
    pub source_url: String,
    pub publication_date: NaiveDate,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Comma-joined subject tags, or [`NOT_AVAILABLE`].
    pub subject_area: String,
    /// Share count shown on the page; zero when the counter is missing.
    pub attention_count: u64,
}

/// Three bullet points summarizing a paper.
///
/// The field names are the JSON keys the summarization template asks the
/// model to produce.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Summary {
    pub bullet_point_1: String,
    pub bullet_point_2: String,
    pub bullet_point_3: String,
}

impl Summary {
    pub fn bullets(&self) -> [&str; 3] {
        [
            self.bullet_point_1.as_str(),
            self.bullet_point_2.as_str(),
            self.bullet_point_3.as_str(),
        ]
    }

    /// A summary is usable only if every bullet carries text.
    pub fn is_complete(&self) -> bool {
        self.bullets().iter().all(|b| !b.trim().is_empty())
    }
}

/// Downstream stage a ranked paper failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Summarize,
    Render,
    Publish,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Posted { post_id: String, image_path: String },
    /// Card rendered but nothing was posted (dry run).
    Rendered { image_path: String },
    Failed { stage: Stage, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ItemOutcome {
    pub rank: usize,
    pub source_url: String,
    pub title: String,
    #[serde(flatten)]
    pub status: ItemStatus,
}

impl ItemOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, ItemStatus::Failed { .. })
    }
}

/// Summary of one pipeline run, written to `{output_dir}/{target_date}.json`.
#[derive(Debug, Deserialize, Serialize)]
pub struct RunReport {
    pub target_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub discovery: String,
    /// Detail URLs produced by discovery.
    pub candidates: usize,
    /// Records that passed the date filter.
    pub fetched: usize,
    pub ranked: Vec<PaperRecord>,
    pub outcomes: Vec<ItemOutcome>,
}
