//! JSON run report.
//!
//! One file per target date. A re-run on the same day overwrites the
//! previous report.

use crate::models::RunReport;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Path of the report for `report.target_date` under `output_dir`.
pub fn report_path(output_dir: &Path, report: &RunReport) -> PathBuf {
    output_dir.join(format!("{}.json", report.target_date))
}

/// Write a [`RunReport`] as pretty JSON to `{output_dir}/{target_date}.json`.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display()))]
pub async fn write_run_report(
    report: &RunReport,
    output_dir: &Path,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;

    if let Err(e) = fs::create_dir_all(output_dir).await {
        error!(error = %e, "Failed to create output dir");
        return Err(e.into());
    }

    let path = report_path(output_dir, report);
    info!(path = %path.display(), "Writing run report");
    fs::write(&path, json).await?;
    info!(
        path = %path.display(),
        ranked = report.ranked.len(),
        outcomes = report.outcomes.len(),
        "Wrote run report"
    );

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemOutcome, ItemStatus, PaperRecord, Stage};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn report() -> RunReport {
        let date = NaiveDate::from_ymd_opt(2024, 5, 8).unwrap();
        RunReport {
            target_date: date,
            generated_at: Utc.with_ymd_and_hms(2024, 5, 9, 14, 0, 0).unwrap(),
            discovery: "search".into(),
            candidates: 3,
            fetched: 2,
            ranked: vec![PaperRecord {
                source_url: "https://www.biorxiv.org/content/10.1101/a".into(),
                publication_date: date,
                title: "A".into(),
                abstract_text: "abs".into(),
                subject_area: "Genomics".into(),
                attention_count: 42,
            }],
            outcomes: vec![ItemOutcome {
                rank: 1,
                source_url: "https://www.biorxiv.org/content/10.1101/a".into(),
                title: "A".into(),
                status: ItemStatus::Failed {
                    stage: Stage::Summarize,
                    error: "bad json".into(),
                },
            }],
        }
    }

    #[tokio::test]
    async fn test_write_run_report() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("runs");
        let path = write_run_report(&report(), &dir).await.unwrap();
        assert_eq!(path, dir.join("2024-05-08.json"));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["candidates"], 3);
        assert_eq!(written["ranked"][0]["attention_count"], 42);
        assert_eq!(written["ranked"][0]["abstract"], "abs");
        assert_eq!(written["outcomes"][0]["status"], "failed");
        assert_eq!(written["outcomes"][0]["stage"], "summarize");
    }

    #[tokio::test]
    async fn test_rerun_overwrites_report() {
        let tmp = tempfile::tempdir().unwrap();
        let mut r = report();
        write_run_report(&r, tmp.path()).await.unwrap();
        r.outcomes.clear();
        let path = write_run_report(&r, tmp.path()).await.unwrap();
        let back: RunReport = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(back.outcomes.is_empty());
    }
}
