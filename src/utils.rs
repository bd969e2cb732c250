//! Utility functions for string handling and file system checks.
//!
//! - String truncation for logging and slugification for file names
//! - JSON error detection for handling LLM response truncation
//! - Retry backoff shared by page loads and LLM requests
//! - File system validation for the output directory

use rand::{Rng, rng};
use std::error::Error;
use std::fs as stdfs;
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Strings longer than `max` bytes are cut at the nearest character boundary
/// at or below `max`, with the number of dropped bytes appended.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off (e.g., due to token limits), the
/// resulting JSON fails to parse with an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Convert a title to a file-name-friendly slug of at most `max_len` chars.
///
/// ```ignore
/// assert_eq!(slugify_title("Hello World", 40), "hello-world");
/// ```
pub fn slugify_title(title: &str, max_len: usize) -> String {
    let slug = title
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    let slug: String = slug.chars().take(max_len).collect();
    slug.trim_end_matches('-').to_string()
}

/// Exponential backoff with jitter.
///
/// # Arguments
///
/// * `base` - Delay before the first retry
/// * `max` - Cap on the exponential part
/// * `retry` - 1-based retry number
///
/// # Returns
///
/// `min(base * 2^(retry-1), max)` plus 0–250ms of random jitter.
pub fn backoff_delay(base: Duration, max: Duration, retry: usize) -> Duration {
    let shift = retry.saturating_sub(1).min(16) as u32;
    let delay = base.saturating_mul(1 << shift).min(max);
    delay + Duration::from_millis(rng().random_range(0..=250))
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        let s = "ééééé"; // 2 bytes each
        assert_eq!(truncate_for_log(s, 3), "é…(+8 bytes)");
    }

    #[test]
    fn test_slugify_title() {
        assert_eq!(slugify_title("Hello World", 40), "hello-world");
        assert_eq!(slugify_title("Test-Article!", 40), "test-article");
        assert_eq!(slugify_title("Multiple   Spaces", 40), "multiple-spaces");
        assert_eq!(
            slugify_title("Plasmodesmal closure elicits stress responses", 20),
            "plasmodesmal-closure"
        );
    }

    #[test]
    fn test_looks_truncated() {
        let json_eof = r#"{"field": "value"#;
        let err = serde_json::from_str::<serde_json::Value>(json_eof).unwrap_err();
        assert!(looks_truncated(&err));

        let json_bad = r#"{"field": nope}"#;
        let err = serde_json::from_str::<serde_json::Value>(json_bad).unwrap_err();
        assert!(!looks_truncated(&err));
    }

    #[test]
    fn test_backoff_delay_doubles_then_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        let first = backoff_delay(base, max, 1);
        assert!(first >= base && first <= base + Duration::from_millis(250));
        let third = backoff_delay(base, max, 3);
        assert!(third >= Duration::from_secs(4) && third <= Duration::from_millis(4_250));
        let late = backoff_delay(base, max, 40);
        assert!(late >= max && late <= max + Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("cards/2024-05-08");
        ensure_writable_dir(nested.to_str().unwrap()).await.unwrap();
        assert!(nested.is_dir());
    }
}
