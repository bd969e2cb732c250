//! Target-date resolution and long-form date parsing.
//!
//! A run always targets "yesterday" in a fixed time zone (bioRxiv posts on
//! US Eastern time), independent of where the job is scheduled.

use crate::error::ConfigError;
use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, instrument};

/// Default zone used when none is configured.
pub const DEFAULT_TIMEZONE: &str = "US/Eastern";

/// Look up an IANA time zone by name.
pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::InvalidTimezone(name.to_string()))
}

/// Resolve the target publication date: the calendar day before "now" in
/// `timezone_name`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidTimezone`] for an unknown zone name.
#[instrument(level = "debug")]
pub fn resolve_target_date(timezone_name: &str) -> Result<NaiveDate, ConfigError> {
    let tz = parse_timezone(timezone_name)?;
    let date = target_date_at(Utc::now(), tz);
    debug!(%date, "Resolved target date");
    Ok(date)
}

/// Same as [`resolve_target_date`] with an explicit clock.
pub fn target_date_at(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    let today = now.with_timezone(&tz).date_naive();
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}

/// Parse a long-form date such as `May 8, 2024`.
pub fn parse_long_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%B %d, %Y").ok()
}
