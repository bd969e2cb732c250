//! Command-line interface definitions for bioRxiv Trending.
//!
//! Every option has a default; only the X access token is needed for a real
//! (non dry-run) post. Secrets come from the environment.

use crate::api::DEFAULT_TEMPLATE;
use crate::batch::RunSettings;
use crate::dates::DEFAULT_TIMEZONE;
use crate::extract::{DEFAULT_TOKEN_BUDGET, DEFAULT_TOKENIZER_MODEL};
use crate::rank::DEFAULT_TOP_N;
use crate::scrapers::Discovery;
use crate::scrapers::probe::{DEFAULT_MAX_PAGES, DEFAULT_PROBE_WIDTH};
use crate::scrapers::search::DEFAULT_RESULTS_PER_PAGE;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for bioRxiv Trending.
///
/// # Examples
///
/// ```sh
/// # Yesterday's top ten, rendered but not posted
/// biorxiv_trending --dry-run -o ./cards
///
/// # Only list what would be ranked, walking the "recent" listing
/// biorxiv_trending --discover-only --discovery probe
///
/// # Post for real
/// X_ACCESS_TOKEN=... biorxiv_trending -o ./cards --lookup-handles
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Time zone whose "yesterday" is the target date
    #[arg(long, default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// How to find the day's papers
    #[arg(long, value_enum, default_value_t = Discovery::Search)]
    pub discovery: Discovery,

    /// Site root
    #[arg(long, default_value = "https://www.biorxiv.org")]
    pub base_url: String,

    /// Results per search listing page
    #[arg(long, default_value_t = DEFAULT_RESULTS_PER_PAGE)]
    pub results_per_page: usize,

    /// Detail pages fetched concurrently per batch
    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,

    /// Pause between batches, in seconds
    #[arg(long, default_value_t = 5)]
    pub batch_delay_secs: u64,

    /// Timeout of a single page load, in seconds
    #[arg(long, default_value_t = 60)]
    pub load_timeout_secs: u64,

    /// Attempts per page before it is skipped
    #[arg(long, default_value_t = 3)]
    pub attempts: usize,

    /// Listing pages probed concurrently (probe discovery)
    #[arg(long, default_value_t = DEFAULT_PROBE_WIDTH)]
    pub probe_width: usize,

    /// Highest listing page index probed (probe discovery)
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    pub max_pages: usize,

    /// Number of papers to keep
    #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_N)]
    pub top: usize,

    /// Pause between posts, in seconds
    #[arg(long, default_value_t = 600)]
    pub post_delay_secs: u64,

    /// Directory for cards and the run report
    #[arg(short, long, default_value = "./output")]
    pub output_dir: String,

    /// Card background image
    #[arg(long, default_value = "assets/background.png")]
    pub background: PathBuf,

    /// Font for title, bullets and subject area
    #[arg(long, default_value = "assets/fonts/Roboto-Regular.ttf")]
    pub text_font: PathBuf,

    /// Font for the account handle
    #[arg(long, default_value = "assets/fonts/Roboto-Bold.ttf")]
    pub brand_font: PathBuf,

    /// Account handle printed on the card
    #[arg(long, default_value = "@bioRxivGPT")]
    pub brand: String,

    /// YAML file overriding page selectors
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Optional path to the awful_aj config.yaml
    #[arg(short, long)]
    pub config: Option<String>,

    /// awful_aj template used for summaries
    #[arg(long, default_value = DEFAULT_TEMPLATE)]
    pub template: String,

    /// Maximum tokens of paper text sent to the model
    #[arg(long, default_value_t = DEFAULT_TOKEN_BUDGET)]
    pub token_budget: usize,

    /// Model whose tokenizer measures the budget
    #[arg(long, default_value = DEFAULT_TOKENIZER_MODEL)]
    pub tokenizer_model: String,

    /// Look up author X handles through GitHub
    #[arg(long)]
    pub lookup_handles: bool,

    /// Render cards but do not post
    #[arg(long)]
    pub dry_run: bool,

    /// Stop after ranking; no extraction, summaries or posts
    #[arg(long)]
    pub discover_only: bool,

    /// OAuth 2.0 user access token for the X API
    #[arg(long, env = "X_ACCESS_TOKEN", hide_env_values = true)]
    pub x_access_token: Option<String>,

    /// GitHub token for the user search API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
}

impl Cli {
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            batch_size: self.batch_size.max(1),
            batch_delay: Duration::from_secs(self.batch_delay_secs),
            load_timeout: Duration::from_secs(self.load_timeout_secs),
            attempts: self.attempts.max(1),
        }
    }

    pub fn post_delay(&self) -> Duration {
        Duration::from_secs(self.post_delay_secs)
    }

    /// Whether extraction, summaries and cards are needed at all.
    pub fn needs_downstream(&self) -> bool {
        !self.discover_only
    }

    /// Whether the run reaches the posting stage.
    pub fn needs_x_token(&self) -> bool {
        !self.dry_run && !self.discover_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["biorxiv_trending"]);

        assert_eq!(cli.timezone, "US/Eastern");
        assert_eq!(cli.discovery, Discovery::Search);
        assert_eq!(cli.top, 10);
        assert_eq!(cli.template, "paper_summarizer");
        assert_eq!(cli.run_settings(), RunSettings::default());
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["biorxiv_trending", "-o", "/tmp/cards", "-n", "3"]);

        assert_eq!(cli.output_dir, "/tmp/cards");
        assert_eq!(cli.top, 3);
    }

    #[test]
    fn test_cli_probe_discovery() {
        let cli = Cli::parse_from([
            "biorxiv_trending",
            "--discovery",
            "probe",
            "--probe-width",
            "8",
            "--batch-size",
            "0",
        ]);

        assert_eq!(cli.discovery, Discovery::Probe);
        assert_eq!(cli.probe_width, 8);
        assert_eq!(cli.run_settings().batch_size, 1);
    }

    #[test]
    fn test_token_only_needed_when_posting() {
        let dry = Cli::parse_from(["biorxiv_trending", "--dry-run"]);
        assert!(!dry.needs_x_token());
        let listing = Cli::parse_from(["biorxiv_trending", "--discover-only"]);
        assert!(!listing.needs_x_token());
        let real = Cli::parse_from(["biorxiv_trending"]);
        assert!(real.needs_x_token());
    }

    #[test]
    fn test_downstream_skipped_only_for_discover_only() {
        assert!(Cli::parse_from(["biorxiv_trending", "--dry-run"]).needs_downstream());
        assert!(!Cli::parse_from(["biorxiv_trending", "--discover-only"]).needs_downstream());
    }
}
