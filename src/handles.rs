//! Author handle lookup.
//!
//! Email addresses are pulled from the paper text, matched to GitHub users
//! with the user search API, and each user's public `twitter_username` is
//! used as the handle. Every failure along the way just means fewer handles.

use crate::models::PaperRecord;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const MAX_EMAILS: usize = 10;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

/// Unique email addresses in order of first appearance, at most [`MAX_EMAILS`].
pub fn extract_emails(text: &str) -> Vec<String> {
    EMAIL_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
        .unique()
        .take(MAX_EMAILS)
        .collect()
}

/// Something that can find social handles for a paper's authors.
pub trait HandleLookup {
    async fn handles(&self, record: &PaperRecord, text: &str) -> Vec<String>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    twitter_username: Option<String>,
}

/// GitHub-backed handle lookup.
#[derive(Debug, Clone)]
pub struct GithubHandles {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubHandles {
    pub fn new(client: reqwest::Client, token: Option<String>) -> Self {
        Self {
            client,
            api_base: GITHUB_API_BASE.to_string(),
            token,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, reqwest::Error> {
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, "biorxiv_trending")
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?.json().await
    }

    async fn handle_for_email(&self, email: &str) -> Result<Option<String>, reqwest::Error> {
        let query = urlencoding::encode(&format!("{email} in:email")).into_owned();
        let search: SearchResponse = self
            .get_json(&format!("{}/search/users?q={query}", self.api_base))
            .await?;
        let Some(item) = search.items.into_iter().next() else {
            return Ok(None);
        };
        let user: GithubUser = self
            .get_json(&format!("{}/users/{}", self.api_base, item.login))
            .await?;
        Ok(user.twitter_username.filter(|h| !h.trim().is_empty()))
    }
}

impl HandleLookup for GithubHandles {
    #[instrument(level = "info", skip_all, fields(url = %record.source_url))]
    async fn handles(&self, record: &PaperRecord, text: &str) -> Vec<String> {
        let emails = extract_emails(text);
        debug!(count = emails.len(), "Found author emails");
        let mut handles = Vec::new();
        for email in &emails {
            match self.handle_for_email(email).await {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "GitHub lookup failed; continuing without handles");
                    break;
                }
            }
        }
        let handles: Vec<String> = handles.into_iter().unique().collect();
        info!(count = handles.len(), "Resolved author handles");
        handles
    }
}

/// Lookup that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHandles;

impl HandleLookup for NoHandles {
    async fn handles(&self, _record: &PaperRecord, _text: &str) -> Vec<String> {
        Vec::new()
    }
}

/// The lookup chosen at startup.
#[derive(Debug, Clone)]
pub enum AnyHandles {
    Github(GithubHandles),
    Disabled(NoHandles),
}

impl HandleLookup for AnyHandles {
    async fn handles(&self, record: &PaperRecord, text: &str) -> Vec<String> {
        match self {
            AnyHandles::Github(h) => h.handles(record, text).await,
            AnyHandles::Disabled(h) => h.handles(record, text).await,
        }
    }
}
