//! Error types for each stage of the pipeline.
//!
//! Only [`ConfigError`] is fatal to a run. Everything else is reported
//! against a single URL or a single ranked paper and the run moves on.

use std::time::Duration;
use thiserror::Error;

/// Unrecoverable setup problems. These abort the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid time zone identifier: {0}")]
    InvalidTimezone(String),

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("page schema error: {0}")]
    Schema(String),

    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
}

/// A single page load that did not produce a body.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },
}

/// A detail page loaded but a required field could not be read.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("publication date element not found")]
    MissingDate,

    #[error("unparsable publication date: {0:?}")]
    BadDate(String),

    #[error("attention count is not a number: {0:?}")]
    BadCount(String),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF download failed: {0}")]
    Download(#[from] FetchError),

    #[error("PDF text extraction failed: {0}")]
    Pdf(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summarizer request failed: {0}")]
    Request(String),

    #[error("summarizer returned malformed output: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("font error: {0}")]
    Font(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Publisher failures. Permission problems are kept apart so an operator can
/// tell a revoked token from a flaky API.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publisher rejected credentials ({status}): {body}")]
    Permission { status: u16, body: String },

    #[error("publisher API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("publisher request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    /// Classify a non-success HTTP response from the publisher.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => PublishError::Permission { status, body },
            _ => PublishError::Api { status, body },
        }
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, PublishError::Permission { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_classification() {
        assert!(PublishError::from_status(401, "nope".into()).is_permission());
        assert!(PublishError::from_status(403, "forbidden".into()).is_permission());
        assert!(!PublishError::from_status(500, "boom".into()).is_permission());
        assert!(!PublishError::from_status(429, "slow down".into()).is_permission());
    }

    #[test]
    fn test_fetch_error_display() {
        let e = FetchError::Status {
            status: 404,
            url: "https://example.org/x".into(),
        };
        assert_eq!(e.to_string(), "unexpected status 404 for https://example.org/x");
    }
}
