//! Page loading with per-attempt timeouts and a bounded retry budget.
//!
//! # Architecture
//!
//! - [`PageSource`]: anything that turns a URL into HTML
//! - [`HttpPageSource`]: the real thing, backed by one shared `reqwest::Client`
//! - [`RetryingSource`]: decorator adding timeout + retry to any source
//!
//! Scrapers are generic over [`PageSource`], so tests drive them with
//! in-memory fixtures instead of the network.

use crate::error::FetchError;
use crate::utils::backoff_delay;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, warn};

/// Desktop user agent; bioRxiv serves a challenge page to obvious bots.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// A loaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPage {
    /// URL after redirects.
    pub url: String,
    pub html: String,
}

/// Source of HTML documents.
pub trait PageSource {
    async fn load(&self, url: &str) -> Result<LoadedPage, FetchError>;
}

impl<T: PageSource> PageSource for &T {
    async fn load(&self, url: &str) -> Result<LoadedPage, FetchError> {
        (**self).load(url).await
    }
}

/// Plain HTTP page source.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Build the HTTP client shared by every stage of a run.
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(request_timeout)
        .build()
}

impl PageSource for HttpPageSource {
    #[instrument(level = "debug", skip(self))]
    async fn load(&self, url: &str) -> Result<LoadedPage, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let html = response.text().await?;
        debug!(bytes = html.len(), %final_url, "Loaded page");
        Ok(LoadedPage {
            url: final_url,
            html,
        })
    }
}

/// How many times to try a page, and how long each try may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub attempt_timeout: Duration,
    /// Delay before the second attempt, doubled for each further one.
    /// Zero retries immediately.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Retry straight away, no backoff.
    pub fn immediate(attempts: usize, attempt_timeout: Duration) -> Self {
        Self {
            attempts,
            attempt_timeout,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Retry after 1s, doubling up to 10s.
    pub fn with_backoff(attempts: usize, attempt_timeout: Duration) -> Self {
        Self {
            attempts,
            attempt_timeout,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Delay before retry number `attempt` (1-based count of failures so far).
    fn backoff(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        backoff_delay(self.base_delay, self.max_delay, attempt)
    }
}

/// Wraps a [`PageSource`] with a timeout per attempt and retry on failure.
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

impl<S> fmt::Debug for RetryingSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingSource")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<S: PageSource> PageSource for RetryingSource<S> {
    #[instrument(level = "debug", skip(self))]
    async fn load(&self, url: &str) -> Result<LoadedPage, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let result = match timeout(self.policy.attempt_timeout, self.inner.load(url)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.policy.attempt_timeout)),
            };

            match result {
                Ok(page) => return Ok(page),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.policy.attempts.max(1) {
                        warn!(
                            attempt,
                            max = self.policy.attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis(),
                            error = %e,
                            "load() exhausted retries"
                        );
                        return Err(e);
                    }
                    let delay = self.policy.backoff(attempt);
                    debug!(attempt, ?delay, error = %e, "load() attempt failed; retrying");
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! In-memory page sources for scraper tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned HTML keyed by URL; unknown URLs are a 404.
    #[derive(Default)]
    pub struct StaticSource {
        pages: HashMap<String, LoadedPage>,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub requested: Mutex<Vec<String>>,
    }

    impl StaticSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, html: impl Into<String>) -> Self {
            self.pages.insert(
                url.to_string(),
                LoadedPage {
                    url: url.to_string(),
                    html: html.into(),
                },
            );
            self
        }

        /// Serve `html` for `url` but report `final_url` as if redirected.
        pub fn redirect(mut self, url: &str, final_url: &str, html: impl Into<String>) -> Self {
            self.pages.insert(
                url.to_string(),
                LoadedPage {
                    url: final_url.to_string(),
                    html: html.into(),
                },
            );
            self
        }
    }

    impl PageSource for StaticSource {
        async fn load(&self, url: &str) -> Result<LoadedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push(url.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            // Let sibling fetches start before this one finishes.
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.pages.get(url).cloned().ok_or(FetchError::Status {
                status: 404,
                url: url.to_string(),
            })
        }
    }

    /// Fails `failures` times, then serves `html`.
    pub struct FlakySource {
        pub failures: usize,
        pub html: String,
        pub calls: AtomicUsize,
    }

    impl PageSource for FlakySource {
        async fn load(&self, url: &str) -> Result<LoadedPage, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(FetchError::Status {
                    status: 503,
                    url: url.to_string(),
                })
            } else {
                Ok(LoadedPage {
                    url: url.to_string(),
                    html: self.html.clone(),
                })
            }
        }
    }

    /// Never answers.
    pub struct HangingSource;

    impl PageSource for HangingSource {
        async fn load(&self, _url: &str) -> Result<LoadedPage, FetchError> {
            std::future::pending().await
        }
    }
}
