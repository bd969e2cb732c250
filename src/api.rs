//! LLM summarization with exponential backoff retry logic.
//!
//! Paper text is sent to an OpenAI-compatible chat endpoint through
//! `awful_aj`. The chat template (default `paper_summarizer`) instructs the
//! model to answer with a JSON object holding exactly three bullet points:
//!
//! ```json
//! {"bullet_point_1": "...", "bullet_point_2": "...", "bullet_point_3": "..."}
//! ```
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait defining async LLM interaction
//! - [`AskFnWrapper`]: wraps the `awful_aj` library's `ask` function
//! - [`RetryAsk`]: decorator that adds retry logic to any `AskAsync` implementation
//! - [`PaperSummarizer`]: turns a response into a validated [`Summary`]
//!
//! # Retry Strategy
//!
//! [`ask_with_backoff`] retries a failed request up to [`ASK_RETRIES`]
//! times, 1s apart at first and doubling up to 30s, plus up to 250ms of
//! jitter. Malformed JSON is not retried there; [`PaperSummarizer`] re-asks
//! once only when the reply was cut off mid-object.

use crate::error::SummaryError;
use crate::models::Summary;
use crate::utils::{backoff_delay, looks_truncated, truncate_for_log};
use awful_aj::api::ask;
use awful_aj::{config, config::AwfulJadeConfig, config_dir, template, template::ChatTemplate};
use std::error::Error;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Template used when none is given on the command line.
pub const DEFAULT_TEMPLATE: &str = "paper_summarizer";

/// Retries made by [`ask_with_backoff`] after the first failure.
pub const ASK_RETRIES: usize = 5;
const MAX_ASK_DELAY: StdDuration = StdDuration::from_secs(30);

/// A chat backend that answers one prompt at a time.
///
/// Implemented by the real `awful_aj` client ([`AskFnWrapper`]), by the
/// [`RetryAsk`] decorator, and by scripted fakes in tests.
pub trait AskAsync {
    /// What the backend answers with; a raw `String` for every backend here.
    type Response;

    /// Send the paper text as the user turn of the summarization template.
    ///
    /// # Arguments
    ///
    /// * `text` - Paper text, already cut to the token budget
    ///
    /// # Returns
    ///
    /// The model's reply, or the transport/API error that ended the request.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Retries a failing [`AskAsync`] backend with exponential backoff.
///
/// The delay before retry `n` is computed by [`backoff_delay`]:
///
/// ```text
/// min(base_delay * 2^(n-1), max_delay) + jitter(0..=250ms)
/// ```
///
/// A request is tried at most `max_retries + 1` times.
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T: AskAsync> RetryAsk<T> {
    /// Wrap `inner`.
    ///
    /// # Arguments
    ///
    /// * `inner` - Backend to retry
    /// * `max_retries` - Retries after the first failure
    /// * `base_delay` - Delay before the first retry; doubles every retry up to 30s
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: MAX_ASK_DELAY,
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all, fields(max_retries = self.max_retries))]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let started = Instant::now();
        let mut retry = 0usize;
        loop {
            let e = match self.inner.ask(text).await {
                Ok(reply) => return Ok(reply),
                Err(e) => e,
            };
            if retry >= self.max_retries {
                error!(
                    tries = retry + 1,
                    elapsed_ms_total = started.elapsed().as_millis(),
                    error = %e,
                    "Summarizer request exhausted retries"
                );
                return Err(e);
            }
            let delay = backoff_delay(self.base_delay, self.max_delay, retry + 1);
            warn!(try_number = retry + 1, ?delay, error = %e, "Summarizer request failed; backing off");
            sleep(delay).await;
            retry += 1;
        }
    }
}

/// The `awful_aj` client as an [`AskAsync`] backend.
#[derive(Debug)]
pub struct AskFnWrapper<'a> {
    pub config: &'a AwfulJadeConfig,
    pub template: &'a ChatTemplate,
}

impl AskAsync for AskFnWrapper<'_> {
    type Response = String;

    #[instrument(level = "debug", skip_all, fields(chars = text.len()))]
    async fn ask(&self, text: &str) -> Result<String, Box<dyn Error>> {
        let t0 = Instant::now();
        let reply = ask(self.config, text.to_string(), self.template, None, None).await;
        match &reply {
            Ok(r) => debug!(elapsed_ms = t0.elapsed().as_millis(), reply_chars = r.len(), "Model replied"),
            Err(e) => warn!(elapsed_ms = t0.elapsed().as_millis(), error = %e, "Model request failed"),
        }
        reply
    }
}

/// Ask the model once, retrying transient failures.
///
/// # Arguments
///
/// * `config` - awful_aj endpoint, model and key
/// * `text` - Paper text
/// * `template` - Chat template holding the summarization instructions
///
/// # Returns
///
/// The raw reply, expected to be the three-bullet JSON object. Up to
/// [`ASK_RETRIES`] retries are made, starting 1s apart.
#[instrument(level = "info", skip_all)]
pub async fn ask_with_backoff(
    config: &AwfulJadeConfig,
    text: &str,
    template: &ChatTemplate,
) -> Result<String, Box<dyn Error>> {
    let t0 = Instant::now();
    let api = RetryAsk::new(AskFnWrapper { config, template }, ASK_RETRIES, StdDuration::from_secs(1));
    let reply = api.ask(text).await;
    if reply.is_ok() {
        info!(elapsed_ms_total = t0.elapsed().as_millis(), "Summary request succeeded");
    }
    reply
}

/// Load the awful_aj configuration and the summarization template.
///
/// `config_path` defaults to `config.yaml` in the awful_aj config directory.
#[instrument(level = "info")]
pub async fn load_llm(
    config_path: Option<&str>,
    template_name: &str,
) -> Result<(AwfulJadeConfig, ChatTemplate), Box<dyn Error>> {
    let config_path = match config_path {
        Some(path) => path.to_string(),
        None => config_dir()?
            .join("config.yaml")
            .to_str()
            .ok_or("awful_aj config path is not valid UTF-8")?
            .to_string(),
    };
    let config = config::load_config(&config_path)?;
    info!(%config_path, "Loaded LLM configuration");
    let template = template::load_template(template_name).await?;
    info!(template = template_name, "Loaded template");
    Ok((config, template))
}

/// Anything that can summarize a paper into three bullet points.
pub trait Summarize {
    async fn summarize(&self, text: &str) -> Result<Summary, SummaryError>;
}

/// Parse and validate a model response.
pub fn parse_summary(response: &str) -> Result<Summary, serde_json::Error> {
    serde_json::from_str::<Summary>(response.trim())
}

/// Summarizes through any [`AskAsync`] backend, re-asking once when the
/// response was cut off mid-JSON.
#[derive(Debug)]
pub struct PaperSummarizer<A> {
    backend: A,
}

impl<A> PaperSummarizer<A> {
    pub fn new(backend: A) -> Self {
        Self { backend }
    }
}

/// The production backend: `awful_aj` with backoff.
#[derive(Debug)]
pub struct AwfulBackend {
    pub config: AwfulJadeConfig,
    pub template: ChatTemplate,
}

impl AskAsync for AwfulBackend {
    type Response = String;

    async fn ask(&self, text: &str) -> Result<String, Box<dyn Error>> {
        ask_with_backoff(&self.config, text, &self.template).await
    }
}

impl<A> Summarize for PaperSummarizer<A>
where
    A: AskAsync<Response = String>,
{
    #[instrument(level = "info", skip_all, fields(chars = text.len()))]
    async fn summarize(&self, text: &str) -> Result<Summary, SummaryError> {
        let response = self
            .backend
            .ask(text)
            .await
            .map_err(|e| SummaryError::Request(e.to_string()))?;

        let mut parsed = parse_summary(&response);
        let mut last_response = response;

        if let Err(ref e) = parsed {
            if looks_truncated(e) {
                warn!(error = %e, "EOF while parsing summary; re-asking once");
                match self.backend.ask(text).await {
                    Ok(r2) => {
                        parsed = parse_summary(&r2);
                        last_response = r2;
                    }
                    Err(e2) => warn!(error = %e2, "Re-ask failed"),
                }
            }
        }

        match parsed {
            Ok(summary) if summary.is_complete() => Ok(summary),
            Ok(_) => Err(SummaryError::Malformed("summary has an empty bullet point".into())),
            Err(e) => {
                warn!(
                    error = %e,
                    response_preview = %truncate_for_log(&last_response, 300),
                    "Model returned non-conforming JSON"
                );
                Err(SummaryError::Malformed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays canned responses in order.
    #[derive(Debug)]
    struct Scripted {
        responses: RefCell<VecDeque<Result<String, String>>>,
        calls: RefCell<usize>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<&str, &str>>) -> Self {
            Self {
                responses: RefCell::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                calls: RefCell::new(0),
            }
        }
    }

    impl AskAsync for Scripted {
        type Response = String;

        async fn ask(&self, _text: &str) -> Result<String, Box<dyn Error>> {
            *self.calls.borrow_mut() += 1;
            match self.responses.borrow_mut().pop_front() {
                Some(Ok(r)) => Ok(r),
                Some(Err(e)) => Err(e.into()),
                None => Err("no more responses".into()),
            }
        }
    }

    const GOOD: &str = r#"{"bullet_point_1":"a","bullet_point_2":"b","bullet_point_3":"c"}"#;

    #[tokio::test]
    async fn test_summarize_parses_three_bullets() {
        let summarizer = PaperSummarizer::new(Scripted::new(vec![Ok(GOOD)]));
        let summary = summarizer.summarize("paper").await.unwrap();
        assert_eq!(summary.bullets(), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_truncated_response_is_re_asked_once() {
        let backend = Scripted::new(vec![Ok(r#"{"bullet_point_1":"a","bul"#), Ok(GOOD)]);
        let summarizer = PaperSummarizer::new(backend);
        assert!(summarizer.summarize("paper").await.is_ok());
        assert_eq!(*summarizer.backend.calls.borrow(), 2);
    }

    #[tokio::test]
    async fn test_malformed_response_is_hard_error() {
        let backend = Scripted::new(vec![Ok(r#"{"summary":"one paragraph"}"#)]);
        let summarizer = PaperSummarizer::new(backend);
        let err = summarizer.summarize("paper").await.unwrap_err();
        assert!(matches!(err, SummaryError::Malformed(_)));
        assert_eq!(*summarizer.backend.calls.borrow(), 1);
    }

    #[tokio::test]
    async fn test_empty_bullet_is_malformed() {
        let backend = Scripted::new(vec![Ok(
            r#"{"bullet_point_1":"a","bullet_point_2":"","bullet_point_3":"c"}"#,
        )]);
        let err = PaperSummarizer::new(backend).summarize("paper").await.unwrap_err();
        assert!(matches!(err, SummaryError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_request_failure_is_reported() {
        let backend = Scripted::new(vec![Err("connection refused")]);
        let err = PaperSummarizer::new(backend).summarize("paper").await.unwrap_err();
        assert!(matches!(err, SummaryError::Request(ref m) if m.contains("connection refused")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ask_recovers() {
        let backend = Scripted::new(vec![Err("503"), Err("503"), Ok(GOOD)]);
        let api = RetryAsk::new(backend, 5, StdDuration::from_secs(1));
        assert_eq!(api.ask("x").await.unwrap(), GOOD);
        assert_eq!(*api.inner.calls.borrow(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ask_gives_up() {
        let backend = Scripted::new(vec![Err("a"), Err("b"), Err("c")]);
        let api = RetryAsk::new(backend, 2, StdDuration::from_secs(1));
        assert!(api.ask("x").await.is_err());
        assert_eq!(*api.inner.calls.borrow(), 3);
    }
}
