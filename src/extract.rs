//! Full-text extraction from a paper's PDF.
//!
//! The PDF is downloaded, converted to plain text with `pdf-extract`, and cut
//! to a token budget with the tokenizer of the summarization model so the
//! prompt always fits the model's context window.

use crate::error::{ExtractError, FetchError};
use crate::models::PaperRecord;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_TOKEN_BUDGET: usize = 120_000;
pub const DEFAULT_TOKENIZER_MODEL: &str = "gpt-3.5-turbo";

/// Anything that can produce the text of a paper.
pub trait DocumentText {
    async fn document_text(&self, record: &PaperRecord) -> Result<String, ExtractError>;
}

/// bioRxiv serves the PDF next to the detail page with a `.full.pdf` suffix.
pub fn pdf_url(source_url: &str) -> String {
    if source_url.ends_with(".full.pdf") {
        source_url.to_string()
    } else {
        format!("{source_url}.full.pdf")
    }
}

/// Load the tokenizer for `model`.
pub fn load_tokenizer(model: &str) -> Result<CoreBPE, ExtractError> {
    tiktoken_rs::get_bpe_from_model(model).map_err(|e| ExtractError::Tokenizer(e.to_string()))
}

/// Keep at most `budget` tokens of `text`.
///
/// A byte-level BPE can split one character (`µ`, `²⁺`, `𝛼`) across several
/// tokens. When the cut lands inside such a character the prefix is not
/// valid UTF-8, so the cut moves back one token at a time until it decodes.
///
/// # Returns
///
/// A prefix of `text` of at most `budget` tokens. `text` itself when it
/// already fits.
pub fn truncate_to_budget(text: String, budget: usize, bpe: &CoreBPE) -> Result<String, ExtractError> {
    let tokens = bpe.encode_with_special_tokens(&text);
    if tokens.len() <= budget {
        return Ok(text);
    }
    debug!(tokens = tokens.len(), budget, "Truncating document to token budget");

    let mut cut = budget;
    loop {
        match bpe.decode(tokens[..cut].to_vec()) {
            Ok(prefix) => {
                if cut < budget {
                    debug!(dropped = budget - cut, "Moved cut back to a character boundary");
                }
                return Ok(prefix);
            }
            Err(e) if cut == 0 => return Err(ExtractError::Tokenizer(e.to_string())),
            Err(_) => cut -= 1,
        }
    }
}

/// Extract text from PDF bytes and truncate it, off the async runtime.
pub async fn extract_text(
    bytes: Vec<u8>,
    budget: usize,
    bpe: Arc<CoreBPE>,
) -> Result<String, ExtractError> {
    tokio::task::spawn_blocking(move || {
        let text = pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        truncate_to_budget(text, budget, &bpe)
    })
    .await
    .map_err(|e| ExtractError::Pdf(format!("PDF parser panicked: {e}")))?
}

/// Downloads and extracts paper PDFs over HTTP.
#[derive(Clone)]
pub struct PdfExtractor {
    client: reqwest::Client,
    budget: usize,
    bpe: Arc<CoreBPE>,
}

impl PdfExtractor {
    pub fn new(client: reqwest::Client, budget: usize, model: &str) -> Result<Self, ExtractError> {
        Ok(Self {
            client,
            budget,
            bpe: Arc::new(load_tokenizer(model)?),
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl DocumentText for PdfExtractor {
    #[instrument(level = "info", skip_all, fields(url = %record.source_url))]
    async fn document_text(&self, record: &PaperRecord) -> Result<String, ExtractError> {
        let url = pdf_url(&record.source_url);
        let bytes = match self.download(&url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%url, error = %e, "PDF download failed");
                return Err(e.into());
            }
        };
        let text = extract_text(bytes, self.budget, Arc::clone(&self.bpe)).await?;
        info!(chars = text.len(), "Extracted paper text");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_url() {
        assert_eq!(
            pdf_url("https://www.biorxiv.org/content/10.1101/2024.05.08.593115v2"),
            "https://www.biorxiv.org/content/10.1101/2024.05.08.593115v2.full.pdf"
        );
        assert_eq!(
            pdf_url("https://www.biorxiv.org/content/10.1101/x.full.pdf"),
            "https://www.biorxiv.org/content/10.1101/x.full.pdf"
        );
    }

    #[test]
    fn test_short_text_is_untouched() {
        let bpe = load_tokenizer(DEFAULT_TOKENIZER_MODEL).unwrap();
        let text = "A short abstract.".to_string();
        assert_eq!(truncate_to_budget(text.clone(), 1_000, &bpe).unwrap(), text);
    }

    #[test]
    fn test_long_text_is_cut_to_budget() {
        let bpe = load_tokenizer(DEFAULT_TOKENIZER_MODEL).unwrap();
        let text = "the cell wall thickens under stress. ".repeat(200);
        let cut = truncate_to_budget(text.clone(), 25, &bpe).unwrap();
        assert!(cut.len() < text.len());
        assert!(text.starts_with(&cut));
        assert!(bpe.encode_with_special_tokens(&cut).len() <= 25);
    }

    #[test]
    fn test_cut_inside_multibyte_character_still_truncates() {
        let bpe = load_tokenizer(DEFAULT_TOKENIZER_MODEL).unwrap();
        let text = "…37 °C in 5 µM Ca²⁺ with β-actin and 𝛼-tubulin ".repeat(50);
        let total = bpe.encode_with_special_tokens(&text).len();
        for budget in 1..200 {
            let cut = truncate_to_budget(text.clone(), budget, &bpe)
                .unwrap_or_else(|e| panic!("budget {budget}: {e}"));
            assert!(text.starts_with(&cut), "budget {budget}");
            assert!(cut.len() < text.len(), "budget {budget} of {total}");
        }
        assert!(!truncate_to_budget(text.clone(), 50, &bpe).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_tokenizer_model() {
        assert!(matches!(
            load_tokenizer("definitely-not-a-model"),
            Err(ExtractError::Tokenizer(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_bytes_are_an_extract_error() {
        let bpe = Arc::new(load_tokenizer(DEFAULT_TOKENIZER_MODEL).unwrap());
        let result = extract_text(b"not a pdf".to_vec(), 100, bpe).await;
        assert!(matches!(result, Err(ExtractError::Pdf(_))));
    }
}
