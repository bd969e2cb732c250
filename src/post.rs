//! Posting rendered cards to X.
//!
//! A post is the card image plus a short text:
//!
//! ```text
//! 🏷️:<title>
//!
//! 👤:@handle1 @handle2
//!
//! 🔗:<paper url>
//! ```
//!
//! The handle line is left out when no author handles are known.

use crate::error::PublishError;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tracing::{error, info, instrument};

pub const X_API_BASE: &str = "https://api.x.com/2";

/// Something that can publish a card.
pub trait Publisher {
    /// Publish and return the post id, or `None` when nothing was sent.
    async fn publish(
        &self,
        title: &str,
        url: &str,
        image: &Path,
        handles: &[String],
    ) -> Result<Option<String>, PublishError>;
}

/// Build the post text.
pub fn compose_post_text(title: &str, url: &str, handles: &[String]) -> String {
    let mut text = format!("🏷️:{title}\n\n");
    if !handles.is_empty() {
        let formatted = handles
            .iter()
            .map(|h| format!("@{}", h.trim_start_matches('@')))
            .collect::<Vec<_>>()
            .join(" ");
        text.push_str(&format!("👤:{formatted}\n\n"));
    }
    text.push_str(&format!("🔗:{url}"));
    text
}

#[derive(Debug, Deserialize)]
struct IdData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope {
    data: IdData,
}

/// X API v2 client authenticated with an OAuth 2.0 user access token.
#[derive(Debug, Clone)]
pub struct XPublisher {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
}

impl XPublisher {
    pub fn new(client: reqwest::Client, access_token: String) -> Self {
        Self::with_base(client, access_token, X_API_BASE)
    }

    pub fn with_base(client: reqwest::Client, access_token: String, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    async fn id_from(response: reqwest::Response) -> Result<String, PublishError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::from_status(status.as_u16(), body));
        }
        let envelope: DataEnvelope = response.json().await?;
        Ok(envelope.data.id)
    }

    #[instrument(level = "info", skip(self))]
    async fn upload_media(&self, image: &Path) -> Result<String, PublishError> {
        let bytes = tokio::fs::read(image).await?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "card.jpg".to_string());
        let part = Part::bytes(bytes).file_name(file_name).mime_str("image/jpeg")?;
        let form = Form::new()
            .text("media_category", "tweet_image")
            .part("media", part);

        let response = self
            .client
            .post(format!("{}/media/upload", self.api_base))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await?;
        let media_id = Self::id_from(response).await?;
        info!(%media_id, "Uploaded media");
        Ok(media_id)
    }
}

impl Publisher for XPublisher {
    #[instrument(level = "info", skip(self, image, handles), fields(image = %image.display()))]
    async fn publish(
        &self,
        title: &str,
        url: &str,
        image: &Path,
        handles: &[String],
    ) -> Result<Option<String>, PublishError> {
        let media_id = self.upload_media(image).await?;
        let body = json!({
            "text": compose_post_text(title, url, handles),
            "media": { "media_ids": [media_id] },
        });
        let response = self
            .client
            .post(format!("{}/tweets", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        match Self::id_from(response).await {
            Ok(post_id) => {
                info!(%post_id, "Posted successfully");
                Ok(Some(post_id))
            }
            Err(e) => {
                error!(error = %e, permission = e.is_permission(), "Posting failed");
                Err(e)
            }
        }
    }
}

/// Logs what would be posted and sends nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunPublisher;

impl Publisher for DryRunPublisher {
    async fn publish(
        &self,
        title: &str,
        url: &str,
        image: &Path,
        handles: &[String],
    ) -> Result<Option<String>, PublishError> {
        info!(
            image = %image.display(),
            text = %compose_post_text(title, url, handles),
            "Dry run; not posting"
        );
        Ok(None)
    }
}

/// The publisher chosen at startup.
#[derive(Debug, Clone)]
pub enum AnyPublisher {
    X(XPublisher),
    DryRun(DryRunPublisher),
}

impl Publisher for AnyPublisher {
    async fn publish(
        &self,
        title: &str,
        url: &str,
        image: &Path,
        handles: &[String],
    ) -> Result<Option<String>, PublishError> {
        match self {
            AnyPublisher::X(p) => p.publish(title, url, image, handles).await,
            AnyPublisher::DryRun(p) => p.publish(title, url, image, handles).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_text_without_handles() {
        let text = compose_post_text("A title", "https://www.biorxiv.org/content/x", &[]);
        assert_eq!(text, "🏷️:A title\n\n🔗:https://www.biorxiv.org/content/x");
        assert!(!text.contains("👤"));
    }

    #[test]
    fn test_post_text_with_handles() {
        let handles = vec!["alice".to_string(), "@bob".to_string()];
        let text = compose_post_text("A title", "https://x.test/p", &handles);
        assert_eq!(text, "🏷️:A title\n\n👤:@alice @bob\n\n🔗:https://x.test/p");
    }

    #[test]
    fn test_envelope_parsing() {
        let envelope: DataEnvelope =
            serde_json::from_str(r#"{"data":{"id":"1790000000000000000","text":"hi"}}"#).unwrap();
        assert_eq!(envelope.data.id, "1790000000000000000");
    }

    #[tokio::test]
    async fn test_dry_run_posts_nothing() {
        let result = DryRunPublisher
            .publish("t", "https://x.test/p", Path::new("/tmp/card.jpg"), &[])
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
