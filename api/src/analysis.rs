use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use sightguide_common::detection::{PageAnalysis, SentenceEmotion};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("failed to read upload: {0}")]
    Read(#[from] std::io::Error),
    #[error("analysis service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("analysis service responded with status {0}")]
    Status(u16),
}

/// Text extraction plus per-sentence emotion for an uploaded page photo.
#[async_trait]
pub trait PageAnalyzer: Send + Sync {
    async fn analyze(&self, upload: &Path) -> Result<PageAnalysis, AnalyzerError>;
}

/// Forwards the page to an upstream analysis service.
pub struct RemoteAnalyzer {
    client: reqwest::Client,
    url: String,
}

impl RemoteAnalyzer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PageAnalyzer for RemoteAnalyzer {
    async fn analyze(&self, upload: &Path) -> Result<PageAnalysis, AnalyzerError> {
        let data = tokio::fs::read(upload).await?;
        let file_name = upload
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.png".into());
        let form = Form::new().part("file", Part::bytes(data).file_name(file_name));
        let resp = self.client.post(&self.url).multipart(form).send().await?;
        if !resp.status().is_success() {
            return Err(AnalyzerError::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }
}

/// Stand-in when no analysis service is configured: describes the upload.
#[derive(Debug, Default)]
pub struct EchoAnalyzer;

#[async_trait]
impl PageAnalyzer for EchoAnalyzer {
    async fn analyze(&self, upload: &Path) -> Result<PageAnalysis, AnalyzerError> {
        let size = tokio::fs::metadata(upload).await?.len();
        debug!(bytes = size, "echo analysis");
        let sentence = format!("Received a page image of {size} bytes.");
        Ok(PageAnalysis {
            full_text: sentence.clone(),
            sentences: vec![SentenceEmotion {
                sentence,
                emotion: "neutral".into(),
            }],
        })
    }
}
