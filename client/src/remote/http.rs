use reqwest::multipart::{Form, Part};
use sightguide_common::detection::PageAnalysis;
use sightguide_common::frame::EncodedFrame;
use tracing::{debug, info};

use super::RemoteError;

pub const SUCCESS_STATUS: &str = "Image processed successfully!";

/// Status line shown when an upload fails.
pub fn error_status(error: &str) -> String {
    format!("Error: {error}")
}

/// Client for the page text analysis endpoint.
#[derive(Debug, Clone)]
pub struct RecognitionClient {
    client: reqwest::Client,
    endpoint: String,
}

impl RecognitionClient {
    pub fn new(api_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/process-image/", api_base.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upload one still as multipart field `file`. No retry.
    pub async fn process_image(&self, frame: &EncodedFrame) -> Result<PageAnalysis, RemoteError> {
        let part = Part::bytes(frame.data.clone())
            .file_name(frame.file_name())
            .mime_str(frame.format.mime_type())?;
        let form = Form::new().part("file", part);

        debug!(endpoint = self.endpoint.as_str(), bytes = frame.data.len(), seq = frame.seq, "uploading page");
        let resp = self.client.post(&self.endpoint).multipart(form).send().await?;
        if !resp.status().is_success() {
            return Err(RemoteError::Status(resp.status().as_u16()));
        }
        let analysis: PageAnalysis = resp.json().await?;
        info!(sentences = analysis.sentences.len(), "page analysed");
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Multipart;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use image::{Rgba, RgbaImage};
    use sightguide_common::detection::SentenceEmotion;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn capture() -> EncodedFrame {
        let image = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]));
        EncodedFrame::png(&image, 1_700_000_000_000, 1).unwrap()
    }

    async fn echo_upload(mut multipart: Multipart) -> Json<PageAnalysis> {
        let mut description = String::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            description = format!(
                "{} {} {}",
                field.name().unwrap_or_default(),
                field.file_name().unwrap_or_default(),
                field.content_type().unwrap_or_default()
            );
        }
        Json(PageAnalysis {
            full_text: description,
            sentences: vec![SentenceEmotion {
                sentence: "It was a sunny day.".into(),
                emotion: "happy".into(),
            }],
        })
    }

    #[tokio::test]
    async fn uploads_png_as_file_field() {
        let base = serve(Router::new().route("/process-image/", post(echo_upload))).await;
        let client = RecognitionClient::new(&format!("{base}/"));
        assert_eq!(client.endpoint(), format!("{base}/process-image/"));

        let analysis = client.process_image(&capture()).await.unwrap();
        assert_eq!(analysis.full_text, "file image.png image/png");
        assert_eq!(analysis.sentences[0].emotion, "happy");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let app = Router::new().route(
            "/process-image/",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = serve(app).await;
        let err = RecognitionClient::new(&base)
            .process_image(&capture())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Status(500)));
        assert_eq!(
            error_status(&err.to_string()),
            "Error: server responded with status 500"
        );
    }
}
