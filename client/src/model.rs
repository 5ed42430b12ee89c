use async_trait::async_trait;
use chrono::Utc;
use image::RgbaImage;
use sightguide_common::detection::Prediction;
use sightguide_common::frame::EncodedFrame;
use sightguide_vision::objects::{DetectorError, ObjectDetector};
use tracing::{debug, info};

const INFERENCE_QUALITY: u8 = 80;

/// Object detection served by a local inference endpoint.
///
/// Frames are POSTed as JPEG; the answer is a JSON array of
/// `{bbox: [x, y, w, h], class, score}`.
pub struct ModelEndpoint {
    client: reqwest::Client,
    url: String,
}

impl ModelEndpoint {
    /// Probe the endpoint once; a model that does not answer is not loaded.
    pub async fn load(url: &str) -> Result<Self, DetectorError> {
        let client = reqwest::Client::new();
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| DetectorError::Load(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DetectorError::Load(format!("HTTP status {}", resp.status())));
        }
        info!(url, "detection model loaded");
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ObjectDetector for ModelEndpoint {
    async fn detect(&self, frame: &RgbaImage) -> Result<Vec<Prediction>, DetectorError> {
        let encoded = EncodedFrame::jpeg(frame, INFERENCE_QUALITY, Utc::now().timestamp_millis(), 0)
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let resp = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, encoded.format.mime_type())
            .body(encoded.data)
            .send()
            .await
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DetectorError::Inference(format!("HTTP status {}", resp.status())));
        }
        let predictions: Vec<Prediction> = resp
            .json()
            .await
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        debug!(count = predictions.len(), "predictions received");
        Ok(predictions)
    }

    fn name(&self) -> &str {
        "model-endpoint"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use image::Rgba;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/detect")
    }

    #[tokio::test]
    async fn loads_and_detects() {
        let app = Router::new().route(
            "/detect",
            get(|| async { "ready" }).post(|body: Bytes| async move {
                assert!(!body.is_empty());
                Json(vec![Prediction {
                    bbox: [4.0, 4.0, 20.0, 30.0],
                    class: "person".into(),
                    score: 0.87,
                }])
            }),
        );
        let url = serve(app).await;
        let model = ModelEndpoint::load(&url).await.unwrap();
        let frame = RgbaImage::from_pixel(32, 32, Rgba([1, 2, 3, 255]));
        let predictions = model.detect(&frame).await.unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].class, "person");
    }

    #[tokio::test]
    async fn unreachable_model_fails_to_load() {
        let app = Router::new().route("/detect", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let url = serve(app).await;
        let err = ModelEndpoint::load(&url).await.err().unwrap();
        assert!(matches!(err, DetectorError::Load(_)));
        assert!(err.to_string().starts_with("failed to load detection model"));
    }
}
