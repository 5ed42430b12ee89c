use async_trait::async_trait;
use serde::Deserialize;
use sightguide_common::detection::Detection;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("detection service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("detection service responded with status {0}")]
    Status(u16),
}

/// One box from the detection model, with the normalised depth (0–255) at its center.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectedBox {
    #[serde(rename = "box")]
    pub bbox: [f64; 4],
    pub class: String,
    pub confidence: f64,
    pub relative_depth: f64,
}

/// Object detection with depth estimation for one decoded frame.
#[async_trait]
pub trait FrameDetector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<Vec<DetectedBox>, DetectorError>;
}

/// The most confident box, with depth scaled to centimeters.
pub fn best_detection(boxes: Vec<DetectedBox>, depth_scale: f64) -> Option<Detection> {
    let mut best: Option<DetectedBox> = None;
    for candidate in boxes {
        let current = best.as_ref().map_or(0.0, |b| b.confidence);
        if candidate.confidence > current {
            best = Some(candidate);
        }
    }
    best.map(|b| Detection {
        bbox: b.bbox,
        class: b.class,
        confidence: b.confidence,
        depth: b.relative_depth * depth_scale,
    })
}

/// Forwards frames to an upstream detection service.
pub struct RemoteDetector {
    client: reqwest::Client,
    url: String,
}

impl RemoteDetector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl FrameDetector for RemoteDetector {
    async fn detect(&self, image: &[u8]) -> Result<Vec<DetectedBox>, DetectorError> {
        let resp = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(DetectorError::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }
}

/// Stand-in when no detection service is configured: never sees anything.
#[derive(Debug, Default)]
pub struct NullDetector;

#[async_trait]
impl FrameDetector for NullDetector {
    async fn detect(&self, _image: &[u8]) -> Result<Vec<DetectedBox>, DetectorError> {
        Ok(Vec::new())
    }
}
