//! Page analysis and detection socket endpoints for the assistant.

pub mod analysis;
pub mod detect;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use sightguide_common::config::ServerConfig;
use sightguide_common::detection::{empty_detection_message, Detection};
use sightguide_common::frame::{decode_base64_payload, FrameError};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use analysis::{EchoAnalyzer, PageAnalyzer, RemoteAnalyzer};
use detect::{best_detection, DetectorError, FrameDetector, NullDetector, RemoteDetector};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub analyzer: Arc<dyn PageAnalyzer>,
    pub detector: Arc<dyn FrameDetector>,
    pub upload_dir: PathBuf,
    pub frame_interval: Duration,
    pub depth_scale: f64,
}

impl AppState {
    /// Upstream services when configured, local stand-ins otherwise.
    pub fn from_config(config: &ServerConfig) -> Self {
        let analyzer: Arc<dyn PageAnalyzer> = match &config.analyzer_url {
            Some(url) => Arc::new(RemoteAnalyzer::new(url)),
            None => {
                warn!("no analyzer_url configured, page analysis echoes uploads");
                Arc::new(EchoAnalyzer)
            }
        };
        let detector: Arc<dyn FrameDetector> = match &config.detector_url {
            Some(url) => Arc::new(RemoteDetector::new(url)),
            None => {
                warn!("no detector_url configured, detection socket answers empty frames");
                Arc::new(NullDetector)
            }
        };
        Self {
            analyzer,
            detector,
            upload_dir: PathBuf::from(&config.upload_dir),
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            depth_scale: config.depth_scale,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameAnswerError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/process-image/", post(process_image))
        .route("/ws/detect-objects", get(detect_objects))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Page analysis
// ---------------------------------------------------------------------------

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

/// Keep only the final path component of a client-supplied file name.
fn upload_path(dir: &Path, file_name: Option<&str>) -> PathBuf {
    let name = file_name
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload.png");
    dir.join(format!("{}_{name}", Utc::now().timestamp_millis()))
}

/// POST /process-image/ — multipart field `file`
async fn process_image(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                let path = upload_path(&state.upload_dir, field.file_name());
                match field.bytes().await {
                    Ok(data) => upload = Some((path, data)),
                    Err(e) => return detail(StatusCode::BAD_REQUEST, e.to_string()),
                }
                break;
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => return detail(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }
    let Some((path, data)) = upload else {
        return detail(StatusCode::BAD_REQUEST, "missing multipart field 'file'");
    };

    if let Err(e) = tokio::fs::create_dir_all(&state.upload_dir).await {
        error!(error = %e, dir = %state.upload_dir.display(), "failed to create upload dir");
        return detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    if let Err(e) = tokio::fs::write(&path, &data).await {
        error!(error = %e, path = %path.display(), "failed to save upload");
        return detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    info!(path = %path.display(), bytes = data.len(), "page upload saved");

    let result = state.analyzer.analyze(&path).await;
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!(error = %e, path = %path.display(), "failed to delete upload");
    }

    match result {
        Ok(analysis) => Json(analysis.cleaned()).into_response(),
        Err(e) => {
            error!(error = %e, "page analysis failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Detection socket
// ---------------------------------------------------------------------------

/// GET /ws/detect-objects
async fn detect_objects(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| detection_session(socket, state))
}

/// Decode one base64 frame and answer with its most confident detection.
pub async fn answer_frame(state: &AppState, payload: &str) -> Result<Option<Detection>, FrameAnswerError> {
    let image = decode_base64_payload(payload)?;
    let boxes = state.detector.detect(&image).await?;
    Ok(best_detection(boxes, state.depth_scale))
}

async fn detection_session(mut socket: WebSocket, state: Arc<AppState>) {
    info!("detection socket accepted");
    while let Some(message) = socket.recv().await {
        let payload = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "detection socket receive failed");
                break;
            }
        };

        let body = match answer_frame(&state, &payload).await {
            Ok(Some(detection)) => match serde_json::to_string(&detection) {
                Ok(body) => body,
                Err(e) => {
                    error!(error = %e, "failed to serialise detection");
                    break;
                }
            },
            Ok(None) => empty_detection_message(),
            Err(e) => {
                error!(error = %e, "WebSocket error");
                break;
            }
        };
        debug!(body = body.as_str(), "answering frame");
        if socket.send(Message::Text(body)).await.is_err() {
            break;
        }
        tokio::time::sleep(state.frame_interval).await;
    }
    let _ = socket.send(Message::Close(None)).await;
    info!("detection socket closed");
}
