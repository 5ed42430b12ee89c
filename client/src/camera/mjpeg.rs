use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use image::RgbaImage;
use sightguide_common::config::CameraConfig;
use sightguide_common::frame::decode_image;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{CameraConstraints, CameraError, CameraSource, Track};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for a `multipart/x-mixed-replace` JPEG stream.
#[derive(Debug)]
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }
}

impl MjpegParser {
    /// Feed one network chunk; returns every JPEG it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // boundary may span chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY) else {
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    if !jpeg.is_empty() {
                        frames.push(jpeg);
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }
        frames
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn constraint_query(constraints: &CameraConstraints) -> Vec<(&'static str, String)> {
    vec![
        ("width", constraints.width.to_string()),
        ("height", constraints.height.to_string()),
        ("facing", constraints.facing.clone()),
        ("fps", constraints.fps.to_string()),
    ]
}

fn publish(frames: &watch::Sender<Option<Arc<RgbaImage>>>, jpeg: &[u8]) -> bool {
    match decode_image(jpeg) {
        Ok(image) => frames.send(Some(Arc::new(image))).is_ok(),
        Err(e) => {
            warn!(error = %e, bytes = jpeg.len(), "dropping undecodable camera frame");
            true
        }
    }
}

/// Camera served as a multipart MJPEG stream over HTTP.
pub struct MjpegSource {
    url: String,
    client: reqwest::Client,
}

impl MjpegSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CameraSource for MjpegSource {
    async fn open(
        &self,
        constraints: &CameraConstraints,
        frames: watch::Sender<Option<Arc<RgbaImage>>>,
    ) -> Result<Track, CameraError> {
        info!(url = self.url.as_str(), "connecting to MJPEG stream");
        let response = self
            .client
            .get(&self.url)
            .query(&constraint_query(constraints))
            .send()
            .await
            .map_err(|e| CameraError::Acquire(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CameraError::Acquire(format!("HTTP status {}", response.status())));
        }

        let url = self.url.clone();
        let task = tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = MjpegParser::default();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "camera stream error");
                        break;
                    }
                };
                for jpeg in parser.push(&chunk) {
                    if !publish(&frames, &jpeg) {
                        debug!("no frame consumers left");
                        return;
                    }
                }
            }
            info!(url = url.as_str(), "camera stream ended");
        });
        Ok(Track::new("mjpeg", task))
    }
}

/// Camera polled one JPEG at a time.
pub struct PollingSource {
    url: String,
    client: reqwest::Client,
}

impl PollingSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CameraSource for PollingSource {
    async fn open(
        &self,
        constraints: &CameraConstraints,
        frames: watch::Sender<Option<Arc<RgbaImage>>>,
    ) -> Result<Track, CameraError> {
        let query = constraint_query(constraints);
        let first = fetch_frame(&self.client, &self.url, &query)
            .await
            .map_err(CameraError::Acquire)?;
        publish(&frames, &first);

        let client = self.client.clone();
        let url = self.url.clone();
        let interval = Duration::from_secs_f64(1.0 / constraints.fps.max(0.1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match fetch_frame(&client, &url, &query).await {
                    Ok(jpeg) => {
                        if !publish(&frames, &jpeg) {
                            return;
                        }
                    }
                    Err(e) => warn!(error = e.as_str(), "failed to fetch camera frame"),
                }
            }
        });
        Ok(Track::new("polling", task))
    }
}

async fn fetch_frame(
    client: &reqwest::Client,
    url: &str,
    query: &[(&'static str, String)],
) -> Result<Vec<u8>, String> {
    let resp = client.get(url).query(query).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("HTTP status {}", resp.status()));
    }
    let body = resp.bytes().await.map_err(|e| e.to_string())?;
    Ok(body.to_vec())
}

/// Build the source named by `camera.mode`.
pub fn source_for(config: &CameraConfig) -> Result<Box<dyn CameraSource>, CameraError> {
    match config.mode.as_str() {
        "mjpeg" => Ok(Box::new(MjpegSource::new(&config.url))),
        "polling" => Ok(Box::new(PollingSource::new(&config.url))),
        other => Err(CameraError::UnknownMode(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use image::Rgba;
    use sightguide_common::frame::EncodedFrame;

    fn part(jpeg: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(BOUNDARY);
        out.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        out.extend_from_slice(jpeg);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]));
        EncodedFrame::jpeg(&image, 80, 0, 0).unwrap().data
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn parser_splits_frames_across_chunks() {
        let mut stream = part(b"AAAA");
        stream.extend(part(b"BBBBBB"));
        stream.extend_from_slice(BOUNDARY);

        let mut parser = MjpegParser::default();
        let mut frames = Vec::new();
        for chunk in stream.chunks(3) {
            frames.extend(parser.push(chunk));
        }
        assert_eq!(frames, vec![b"AAAA".to_vec(), b"BBBBBB".to_vec()]);
    }

    #[test]
    fn parser_skips_preamble_and_waits_for_next_boundary() {
        let mut parser = MjpegParser::default();
        let mut stream = b"garbage before the first part".to_vec();
        stream.extend(part(b"JPEG"));
        assert!(parser.push(&stream).is_empty());
        assert_eq!(parser.push(BOUNDARY), vec![b"JPEG".to_vec()]);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let config = CameraConfig {
            mode: "usb".into(),
            ..CameraConfig::default()
        };
        assert!(matches!(source_for(&config), Err(CameraError::UnknownMode(_))));
    }

    #[tokio::test]
    async fn mjpeg_source_publishes_decoded_frames() {
        let mut body = part(&jpeg(16, 12));
        body.extend(part(&jpeg(16, 12)));
        body.extend_from_slice(BOUNDARY);
        let app = Router::new().route(
            "/stream",
            get(move || {
                let body = body.clone();
                async move { ([(CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")], body) }
            }),
        );
        let base = serve(app).await;

        let (tx, mut rx) = watch::channel(None);
        let source = MjpegSource::new(format!("{base}/stream"));
        let constraints = CameraConstraints {
            width: 16,
            height: 12,
            facing: "environment".into(),
            fps: 10.0,
        };
        let _track = source.open(&constraints, tx).await.unwrap();
        rx.changed().await.unwrap();
        let frame = rx.borrow().clone().unwrap();
        assert_eq!(frame.dimensions(), (16, 12));
    }

    #[tokio::test]
    async fn failed_acquisition_is_an_error() {
        let app = Router::new().route("/frame", get(|| async { StatusCode::FORBIDDEN }));
        let base = serve(app).await;
        let (tx, _rx) = watch::channel(None);
        let constraints = CameraConstraints {
            width: 16,
            height: 12,
            facing: "environment".into(),
            fps: 10.0,
        };
        let err = PollingSource::new(format!("{base}/frame"))
            .open(&constraints, tx)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Unable to access camera: HTTP status 403"));
    }
}
