pub mod mjpeg;

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use sightguide_common::config::CameraConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub use mjpeg::{source_for, MjpegSource, PollingSource};

/// Latest decoded camera frame; `None` until the first frame arrives.
pub type FrameFeed = watch::Receiver<Option<Arc<RgbaImage>>>;

/// Preferred capture settings forwarded to the camera source.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConstraints {
    pub width: u32,
    pub height: u32,
    /// `environment` asks for the rear-facing camera.
    pub facing: String,
    pub fps: f64,
}

impl From<&CameraConfig> for CameraConstraints {
    fn from(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            facing: config.facing.clone(),
            fps: config.fps,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Unable to access camera: {0}")]
    Acquire(String),
    #[error("unknown camera mode '{0}', expected 'mjpeg' or 'polling'")]
    UnknownMode(String),
}

/// A running capture: one background task publishing frames.
#[derive(Debug)]
pub struct Track {
    label: String,
    task: Option<JoinHandle<()>>,
}

impl Track {
    pub fn new(label: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self {
            label: label.into(),
            task: Some(task),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop the capture task. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(track = self.label.as_str(), "track stopped");
        }
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Acquire the device and start a track feeding `frames`.
    async fn open(
        &self,
        constraints: &CameraConstraints,
        frames: watch::Sender<Option<Arc<RgbaImage>>>,
    ) -> Result<Track, CameraError>;
}

/// Owns the camera tracks of one view.
pub struct CameraController {
    source: Box<dyn CameraSource>,
    constraints: CameraConstraints,
    tracks: Vec<Track>,
}

impl CameraController {
    pub fn new(source: Box<dyn CameraSource>, constraints: CameraConstraints) -> Self {
        Self {
            source,
            constraints,
            tracks: Vec::new(),
        }
    }

    /// Acquire the stream. A previous stream is released first.
    pub async fn start(&mut self) -> Result<FrameFeed, CameraError> {
        self.stop();
        let (tx, rx) = watch::channel(None);
        let track = self.source.open(&self.constraints, tx).await?;
        info!(
            track = track.label(),
            width = self.constraints.width,
            height = self.constraints.height,
            facing = self.constraints.facing.as_str(),
            "camera started"
        );
        self.tracks.push(track);
        Ok(rx)
    }

    /// Release every track. Idempotent.
    pub fn stop(&mut self) {
        if self.tracks.is_empty() {
            return;
        }
        for mut track in self.tracks.drain(..) {
            track.stop();
        }
        info!("camera stopped");
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Publishes one solid frame and then idles until aborted.
    pub(crate) struct StillSource {
        pub opened: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl StillSource {
        pub(crate) fn new() -> Self {
            Self {
                opened: Arc::new(AtomicUsize::new(0)),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl CameraSource for StillSource {
        async fn open(
            &self,
            constraints: &CameraConstraints,
            frames: watch::Sender<Option<Arc<RgbaImage>>>,
        ) -> Result<Track, CameraError> {
            if self.fail {
                return Err(CameraError::Acquire("permission denied".into()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            let frame = RgbaImage::from_pixel(
                constraints.width,
                constraints.height,
                Rgba([120, 120, 120, 255]),
            );
            let task = tokio::spawn(async move {
                let _ = frames.send(Some(Arc::new(frame)));
                std::future::pending::<()>().await;
            });
            Ok(Track::new("still", task))
        }
    }

    fn constraints() -> CameraConstraints {
        CameraConstraints {
            width: 32,
            height: 24,
            facing: "environment".into(),
            fps: 10.0,
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut camera = CameraController::new(Box::new(StillSource::new()), constraints());
        let mut feed = camera.start().await.unwrap();
        feed.changed().await.unwrap();
        assert!(feed.borrow().is_some());
        assert_eq!(camera.active_tracks(), 1);

        camera.stop();
        assert_eq!(camera.active_tracks(), 0);
        camera.stop();
        assert_eq!(camera.active_tracks(), 0);
    }

    #[tokio::test]
    async fn restart_releases_previous_track() {
        let source = StillSource::new();
        let opened = source.opened.clone();
        let mut camera = CameraController::new(Box::new(source), constraints());
        camera.start().await.unwrap();
        camera.start().await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(camera.active_tracks(), 1);
    }

    #[tokio::test]
    async fn dropping_controller_ends_the_feed() {
        let mut camera = CameraController::new(Box::new(StillSource::new()), constraints());
        let mut feed = camera.start().await.unwrap();
        feed.changed().await.unwrap();
        drop(camera);
        // the sender lives in the aborted task, so the feed closes
        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            while feed.changed().await.is_ok() {}
        })
        .await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn acquisition_failure_is_reported() {
        let mut source = StillSource::new();
        source.fail = true;
        let mut camera = CameraController::new(Box::new(source), constraints());
        let err = camera.start().await.unwrap_err();
        assert_eq!(err.to_string(), "Unable to access camera: permission denied");
        assert_eq!(camera.active_tracks(), 0);
    }
}
