use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use image::RgbaImage;
use sightguide_common::config::{CameraConfig, Config};
use sightguide_common::frame::EncodedFrame;
use sightguide_vision::book::BookParams;
use sightguide_vision::objects::{DetectorError, ObjectDetector};
use sightguide_vision::pipeline::BookFramer;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Effect, HomeView, ObstacleView, ReadBookView, TravelView, View, ViewEvent, ViewState};
use crate::camera::{source_for, CameraConstraints, CameraController, CameraError, CameraSource, FrameFeed};
use crate::console::{next_line, ConsoleLines};
use crate::model::ModelEndpoint;
use crate::remote::{DetectionSender, DetectionStream, RecognitionClient};
use crate::speech::recognition::SpeechRecognizer;
use crate::speech::synthesis::SpeechSynthesizer;

pub type CameraFactory = fn(&CameraConfig) -> Result<Box<dyn CameraSource>, CameraError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
}

/// Runs one view at a time until a view asks to stop.
pub struct Runtime {
    config: Config,
    console: ConsoleLines,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    synth: Arc<dyn SpeechSynthesizer>,
    uploads: RecognitionClient,
    open_camera: CameraFactory,
    preview: Option<PathBuf>,
}

/// Why the event loop woke up.
enum Wake {
    Event(ViewEvent),
    InputClosed,
    FeedEnded,
}

/// Resources held while a view is on screen; released on every exit path.
#[derive(Default)]
struct Session {
    tasks: Vec<JoinHandle<()>>,
    camera: Option<CameraController>,
    feed: Option<FrameFeed>,
    socket: Option<DetectionSender>,
    detector: Option<Arc<dyn ObjectDetector>>,
}

impl Session {
    async fn close(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(socket) = self.socket.take() {
            socket.close().await;
        }
        if let Some(mut camera) = self.camera.take() {
            camera.stop();
        }
    }
}

impl Runtime {
    pub fn new(
        config: Config,
        console: ConsoleLines,
        recognizer: Option<Arc<dyn SpeechRecognizer>>,
        synth: Arc<dyn SpeechSynthesizer>,
    ) -> Result<Self, AppError> {
        // reject a bad camera mode before any view starts
        source_for(&config.camera)?;
        let uploads = RecognitionClient::new(&config.client.api_base);
        let preview = config.client.preview_path.as_ref().map(PathBuf::from);
        Ok(Self {
            config,
            console,
            recognizer,
            synth,
            uploads,
            open_camera: source_for,
            preview,
        })
    }

    pub fn with_camera_factory(mut self, factory: CameraFactory) -> Self {
        self.open_camera = factory;
        self
    }

    pub async fn run(&self, start: View) -> Result<(), AppError> {
        let mut view = start;
        loop {
            match self.run_view(view).await? {
                Some(next) => {
                    info!(from = %view, to = %next, "switching view");
                    view = next;
                }
                None => {
                    info!("assistant stopped");
                    return Ok(());
                }
            }
        }
    }

    fn build_view(&self, view: View) -> Box<dyn ViewState> {
        match view {
            View::Home => Box::new(HomeView::new(self.recognizer.is_some())),
            View::ReadBook => Box::new(ReadBookView::new(
                BookFramer::new(BookParams::from(&self.config.book)),
                self.config.client.debug,
            )),
            View::Travel => Box::new(TravelView::new(
                self.config.camera.jpeg_quality,
                Duration::from_secs(self.config.detection.cooldown_secs),
            )),
            View::Obstacles => Box::new(ObstacleView::new(&self.config.detection)),
        }
    }

    async fn open_session(&self, view: View, tx: &mpsc::Sender<ViewEvent>) -> Result<Session, AppError> {
        let mut session = Session::default();
        session.tasks.push(spawn_shutdown_listener(tx.clone()));

        if view.uses_camera() {
            let source = (self.open_camera)(&self.config.camera)?;
            let mut camera = CameraController::new(source, CameraConstraints::from(&self.config.camera));
            match camera.start().await {
                Ok(feed) => session.feed = Some(feed),
                Err(e) => {
                    error!(error = %e, "camera unavailable");
                    let _ = tx.send(ViewEvent::CameraFailed(e.to_string())).await;
                }
            }
            session.camera = Some(camera);
        }

        match view {
            View::Travel => match DetectionStream::connect(&self.config.client.ws_url).await {
                Ok((sender, mut events)) => {
                    session.socket = Some(sender);
                    let _ = tx.send(ViewEvent::SocketReady).await;
                    let tx = tx.clone();
                    session.tasks.push(tokio::spawn(async move {
                        while let Some(event) = events.recv().await {
                            if tx.send(ViewEvent::from(event)).await.is_err() {
                                return;
                            }
                        }
                    }));
                }
                Err(e) => {
                    error!(error = %e, url = self.config.client.ws_url.as_str(), "detection socket unavailable");
                    let _ = tx.send(ViewEvent::SocketFailed(e.to_string())).await;
                }
            },
            View::Obstacles => {
                let loaded = match &self.config.detection.model_url {
                    Some(url) => ModelEndpoint::load(url).await,
                    None => Err(DetectorError::Load("no detection.model_url configured".into())),
                };
                let event = match loaded {
                    Ok(model) => {
                        info!(detector = model.name(), "detection model loaded");
                        session.detector = Some(Arc::new(model));
                        ViewEvent::ModelLoaded(Ok(()))
                    }
                    Err(DetectorError::Load(reason)) | Err(DetectorError::Inference(reason)) => {
                        error!(reason = reason.as_str(), "detection model unavailable");
                        ViewEvent::ModelLoaded(Err(reason))
                    }
                };
                let _ = tx.send(event).await;
            }
            View::Home | View::ReadBook => {}
        }
        Ok(session)
    }

    /// Drive one view until it navigates away (`Some`) or stops (`None`).
    async fn run_view(&self, view: View) -> Result<Option<View>, AppError> {
        info!(view = %view, "entering view");
        let (tx, mut rx) = mpsc::channel(64);
        let mut state = self.build_view(view);
        // Entered goes first so statuses from the session setup follow it
        let _ = tx.send(ViewEvent::Entered).await;
        let mut session = self.open_session(view, &tx).await?;

        let mut listening = false;
        let mut console_open = true;
        let outcome = loop {
            let wake = tokio::select! {
                Some(event) = rx.recv() => Wake::Event(event),
                frame = next_frame(&mut session.feed), if session.feed.is_some() => match frame {
                    Some(frame) => Wake::Event(ViewEvent::Frame(frame)),
                    None => Wake::FeedEnded,
                },
                line = next_line(&self.console), if console_open && !listening => match line {
                    Some(line) => Wake::Event(ViewEvent::Input(line)),
                    None => Wake::InputClosed,
                },
            };
            let event = match wake {
                Wake::Event(event) => event,
                Wake::InputClosed => {
                    debug!("console input closed");
                    console_open = false;
                    continue;
                }
                Wake::FeedEnded => {
                    warn!("camera feed ended");
                    session.feed = None;
                    continue;
                }
            };

            let mut pending = VecDeque::from([event]);
            let mut next = None;
            while let Some(event) = pending.pop_front() {
                if matches!(event, ViewEvent::Recognition(_)) {
                    listening = false;
                }
                for effect in state.handle(event, Instant::now()) {
                    match effect {
                        Effect::Speak(utterance) => self.synth.speak(utterance),
                        Effect::CancelSpeech => self.synth.cancel(),
                        Effect::Status(status) => show_status(&status),
                        Effect::Display(image) => self.show_frame(image).await,
                        Effect::Upload(frame) => self.spawn_upload(frame, tx.clone()),
                        Effect::UploadFile(path) => self.spawn_file_upload(path, tx.clone()),
                        Effect::SendFrame(payload) => match session.socket.as_mut() {
                            Some(socket) => {
                                if let Err(e) = socket.send_frame(payload).await {
                                    warn!(error = %e, "failed to send frame");
                                }
                            }
                            None => debug!("no detection socket, frame dropped"),
                        },
                        Effect::Detect(frame) => {
                            let result = match &session.detector {
                                Some(detector) => detector.detect(&frame).await.map_err(|e| e.to_string()),
                                None => Err("detection model is not loaded".to_string()),
                            };
                            pending.push_back(ViewEvent::Predictions { frame, result });
                        }
                        Effect::Listen => match &self.recognizer {
                            Some(recognizer) => {
                                listening = true;
                                let recognizer = recognizer.clone();
                                let tx = tx.clone();
                                session.tasks.push(tokio::spawn(async move {
                                    let event = recognizer.listen().await;
                                    let _ = tx.send(ViewEvent::Recognition(event)).await;
                                }));
                            }
                            None => warn!("speech recognition not supported"),
                        },
                        Effect::Navigate(view) => next = Some(Some(view)),
                        Effect::Stop => next = Some(None),
                    }
                }
            }
            if let Some(next) = next {
                break next;
            }
        };

        session.close().await;
        info!(view = %state.view(), "left view");
        Ok(outcome)
    }

    async fn show_frame(&self, image: RgbaImage) {
        let Some(path) = self.preview.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || image.save(&path)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to write preview frame"),
            Err(e) => warn!(error = %e, "preview task failed"),
        }
    }

    fn spawn_upload(&self, frame: EncodedFrame, tx: mpsc::Sender<ViewEvent>) {
        let client = self.uploads.clone();
        tokio::spawn(async move {
            let result = client.process_image(&frame).await.map_err(|e| e.to_string());
            let _ = tx.send(ViewEvent::from_upload(result)).await;
        });
    }

    fn spawn_file_upload(&self, path: PathBuf, tx: mpsc::Sender<ViewEvent>) {
        let client = self.uploads.clone();
        tokio::spawn(async move {
            let result = async {
                let data = tokio::fs::read(&path)
                    .await
                    .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
                let frame = EncodedFrame::from_bytes(data, Utc::now().timestamp_millis(), 0)
                    .map_err(|e| e.to_string())?;
                client.process_image(&frame).await.map_err(|e| e.to_string())
            }
            .await;
            let _ = tx.send(ViewEvent::from_upload(result)).await;
        });
    }
}

/// Wait for the next camera frame; `None` once the track has ended.
async fn next_frame(feed: &mut Option<FrameFeed>) -> Option<Arc<RgbaImage>> {
    let feed = feed.as_mut()?;
    loop {
        feed.changed().await.ok()?;
        if let Some(frame) = feed.borrow_and_update().clone() {
            return Some(frame);
        }
    }
}

fn spawn_shutdown_listener(tx: mpsc::Sender<ViewEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received ctrl-c, shutting down");
                let _ = tx.send(ViewEvent::Shutdown).await;
            }
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
    })
}

fn show_status(status: &str) {
    info!(status, "status");
    println!("{status}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::tests::StillSource;
    use crate::console::from_receiver;
    use crate::speech::recognition::StdinRecognizer;
    use crate::speech::synthesis::{Utterance, WELCOME_NOTE};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSynthesizer {
        spoken: Mutex<Vec<String>>,
        cancels: Mutex<usize>,
    }

    impl SpeechSynthesizer for RecordingSynthesizer {
        fn speak(&self, utterance: Utterance) {
            self.spoken.lock().unwrap().push(utterance.text);
        }

        fn cancel(&self) {
            *self.cancels.lock().unwrap() += 1;
        }
    }

    fn still_camera(_: &CameraConfig) -> Result<Box<dyn CameraSource>, CameraError> {
        Ok(Box::new(StillSource::new()))
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.camera.width = 64;
        config.camera.height = 48;
        config.client.api_base = "http://127.0.0.1:9".into();
        config
    }

    #[tokio::test]
    async fn voice_command_opens_reader_and_quit_stops() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let console = from_receiver(rx);
        let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(StdinRecognizer::new(console.clone()));
        let synth = Arc::new(RecordingSynthesizer::default());

        let runtime = Runtime::new(config(), console, Some(recognizer), synth.clone())
            .unwrap()
            .with_camera_factory(still_camera);

        tx.send(String::new()).await.unwrap();
        tx.send("Read a book".into()).await.unwrap();
        tx.send("quit".into()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), runtime.run(View::Home))
            .await
            .expect("runtime should stop on quit")
            .unwrap();

        assert_eq!(synth.spoken.lock().unwrap().first().map(String::as_str), Some(WELCOME_NOTE));
        assert!(*synth.cancels.lock().unwrap() >= 1);
    }

    #[tokio::test]
    async fn closed_input_on_home_stops_the_app() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let console = from_receiver(rx);
        let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(StdinRecognizer::new(console.clone()));
        let runtime = Runtime::new(
            config(),
            console,
            Some(recognizer),
            Arc::new(RecordingSynthesizer::default()),
        )
        .unwrap();

        tx.send(String::new()).await.unwrap();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(10), runtime.run(View::Home))
            .await
            .expect("runtime should stop when input closes")
            .unwrap();
    }

    #[test]
    fn unknown_camera_mode_is_rejected_up_front() {
        let mut config = config();
        config.camera.mode = "usb".into();
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let result = Runtime::new(config, from_receiver(rx), None, Arc::new(RecordingSynthesizer::default()));
        assert!(matches!(result, Err(AppError::Camera(CameraError::UnknownMode(_)))));
    }
}
