use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use image::RgbaImage;
use sightguide_common::detection::{PageAnalysis, RecognitionResult};
use sightguide_common::frame::EncodedFrame;
use sightguide_vision::pipeline::{BookFramer, FramerState};
use tracing::{info, warn};

use super::{navigation, unknown_command, Effect, UserCommand, View, ViewEvent, ViewState};
use crate::remote::http::{error_status, SUCCESS_STATUS};
use crate::speech::synthesis::Utterance;

pub const POSITION_PROMPT: &str = "Position the book in the center red square for automatic capture";

/// Page reading: frame the book, capture it once steady, read the page aloud.
pub struct ReadBookView {
    framer: BookFramer,
    state: Option<FramerState>,
    last_frame: Option<Arc<RgbaImage>>,
    last_feedback: Option<String>,
    uploading: bool,
    seq: u64,
}

impl ReadBookView {
    pub fn new(framer: BookFramer, debug: bool) -> Self {
        let state = framer.initial_state(debug);
        Self {
            framer,
            state: Some(state),
            last_frame: None,
            last_feedback: None,
            uploading: false,
            seq: 0,
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    fn on_frame(&mut self, frame: Arc<RgbaImage>) -> Vec<Effect> {
        let Some(state) = self.state.take() else {
            return Vec::new();
        };
        let (report, state) = self.framer.process(&frame, state);
        self.state = Some(state);
        self.last_frame = Some(frame);

        let mut effects = vec![Effect::Display(report.display)];
        if let Some(verdict) = &report.verdict {
            if self.last_feedback.as_deref() != Some(verdict.feedback.as_str()) {
                self.last_feedback = Some(verdict.feedback.clone());
                effects.push(Effect::Status(verdict.feedback.clone()));
            }
        }
        if let Some(capture) = report.capture {
            if self.uploading {
                // a dropped capture must not leave the counter latched
                if let Some(state) = self.state.as_mut() {
                    state.stability.reset();
                }
                warn!("upload already in progress, auto-capture dropped");
                effects.push(Effect::Status("Upload already in progress".into()));
            } else {
                effects.extend(self.upload_image(&capture));
            }
        }
        effects
    }

    fn upload_image(&mut self, image: &RgbaImage) -> Vec<Effect> {
        if self.uploading {
            warn!("upload already in progress, capture skipped");
            return vec![Effect::Status("Upload already in progress".into())];
        }
        self.seq += 1;
        match EncodedFrame::png(image, Utc::now().timestamp_millis(), self.seq) {
            Ok(frame) => {
                self.uploading = true;
                vec![Effect::Status("Capturing image...".into()), Effect::Upload(frame)]
            }
            Err(e) => vec![Effect::Status(error_status(&e.to_string()))],
        }
    }

    fn on_command(&mut self, line: &str) -> Vec<Effect> {
        let command = UserCommand::parse(line);
        if let Some(effects) = navigation(&command) {
            return effects;
        }
        match command {
            UserCommand::Capture => match self.last_frame.clone() {
                Some(frame) => self.upload_image(&frame),
                None => vec![Effect::Status("No camera frame to capture yet".into())],
            },
            UserCommand::Upload(path) => {
                if self.uploading {
                    return vec![Effect::Status("Upload already in progress".into())];
                }
                self.uploading = true;
                vec![Effect::Status("Uploading image...".into()), Effect::UploadFile(path)]
            }
            UserCommand::Debug => {
                let Some(state) = self.state.as_mut() else {
                    return Vec::new();
                };
                state.debug = !state.debug;
                let mode = if state.debug { "on" } else { "off" };
                vec![Effect::Status(format!("Debug mode {mode}"))]
            }
            _ => vec![unknown_command(line.trim())],
        }
    }

    fn on_page(&mut self, analysis: PageAnalysis) -> Vec<Effect> {
        self.uploading = false;
        info!(sentences = analysis.sentences.len(), "reading page aloud");
        let mut effects = vec![Effect::Status(SUCCESS_STATUS.into())];
        effects.extend(
            analysis
                .sentences
                .iter()
                .map(|s| Effect::Speak(Utterance::with_emotion(s.sentence.as_str(), &s.emotion))),
        );
        effects
    }

    fn on_upload_failed(&mut self, error: &str) -> Vec<Effect> {
        self.uploading = false;
        warn!(error, "page upload failed");
        vec![Effect::Status(error_status(error))]
    }
}

impl ViewState for ReadBookView {
    fn view(&self) -> View {
        View::ReadBook
    }

    fn handle(&mut self, event: ViewEvent, _now: Instant) -> Vec<Effect> {
        match event {
            ViewEvent::Entered => vec![Effect::Status(POSITION_PROMPT.into())],
            ViewEvent::CameraFailed(message) => vec![Effect::Status(message)],
            ViewEvent::Frame(frame) => self.on_frame(frame),
            ViewEvent::Input(line) => self.on_command(&line),
            ViewEvent::Recognized(RecognitionResult::Sentences(analysis)) => self.on_page(analysis),
            ViewEvent::UploadFailed(error) => self.on_upload_failed(&error),
            ViewEvent::Shutdown => vec![Effect::CancelSpeech, Effect::Stop],
            _ => Vec::new(),
        }
    }
}
