//! Views as state machines. Every platform binding turns what happened into a
//! [`ViewEvent`]; the view answers with [`Effect`]s the runtime carries out.

pub mod home;
pub mod obstacles;
pub mod read_book;
pub mod runtime;
pub mod travel;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;
use sightguide_common::detection::{PageAnalysis, Prediction, RecognitionResult};
use sightguide_common::frame::EncodedFrame;

use crate::remote::SocketEvent;
use crate::speech::recognition::RecognitionEvent;
use crate::speech::synthesis::Utterance;

pub use home::HomeView;
pub use obstacles::ObstacleView;
pub use read_book::ReadBookView;
pub use runtime::{AppError, Runtime};
pub use travel::TravelView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Home,
    ReadBook,
    Travel,
    Obstacles,
}

impl View {
    pub fn uses_camera(self) -> bool {
        !matches!(self, View::Home)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            View::Home => "home",
            View::ReadBook => "read-book",
            View::Travel => "travel",
            View::Obstacles => "obstacles",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown view '{0}', expected home, read-book, travel or obstacles")]
pub struct UnknownView(String);

impl FromStr for View {
    type Err = UnknownView;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "home" => Ok(View::Home),
            "read-book" | "read_book" | "readbook" => Ok(View::ReadBook),
            "travel" => Ok(View::Travel),
            "obstacles" => Ok(View::Obstacles),
            other => Err(UnknownView(other.to_string())),
        }
    }
}

/// Everything a view can be told.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    Entered,
    /// A line typed on the console.
    Input(String),
    Recognition(RecognitionEvent),
    CameraFailed(String),
    /// Latest camera frame; one tick of the view's loop.
    Frame(Arc<RgbaImage>),
    /// A backend answer: analysed page text or a detection-socket message.
    Recognized(RecognitionResult),
    UploadFailed(String),
    SocketReady,
    SocketFailed(String),
    Socket(SocketEvent),
    ModelLoaded(Result<(), String>),
    Predictions {
        frame: Arc<RgbaImage>,
        result: Result<Vec<Prediction>, String>,
    },
    Shutdown,
}

impl ViewEvent {
    pub fn from_upload(result: Result<PageAnalysis, String>) -> Self {
        match result {
            Ok(analysis) => ViewEvent::Recognized(RecognitionResult::Sentences(analysis)),
            Err(e) => ViewEvent::UploadFailed(e),
        }
    }
}

impl From<SocketEvent> for ViewEvent {
    fn from(event: SocketEvent) -> Self {
        match event {
            SocketEvent::Detection(detection) => ViewEvent::Recognized(RecognitionResult::Detection(detection)),
            other => ViewEvent::Socket(other),
        }
    }
}

/// Everything a view can ask for.
#[derive(Debug, Clone)]
pub enum Effect {
    Speak(Utterance),
    CancelSpeech,
    Status(String),
    Display(RgbaImage),
    Upload(EncodedFrame),
    UploadFile(PathBuf),
    /// Base64 frame for the detection socket.
    SendFrame(String),
    /// Run the object detector on a frame and report back with `Predictions`.
    Detect(Arc<RgbaImage>),
    /// Arm the recognizer for one utterance.
    Listen,
    Navigate(View),
    /// Leave the app.
    Stop,
}

pub trait ViewState: Send {
    fn view(&self) -> View;
    fn handle(&mut self, event: ViewEvent, now: Instant) -> Vec<Effect>;
}

/// Console commands understood by the camera views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Home,
    Quit,
    Capture,
    Upload(PathBuf),
    Debug,
    Toggle,
    Unknown(String),
}

impl UserCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        match word.to_lowercase().as_str() {
            "home" | "back" => UserCommand::Home,
            "quit" | "exit" => UserCommand::Quit,
            "capture" => UserCommand::Capture,
            "upload" if !rest.is_empty() => UserCommand::Upload(PathBuf::from(rest)),
            "debug" => UserCommand::Debug,
            "toggle" | "start" | "stop" => UserCommand::Toggle,
            _ => UserCommand::Unknown(line.to_string()),
        }
    }
}

/// Shared handling of the commands every camera view accepts.
fn navigation(command: &UserCommand) -> Option<Vec<Effect>> {
    match command {
        UserCommand::Home => Some(vec![Effect::CancelSpeech, Effect::Navigate(View::Home)]),
        UserCommand::Quit => Some(vec![Effect::CancelSpeech, Effect::Stop]),
        _ => None,
    }
}

fn unknown_command(line: &str) -> Effect {
    Effect::Status(format!("Unknown command: {line}"))
}
