use std::time::Instant;

use tracing::warn;

use super::{Effect, View, ViewEvent, ViewState};
use crate::speech::recognition::{IntentMatcher, RecognitionEvent};
use crate::speech::synthesis::{Utterance, WELCOME_NOTE};

pub const START_PROMPT: &str = "Press Enter to start your assistant";
pub const UNSUPPORTED_PROMPT: &str =
    "Voice commands are not available. Type read-book, travel or obstacles.";

/// Landing view: voice command to pick a mode.
pub struct HomeView {
    matcher: IntentMatcher,
    recognition: bool,
    listening: bool,
}

impl HomeView {
    pub fn new(recognition: bool) -> Self {
        Self {
            matcher: IntentMatcher::default(),
            recognition,
            listening: false,
        }
    }

    fn on_input(&mut self, line: &str) -> Vec<Effect> {
        let line = line.trim();
        if matches!(line.to_lowercase().as_str(), "quit" | "exit") {
            return vec![Effect::CancelSpeech, Effect::Stop];
        }
        if let Ok(view) = line.parse::<View>() {
            return vec![Effect::Navigate(view)];
        }
        if !self.recognition {
            return vec![Effect::Status(UNSUPPORTED_PROMPT.into())];
        }
        // recognition is single-shot: each start listens for one utterance
        if self.listening {
            return Vec::new();
        }
        self.listening = true;
        vec![Effect::Status("Listening...".into()), Effect::Listen]
    }

    fn on_recognition(&mut self, event: RecognitionEvent) -> Vec<Effect> {
        self.listening = false;
        match event {
            RecognitionEvent::Result(transcript) => match self.matcher.match_transcript(&transcript) {
                Some(intent) => vec![
                    Effect::Status(format!("Heard: {}", transcript.trim())),
                    Effect::Navigate(intent.view()),
                ],
                None => vec![Effect::Status(format!(
                    "Command not recognized: {}. {START_PROMPT} to try again.",
                    transcript.trim()
                ))],
            },
            RecognitionEvent::NoMatch => {
                vec![Effect::Status(format!("No speech detected. {START_PROMPT} to try again."))]
            }
            RecognitionEvent::Error(e) => {
                warn!(error = e.as_str(), "speech recognition error");
                vec![Effect::Status(format!("Speech recognition error: {e}"))]
            }
            RecognitionEvent::End => vec![Effect::Stop],
        }
    }
}

impl ViewState for HomeView {
    fn view(&self) -> View {
        View::Home
    }

    fn handle(&mut self, event: ViewEvent, _now: Instant) -> Vec<Effect> {
        match event {
            ViewEvent::Entered => {
                let prompt = if self.recognition { START_PROMPT } else { UNSUPPORTED_PROMPT };
                vec![
                    Effect::Speak(Utterance::plain(WELCOME_NOTE)),
                    Effect::Status(prompt.into()),
                ]
            }
            ViewEvent::Input(line) => self.on_input(&line),
            ViewEvent::Recognition(event) => self.on_recognition(event),
            ViewEvent::Shutdown => vec![Effect::CancelSpeech, Effect::Stop],
            _ => Vec::new(),
        }
    }
}
