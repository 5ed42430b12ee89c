use async_trait::async_trait;
use sightguide_common::config::SpeechConfig;
use std::sync::Arc;
use tracing::{debug, info};

use crate::app::View;
use crate::console::{next_line, ConsoleLines};

const READ_COMMANDS: &[&str] = &["read a book", "book", "read", "i want to read a book"];
const TRAVEL_COMMANDS: &[&str] = &[
    "go outside",
    "I want to go outside",
    "outside",
    "travel",
    "I want to travel",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Travel,
}

impl Intent {
    pub fn view(self) -> View {
        match self {
            Intent::Read => View::ReadBook,
            Intent::Travel => View::Travel,
        }
    }
}

/// Maps a transcript to an intent by exact, case-insensitive phrase match.
#[derive(Debug, Clone)]
pub struct IntentMatcher {
    read: Vec<String>,
    travel: Vec<String>,
}

impl Default for IntentMatcher {
    fn default() -> Self {
        Self {
            read: READ_COMMANDS.iter().map(|c| c.to_lowercase()).collect(),
            travel: TRAVEL_COMMANDS.iter().map(|c| c.to_lowercase()).collect(),
        }
    }
}

impl IntentMatcher {
    /// Read phrases are checked before travel phrases. Substrings never match.
    pub fn match_transcript(&self, transcript: &str) -> Option<Intent> {
        let normalized = transcript.trim().to_lowercase();
        if self.read.iter().any(|c| *c == normalized) {
            Some(Intent::Read)
        } else if self.travel.iter().any(|c| *c == normalized) {
            Some(Intent::Travel)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Final transcript of the utterance.
    Result(String),
    /// Input was received but held no words.
    NoMatch,
    Error(String),
    /// The input source closed; no further results will arrive.
    End,
}

/// Single-shot voice input: each `listen` yields one event and must be
/// called again for the next utterance.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn listen(&self) -> RecognitionEvent;
}

/// Terminal binding: the next typed line is the transcript.
pub struct StdinRecognizer {
    lines: ConsoleLines,
}

impl StdinRecognizer {
    pub fn new(lines: ConsoleLines) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl SpeechRecognizer for StdinRecognizer {
    async fn listen(&self) -> RecognitionEvent {
        match next_line(&self.lines).await {
            Some(line) if line.trim().is_empty() => RecognitionEvent::NoMatch,
            Some(line) => {
                debug!(transcript = line.as_str(), "recognized");
                RecognitionEvent::Result(line)
            }
            None => RecognitionEvent::End,
        }
    }
}

/// Voice commands are offered only when recognition is enabled.
pub fn recognizer_for(config: &SpeechConfig, lines: ConsoleLines) -> Option<Arc<dyn SpeechRecognizer>> {
    if !config.recognition {
        info!("speech recognition disabled, voice commands not offered");
        return None;
    }
    Some(Arc::new(StdinRecognizer::new(lines)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::from_receiver;
    use tokio::sync::mpsc;

    #[test]
    fn phrases_match_case_insensitively() {
        let matcher = IntentMatcher::default();
        assert_eq!(matcher.match_transcript("Read A Book"), Some(Intent::Read));
        assert_eq!(matcher.match_transcript("  book "), Some(Intent::Read));
        assert_eq!(matcher.match_transcript("i want to go outside"), Some(Intent::Travel));
        assert_eq!(matcher.match_transcript("TRAVEL"), Some(Intent::Travel));
    }

    #[test]
    fn substrings_do_not_match() {
        let matcher = IntentMatcher::default();
        assert_eq!(matcher.match_transcript("please read a book now"), None);
        assert_eq!(matcher.match_transcript("outside please"), None);
        assert_eq!(matcher.match_transcript(""), None);
    }

    #[test]
    fn intents_route_to_views() {
        assert_eq!(Intent::Read.view(), View::ReadBook);
        assert_eq!(Intent::Travel.view(), View::Travel);
    }

    #[tokio::test]
    async fn stdin_recognizer_is_single_shot() {
        let (tx, rx) = mpsc::channel(4);
        let recognizer = StdinRecognizer::new(from_receiver(rx));
        tx.send("read".into()).await.unwrap();
        tx.send("   ".into()).await.unwrap();
        assert_eq!(recognizer.listen().await, RecognitionEvent::Result("read".into()));
        assert_eq!(recognizer.listen().await, RecognitionEvent::NoMatch);
        drop(tx);
        assert_eq!(recognizer.listen().await, RecognitionEvent::End);
    }

    #[test]
    fn disabled_recognition_offers_nothing() {
        let (_tx, rx) = mpsc::channel(1);
        let config = SpeechConfig {
            recognition: false,
            ..SpeechConfig::default()
        };
        assert!(recognizer_for(&config, from_receiver(rx)).is_none());
    }
}
