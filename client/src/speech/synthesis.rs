use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sightguide_common::config::SpeechConfig;
use tokio::process::Command;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

pub const WELCOME_NOTE: &str = "Welcome, do you want to read a book? Or do you want to travel the world?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Neutral,
}

impl Emotion {
    /// Labels match exactly; anything else, including other casings, reads as neutral.
    pub fn parse(label: &str) -> Self {
        match label {
            "happy" => Emotion::Happy,
            "sad" => Emotion::Sad,
            "angry" => Emotion::Angry,
            _ => Emotion::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechParams {
    pub rate: f32,
    pub pitch: f32,
}

pub fn speech_params(emotion: &str) -> SpeechParams {
    let (rate, pitch) = match Emotion::parse(emotion) {
        Emotion::Happy => (1.2, 1.2),
        Emotion::Sad => (0.8, 0.8),
        Emotion::Angry => (1.5, 1.0),
        Emotion::Neutral => (1.0, 1.0),
    };
    SpeechParams { rate, pitch }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub params: SpeechParams,
}

impl Utterance {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: speech_params("neutral"),
        }
    }

    pub fn with_emotion(text: impl Into<String>, emotion: &str) -> Self {
        Self {
            text: text.into(),
            params: speech_params(emotion),
        }
    }
}

/// Text-to-speech output. `speak` never blocks; utterances queue in order.
pub trait SpeechSynthesizer: Send + Sync {
    fn speak(&self, utterance: Utterance);
    /// Drop every queued utterance and silence the one being spoken.
    fn cancel(&self);
}

/// Writes utterances to the log instead of a speaker.
#[derive(Debug, Default)]
pub struct LogSynthesizer;

impl SpeechSynthesizer for LogSynthesizer {
    fn speak(&self, utterance: Utterance) {
        info!(
            text = utterance.text.as_str(),
            rate = utterance.params.rate,
            pitch = utterance.params.pitch,
            "speak"
        );
    }

    fn cancel(&self) {
        debug!("speech cancelled");
    }
}

/// Speaks through an espeak-compatible command, one subprocess per utterance.
pub struct CommandSynthesizer {
    tx: mpsc::UnboundedSender<(u64, Utterance)>,
    generation: Arc<AtomicU64>,
    interrupt: Arc<Notify>,
}

impl CommandSynthesizer {
    /// Must be called inside a tokio runtime; the worker task runs until the
    /// synthesizer is dropped.
    pub fn spawn(config: &SpeechConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));
        let interrupt = Arc::new(Notify::new());
        tokio::spawn(run_worker(
            rx,
            config.command.clone(),
            config.voice.clone(),
            config.base_wpm,
            generation.clone(),
            interrupt.clone(),
        ));
        Self {
            tx,
            generation,
            interrupt,
        }
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn speak(&self, utterance: Utterance) {
        let generation = self.generation.load(Ordering::SeqCst);
        if self.tx.send((generation, utterance)).is_err() {
            warn!("speech worker is gone, dropping utterance");
        }
    }

    fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.interrupt.notify_waiters();
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<(u64, Utterance)>,
    command: String,
    voice: String,
    base_wpm: u32,
    generation: Arc<AtomicU64>,
    interrupt: Arc<Notify>,
) {
    while let Some((queued_at, utterance)) = rx.recv().await {
        // queued before the last cancel
        if queued_at != generation.load(Ordering::SeqCst) {
            continue;
        }

        let interrupted = interrupt.notified();
        let args = espeak_args(&voice, base_wpm, &utterance);
        let mut child = match Command::new(&command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                warn!(command = command.as_str(), error = %e, "failed to spawn speech command");
                continue;
            }
        };

        tokio::select! {
            status = child.wait() => match status {
                Ok(s) if s.success() => debug!(text = utterance.text.as_str(), "utterance spoken"),
                Ok(s) => warn!(status = %s, "speech command exited with error"),
                Err(e) => warn!(error = %e, "failed to wait for speech command"),
            },
            _ = interrupted => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to stop speech command");
                }
                debug!("utterance interrupted");
            }
        }
    }
}

/// Rate scales words per minute; pitch 1.0 maps to espeak's default of 50.
pub fn espeak_args(voice: &str, base_wpm: u32, utterance: &Utterance) -> Vec<String> {
    let wpm = (base_wpm as f32 * utterance.params.rate).round().max(80.0) as u32;
    let pitch = (50.0 * utterance.params.pitch).round().clamp(0.0, 99.0) as u32;
    vec![
        "-v".into(),
        voice.into(),
        "-s".into(),
        wpm.to_string(),
        "-p".into(),
        pitch.to_string(),
        utterance.text.clone(),
    ]
}

/// Check whether the speech command runs. Logs a warning if not.
pub async fn check_command_available(command: &str) -> bool {
    match Command::new(command).arg("--version").output().await {
        Ok(out) if out.status.success() => {
            debug!(command, "speech command is available");
            true
        }
        Ok(_) => {
            warn!(command, "speech command returned non-zero for --version; speaking to the log");
            false
        }
        Err(e) => {
            warn!(command, error = %e, "speech command not found on PATH; speaking to the log");
            false
        }
    }
}

/// Pick the speaker for this run.
pub async fn synthesizer_for(config: &SpeechConfig) -> Arc<dyn SpeechSynthesizer> {
    if config.enabled && check_command_available(&config.command).await {
        Arc::new(CommandSynthesizer::spawn(config))
    } else {
        Arc::new(LogSynthesizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emotions_map_to_rate_and_pitch() {
        assert_eq!(speech_params("happy"), SpeechParams { rate: 1.2, pitch: 1.2 });
        assert_eq!(speech_params("sad"), SpeechParams { rate: 0.8, pitch: 0.8 });
        assert_eq!(speech_params("angry"), SpeechParams { rate: 1.5, pitch: 1.0 });
    }

    #[test]
    fn emotion_labels_are_case_sensitive() {
        for label in ["Happy", "ANGRY", " sad "] {
            assert_eq!(speech_params(label), SpeechParams { rate: 1.0, pitch: 1.0 });
        }
    }

    #[test]
    fn unknown_emotions_read_neutral() {
        for label in ["neutral", "surprised", "", "fear"] {
            assert_eq!(speech_params(label), SpeechParams { rate: 1.0, pitch: 1.0 });
        }
    }

    #[test]
    fn espeak_args_scale_rate_and_pitch() {
        let args = espeak_args("en-US", 175, &Utterance::with_emotion("Hello there", "happy"));
        assert_eq!(args, vec!["-v", "en-US", "-s", "210", "-p", "60", "Hello there"]);

        let args = espeak_args("en", 175, &Utterance::plain("x"));
        assert_eq!(args[3], "175");
        assert_eq!(args[5], "50");
    }

    #[tokio::test]
    async fn missing_command_falls_back_to_log() {
        assert!(!check_command_available("definitely-not-a-speech-binary").await);
        let config = SpeechConfig {
            command: "definitely-not-a-speech-binary".into(),
            ..SpeechConfig::default()
        };
        let synth = synthesizer_for(&config).await;
        synth.speak(Utterance::plain(WELCOME_NOTE));
        synth.cancel();
    }

    #[tokio::test]
    async fn cancel_skips_queued_utterances() {
        let config = SpeechConfig {
            command: "definitely-not-a-speech-binary".into(),
            ..SpeechConfig::default()
        };
        let synth = CommandSynthesizer::spawn(&config);
        synth.speak(Utterance::plain("first"));
        synth.cancel();
        assert_eq!(synth.generation.load(Ordering::SeqCst), 1);
        synth.speak(Utterance::plain("second"));
    }
}
