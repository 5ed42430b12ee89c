use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use sightguide_common::config::DetectionConfig;
use sightguide_common::detection::Prediction;
use sightguide_vision::objects::{filter_relevant, warning_text, AnnouncementTracker};
use sightguide_vision::overlay::draw_prediction;
use tracing::{debug, info, warn};

use super::{navigation, unknown_command, Effect, UserCommand, View, ViewEvent, ViewState};
use crate::speech::synthesis::Utterance;

/// In-process obstacle warnings from a local detection model.
pub struct ObstacleView {
    allowlist: Vec<String>,
    min_score: f64,
    tracker: AnnouncementTracker,
    model_ready: bool,
    running: bool,
}

impl ObstacleView {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            allowlist: config.allowlist.clone(),
            min_score: config.min_score,
            tracker: AnnouncementTracker::new(Duration::from_secs(config.cooldown_secs)),
            model_ready: false,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pending_cooldowns(&self) -> usize {
        self.tracker.pending_cooldowns()
    }

    fn stop(&mut self) -> Vec<Effect> {
        self.running = false;
        self.tracker.reset();
        info!("obstacle detection stopped");
        vec![Effect::CancelSpeech, Effect::Status("Detection stopped".into())]
    }

    fn toggle(&mut self) -> Vec<Effect> {
        if self.running {
            return self.stop();
        }
        if !self.model_ready {
            return vec![Effect::Status("Detection model is not loaded".into())];
        }
        self.running = true;
        info!("obstacle detection started");
        vec![Effect::Status("Detection started".into())]
    }

    fn on_predictions(
        &mut self,
        frame: Arc<RgbaImage>,
        result: Result<Vec<Prediction>, String>,
        now: Instant,
    ) -> Vec<Effect> {
        // a stop between dispatch and answer cancels the tick
        if !self.running {
            return Vec::new();
        }
        let predictions = match result {
            Ok(p) => p,
            Err(e) => {
                warn!(error = e.as_str(), "detection failed for this frame");
                return vec![Effect::Display(frame.as_ref().clone())];
            }
        };

        let relevant = filter_relevant(predictions, &self.allowlist, self.min_score);
        let mut display = frame.as_ref().clone();
        for prediction in &relevant {
            draw_prediction(&mut display, prediction);
        }
        let mut effects = vec![Effect::Display(display)];

        let announce = self.tracker.observe(now, relevant.iter().map(|p| p.class.as_str()));
        for class in announce {
            debug!(class = class.as_str(), "announcing obstacle");
            effects.push(Effect::Speak(Utterance::plain(warning_text(&class))));
        }
        effects
    }
}

impl ViewState for ObstacleView {
    fn view(&self) -> View {
        View::Obstacles
    }

    fn handle(&mut self, event: ViewEvent, now: Instant) -> Vec<Effect> {
        match event {
            ViewEvent::Entered => vec![Effect::Status("Loading detection model...".into())],
            ViewEvent::CameraFailed(message) => vec![Effect::Status(message)],
            ViewEvent::ModelLoaded(Ok(())) => {
                self.model_ready = true;
                self.running = true;
                vec![Effect::Status("Detection started".into())]
            }
            ViewEvent::ModelLoaded(Err(e)) => {
                vec![Effect::Status(format!("Failed to load detection model: {e}"))]
            }
            ViewEvent::Frame(frame) => {
                if self.running {
                    vec![Effect::Detect(frame)]
                } else {
                    vec![Effect::Display(frame.as_ref().clone())]
                }
            }
            ViewEvent::Predictions { frame, result } => self.on_predictions(frame, result, now),
            ViewEvent::Input(line) => {
                let command = UserCommand::parse(&line);
                if let Some(mut effects) = navigation(&command) {
                    self.running = false;
                    self.tracker.reset();
                    effects.insert(0, Effect::Status("Detection stopped".into()));
                    return effects;
                }
                match command {
                    UserCommand::Toggle => self.toggle(),
                    _ => vec![unknown_command(line.trim())],
                }
            }
            ViewEvent::Shutdown => {
                let mut effects = self.stop();
                effects.push(Effect::Stop);
                effects
            }
            _ => Vec::new(),
        }
    }
}
