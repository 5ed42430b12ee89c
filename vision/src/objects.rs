use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::RgbaImage;
use sightguide_common::detection::Prediction;
use tracing::debug;

/// Object-detection model run against each camera frame.
///
/// The model itself is an external collaborator; implementations only adapt
/// its inputs and outputs.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, frame: &RgbaImage) -> Result<Vec<Prediction>, DetectorError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("failed to load detection model: {0}")]
    Load(String),
    #[error("detection failed: {0}")]
    Inference(String),
}

/// Keep predictions whose class is obstacle-worthy and whose score clears `min_score`.
pub fn filter_relevant(predictions: Vec<Prediction>, allowlist: &[String], min_score: f64) -> Vec<Prediction> {
    predictions
        .into_iter()
        .filter(|p| p.score >= min_score && allowlist.iter().any(|c| c == &p.class))
        .collect()
}

pub fn warning_text(class: &str) -> String {
    format!("Warning: {class} ahead")
}

/// Per-class suppression window for spoken warnings.
#[derive(Debug, Clone)]
pub struct AnnouncementCooldown {
    window: Duration,
    expiries: HashMap<String, Instant>,
}

impl AnnouncementCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            expiries: HashMap::new(),
        }
    }

    /// Claim the right to announce `label` at `now`. Returns `false` while a
    /// previous announcement's window is still open.
    pub fn try_claim(&mut self, label: &str, now: Instant) -> bool {
        if self.is_active(label, now) {
            return false;
        }
        self.expiries.insert(label.to_string(), now + self.window);
        true
    }

    pub fn is_active(&self, label: &str, now: Instant) -> bool {
        self.expiries.get(label).is_some_and(|expiry| *expiry > now)
    }

    pub fn clear(&mut self, label: &str) {
        self.expiries.remove(label);
    }

    pub fn clear_all(&mut self) {
        self.expiries.clear();
    }

    /// Drop every window that has run out by `now`.
    pub fn purge_expired(&mut self, now: Instant) {
        self.expiries.retain(|_, expiry| *expiry > now);
    }

    pub fn pending(&self) -> usize {
        self.expiries.len()
    }
}

/// Tracks which classes were in the previous frame and decides what to announce.
#[derive(Debug, Clone)]
pub struct AnnouncementTracker {
    previous: BTreeSet<String>,
    cooldown: AnnouncementCooldown,
}

impl AnnouncementTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            previous: BTreeSet::new(),
            cooldown: AnnouncementCooldown::new(window),
        }
    }

    /// Feed the classes seen in the current frame; returns the classes to
    /// announce now, in sorted order.
    pub fn observe<'a, I>(&mut self, now: Instant, labels: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let current: BTreeSet<String> = labels.into_iter().map(String::from).collect();

        for gone in self.previous.difference(&current) {
            debug!(class = gone.as_str(), "object left view, clearing cooldown");
            self.cooldown.clear(gone);
        }
        self.cooldown.purge_expired(now);

        let mut announce = Vec::new();
        for label in current.difference(&self.previous) {
            if self.cooldown.try_claim(label, now) {
                announce.push(label.clone());
            } else {
                debug!(class = label.as_str(), "new appearance suppressed by cooldown");
            }
        }

        self.previous = current;
        announce
    }

    /// Forget every class and cancel every pending cooldown.
    pub fn reset(&mut self) {
        self.previous.clear();
        self.cooldown.clear_all();
    }

    pub fn pending_cooldowns(&self) -> usize {
        self.cooldown.pending()
    }

    pub fn previous(&self) -> &BTreeSet<String> {
        &self.previous
    }
}
