use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use image::RgbaImage;
use sightguide_common::detection::{Detection, RecognitionResult};
use sightguide_common::frame::EncodedFrame;
use sightguide_vision::objects::AnnouncementTracker;
use sightguide_vision::overlay::draw_detection;
use tracing::warn;

use super::{navigation, unknown_command, Effect, UserCommand, View, ViewEvent, ViewState};
use crate::remote::ws::narration;
use crate::remote::SocketEvent;
use crate::speech::synthesis::Utterance;

/// Outdoor mode: stream frames to the detection socket and narrate answers.
pub struct TravelView {
    jpeg_quality: u8,
    socket_open: bool,
    latest: Option<Detection>,
    tracker: AnnouncementTracker,
    seq: u64,
}

impl TravelView {
    pub fn new(jpeg_quality: u8, cooldown: Duration) -> Self {
        Self {
            jpeg_quality,
            socket_open: false,
            latest: None,
            tracker: AnnouncementTracker::new(cooldown),
            seq: 0,
        }
    }

    fn on_frame(&mut self, frame: Arc<RgbaImage>) -> Vec<Effect> {
        let mut display = frame.as_ref().clone();
        if let Some(detection) = &self.latest {
            draw_detection(&mut display, detection);
        }
        let mut effects = vec![Effect::Display(display)];

        if self.socket_open {
            self.seq += 1;
            match EncodedFrame::jpeg(&frame, self.jpeg_quality, Utc::now().timestamp_millis(), self.seq) {
                Ok(encoded) => effects.push(Effect::SendFrame(encoded.to_base64())),
                Err(e) => warn!(error = %e, "failed to encode frame for detection"),
            }
        }
        effects
    }

    fn on_detection(&mut self, detection: Option<Detection>, now: Instant) -> Vec<Effect> {
        let Some(detection) = detection else {
            self.tracker.observe(now, std::iter::empty::<&str>());
            self.latest = None;
            return Vec::new();
        };
        let mut effects = Vec::new();
        for _ in self.tracker.observe(now, [detection.class.as_str()]) {
            effects.push(Effect::Speak(Utterance::plain(narration(&detection))));
            effects.push(Effect::Status(detection.label()));
        }
        self.latest = Some(detection);
        effects
    }

    fn on_socket(&mut self, event: SocketEvent, now: Instant) -> Vec<Effect> {
        match event {
            SocketEvent::Detection(detection) => self.on_detection(detection, now),
            SocketEvent::Closed => {
                self.socket_open = false;
                self.latest = None;
                vec![Effect::Status("Detection connection closed".into())]
            }
            SocketEvent::Error(e) => vec![Effect::Status(format!("Detection connection error: {e}"))],
        }
    }
}

impl ViewState for TravelView {
    fn view(&self) -> View {
        View::Travel
    }

    fn handle(&mut self, event: ViewEvent, now: Instant) -> Vec<Effect> {
        match event {
            ViewEvent::Entered => vec![Effect::Status("Connecting to detection service...".into())],
            ViewEvent::CameraFailed(message) => vec![Effect::Status(message)],
            ViewEvent::SocketReady => {
                self.socket_open = true;
                vec![Effect::Status("Detection connected".into())]
            }
            ViewEvent::SocketFailed(e) => vec![Effect::Status(format!("Detection connection failed: {e}"))],
            ViewEvent::Socket(event) => self.on_socket(event, now),
            ViewEvent::Recognized(RecognitionResult::Detection(detection)) => self.on_detection(detection, now),
            ViewEvent::Frame(frame) => self.on_frame(frame),
            ViewEvent::Input(line) => {
                let command = UserCommand::parse(&line);
                navigation(&command).unwrap_or_else(|| vec![unknown_command(line.trim())])
            }
            ViewEvent::Shutdown => vec![Effect::CancelSpeech, Effect::Stop],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use sightguide_common::frame::decode_base64_payload;

    fn frame() -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(40, 30, Rgba([10, 200, 10, 255])))
    }

    fn car() -> Detection {
        Detection {
            bbox: [2.0, 2.0, 20.0, 20.0],
            class: "car".into(),
            confidence: 0.9,
            depth: 210.04,
        }
    }

    #[test]
    fn frames_stream_only_while_socket_is_open() {
        let mut view = TravelView::new(50, Duration::from_secs(6));
        let effects = view.handle(ViewEvent::Frame(frame()), Instant::now());
        assert!(!effects.iter().any(|e| matches!(e, Effect::SendFrame(_))));

        view.handle(ViewEvent::SocketReady, Instant::now());
        let effects = view.handle(ViewEvent::Frame(frame()), Instant::now());
        let Some(Effect::SendFrame(payload)) = effects.last() else {
            panic!("expected a frame to send");
        };
        let bytes = decode_base64_payload(payload).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "payload is a JPEG");

        view.handle(ViewEvent::Socket(SocketEvent::Closed), Instant::now());
        let effects = view.handle(ViewEvent::Frame(frame()), Instant::now());
        assert!(!effects.iter().any(|e| matches!(e, Effect::SendFrame(_))));
    }

    #[test]
    fn detection_is_narrated_once_while_present() {
        let t0 = Instant::now();
        let mut view = TravelView::new(50, Duration::from_secs(6));
        let event = ViewEvent::from(SocketEvent::Detection(Some(car())));
        assert!(matches!(event, ViewEvent::Recognized(RecognitionResult::Detection(Some(_)))));
        let effects = view.handle(event, t0);
        assert!(matches!(&effects[0], Effect::Speak(u) if u.text == "car detected at 210.0 centimeters"));

        let repeat = view.handle(
            ViewEvent::from(SocketEvent::Detection(Some(car()))),
            t0 + Duration::from_millis(50),
        );
        assert!(repeat.is_empty());
    }

    #[test]
    fn latest_detection_is_drawn_on_next_tick() {
        let mut view = TravelView::new(50, Duration::from_secs(6));
        view.handle(ViewEvent::from(SocketEvent::Detection(Some(car()))), Instant::now());
        let effects = view.handle(ViewEvent::Frame(frame()), Instant::now());
        let Effect::Display(display) = &effects[0] else {
            panic!("expected a display");
        };
        assert_ne!(display, frame().as_ref());

        view.handle(ViewEvent::from(SocketEvent::Detection(None)), Instant::now());
        let effects = view.handle(ViewEvent::Frame(frame()), Instant::now());
        assert!(matches!(&effects[0], Effect::Display(d) if d == frame().as_ref()));
    }
}
