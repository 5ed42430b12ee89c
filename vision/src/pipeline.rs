use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::book::{detect_book, BookDetection, BookParams};
use crate::overlay::{draw_book, draw_contours, draw_grid, EDGE_CONTOUR_COLOR, TEXT_CONTOUR_COLOR};
use crate::position::{assess_position, PositionVerdict};
use crate::stability::{StabilityCounter, StabilityStep};

/// Everything the framing loop carries from one tick to the next.
#[derive(Debug, Clone)]
pub struct FramerState {
    pub stability: StabilityCounter,
    pub debug: bool,
}

impl FramerState {
    pub fn new(stable_threshold: u32, debug: bool) -> Self {
        Self {
            stability: StabilityCounter::new(stable_threshold),
            debug,
        }
    }
}

/// Outcome of one tick of the framing loop.
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// What to show for this tick: the annotated frame, or the raw frame on a fault.
    pub display: RgbaImage,
    pub detection: Option<BookDetection>,
    pub verdict: Option<PositionVerdict>,
    /// `None` when the tick faulted and the counter was left untouched.
    pub step: Option<StabilityStep>,
    /// The raw frame to upload when this tick triggered the auto-capture.
    pub capture: Option<RgbaImage>,
    /// Processing error of this tick, if any; the next tick retries.
    pub fault: Option<String>,
}

impl FrameReport {
    /// Progress line shown while the streak builds, e.g. `Stable: 3/15`.
    pub fn progress(&self) -> Option<String> {
        match self.step {
            Some(StabilityStep::Counting { count, threshold }) => Some(format!("Stable: {count}/{threshold}")),
            _ => None,
        }
    }
}

/// Per-frame book framing: detect, judge the position, count stable frames.
#[derive(Debug, Clone, Default)]
pub struct BookFramer {
    params: BookParams,
}

impl BookFramer {
    pub fn new(params: BookParams) -> Self {
        Self { params }
    }

    pub fn initial_state(&self, debug: bool) -> FramerState {
        FramerState::new(self.params.stable_threshold, debug)
    }

    /// Process one frame. State goes in and comes back out updated.
    pub fn process(&self, frame: &RgbaImage, mut state: FramerState) -> (FrameReport, FramerState) {
        if state.stability.is_captured() {
            let report = FrameReport {
                display: frame.clone(),
                detection: None,
                verdict: None,
                step: Some(StabilityStep::Latched),
                capture: None,
                fault: None,
            };
            return (report, state);
        }

        let analysis = match detect_book(frame, &self.params) {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "frame processing failed, showing raw feed");
                let report = FrameReport {
                    display: frame.clone(),
                    detection: None,
                    verdict: None,
                    step: None,
                    capture: None,
                    fault: Some(e.to_string()),
                };
                return (report, state);
            }
        };

        let mut display = frame.clone();
        draw_grid(&mut display);
        if state.debug {
            draw_contours(&mut display, &analysis.text_contours, TEXT_CONTOUR_COLOR);
            draw_contours(&mut display, &analysis.edge_contours, EDGE_CONTOUR_COLOR);
        }
        if let Some(region) = analysis.detection.region() {
            draw_book(&mut display, &region);
        }

        let verdict = assess_position(&analysis.detection, &self.params);
        let step = state.stability.record(verdict.centered);
        let capture = match step {
            StabilityStep::Capture => {
                info!(
                    threshold = state.stability.threshold(),
                    "book detected and aligned correctly, capturing image"
                );
                Some(frame.clone())
            }
            _ => None,
        };

        debug!(
            centered = verdict.centered,
            stable = state.stability.count(),
            feedback = verdict.feedback.as_str(),
            "framing verdict"
        );

        let report = FrameReport {
            display,
            detection: Some(analysis.detection),
            verdict: Some(verdict),
            step: Some(step),
            capture,
            fault: None,
        };
        (report, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn fault_shows_raw_frame_and_keeps_streak() {
        let framer = BookFramer::default();
        let mut state = framer.initial_state(false);
        state.stability.record(true);
        state.stability.record(true);

        let tiny = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        let (report, state) = framer.process(&tiny, state);
        assert!(report.fault.is_some());
        assert_eq!(report.step, None);
        assert_eq!(report.display, tiny);
        assert!(report.capture.is_none());
        assert_eq!(state.stability.count(), 2);
    }

    #[test]
    fn empty_scene_resets_and_annotates() {
        let framer = BookFramer::default();
        let frame = RgbaImage::from_pixel(300, 240, Rgba([90, 90, 90, 255]));
        let (report, state) = framer.process(&frame, framer.initial_state(false));
        assert_eq!(report.step, Some(StabilityStep::Reset));
        assert!(report.fault.is_none());
        assert!(!report.verdict.unwrap().centered);
        assert_ne!(report.display, frame, "grid overlay should be drawn");
        assert_eq!(state.stability.count(), 0);
    }

    #[test]
    fn steady_centered_page_triggers_one_capture() {
        use imageproc::drawing::draw_filled_rect_mut;
        use imageproc::rect::Rect;

        let mut frame = RgbaImage::from_pixel(640, 480, Rgba([90, 90, 90, 255]));
        draw_filled_rect_mut(
            &mut frame,
            Rect::at(240, 170).of_size(160, 140),
            Rgba([255, 255, 255, 255]),
        );
        for row in 0..8 {
            for col in 0..7 {
                draw_filled_rect_mut(
                    &mut frame,
                    Rect::at(252 + col * 19, 184 + row * 14).of_size(12, 4),
                    Rgba([0, 0, 0, 255]),
                );
            }
        }

        // clarity depends on the synthetic texture; only framing is under test here
        let framer = BookFramer::new(BookParams {
            min_clarity: 0.0,
            ..BookParams::default()
        });
        let mut state = framer.initial_state(true);
        let mut captures = 0;
        for tick in 1..=16 {
            let (report, next) = framer.process(&frame, state);
            state = next;
            if tick < 15 {
                assert_eq!(report.progress(), Some(format!("Stable: {tick}/15")));
            }
            if report.capture.is_some() {
                assert_eq!(tick, 15);
                captures += 1;
            }
        }
        assert_eq!(captures, 1);
        assert!(state.stability.is_captured());
    }

    #[test]
    fn latched_session_skips_processing() {
        let framer = BookFramer::new(BookParams {
            stable_threshold: 1,
            ..BookParams::default()
        });
        let mut state = framer.initial_state(false);
        assert_eq!(state.stability.record(true), StabilityStep::Capture);
        let frame = RgbaImage::from_pixel(64, 64, Rgba([200, 200, 200, 255]));
        let (report, _) = framer.process(&frame, state);
        assert_eq!(report.step, Some(StabilityStep::Latched));
        assert_eq!(report.display, frame);
        assert!(report.progress().is_none());
    }
}
