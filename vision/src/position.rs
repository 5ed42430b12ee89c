use serde::Serialize;

use crate::book::{BookDetection, BookParams};

pub const GRID_COLS: u32 = 3;
pub const GRID_ROWS: u32 = 3;

pub const NO_BOOK_FEEDBACK: &str = "No book detected. Place a book with visible text in frame.";
pub const CENTERED_FEEDBACK: &str = "Perfect! Book is positioned correctly with clear text.";

/// The grid cell the book has to be framed in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetCell {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Target cell of a `frame_width` x `frame_height` frame.
///
/// The origin is one cell width/height from the frame origin and the size is
/// one cell, i.e. the middle cell of the 3x3 grid.
pub fn target_cell(frame_width: u32, frame_height: u32) -> TargetCell {
    let cell_width = frame_width as f64 / GRID_COLS as f64;
    let cell_height = frame_height as f64 / GRID_ROWS as f64;
    TargetCell {
        x: cell_width,
        y: cell_height,
        width: cell_width,
        height: cell_height,
    }
}

/// A single framing problem, in the order feedback is composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionIssue {
    TooFarLeft,
    TooFarRight,
    TooFarUp,
    TooFarDown,
    TooSmall,
    TooBig,
    TextNotClear,
}

impl PositionIssue {
    pub fn message(self) -> &'static str {
        match self {
            PositionIssue::TooFarLeft => "Move book right. ",
            PositionIssue::TooFarRight => "Move book left. ",
            PositionIssue::TooFarUp => "Move book down. ",
            PositionIssue::TooFarDown => "Move book up. ",
            PositionIssue::TooSmall => "Move book closer. ",
            PositionIssue::TooBig => "Move book farther away. ",
            PositionIssue::TextNotClear => "Text not clear enough, move closer or adjust lighting. ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionVerdict {
    pub centered: bool,
    pub feedback: String,
    pub issues: Vec<PositionIssue>,
}

/// Judge whether the detected book sits in the target cell, large and sharp enough.
pub fn assess_position(detection: &BookDetection, params: &BookParams) -> PositionVerdict {
    let Some(region) = detection.region() else {
        return PositionVerdict {
            centered: false,
            feedback: NO_BOOK_FEEDBACK.to_string(),
            issues: Vec::new(),
        };
    };

    let cell = target_cell(detection.frame_width, detection.frame_height);
    let (center_x, center_y) = region.center();
    let size_ratio_x = region.width as f64 / cell.width;
    let size_ratio_y = region.height as f64 / cell.height;

    let checks = [
        (center_x < cell.x, PositionIssue::TooFarLeft),
        (center_x > cell.x + cell.width, PositionIssue::TooFarRight),
        (center_y < cell.y, PositionIssue::TooFarUp),
        (center_y > cell.y + cell.height, PositionIssue::TooFarDown),
        (
            size_ratio_x < params.min_size_ratio || size_ratio_y < params.min_size_ratio,
            PositionIssue::TooSmall,
        ),
        (
            size_ratio_x > params.max_size_ratio && size_ratio_y > params.max_size_ratio,
            PositionIssue::TooBig,
        ),
        (detection.clarity < params.min_clarity, PositionIssue::TextNotClear),
    ];

    let issues: Vec<PositionIssue> = checks
        .into_iter()
        .filter_map(|(violated, issue)| violated.then_some(issue))
        .collect();

    if issues.is_empty() {
        return PositionVerdict {
            centered: true,
            feedback: CENTERED_FEEDBACK.to_string(),
            issues,
        };
    }

    PositionVerdict {
        centered: false,
        feedback: issues.iter().map(|i| i.message()).collect(),
        issues,
    }
}
