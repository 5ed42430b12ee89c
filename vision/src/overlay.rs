use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use sightguide_common::detection::{Detection, Prediction};

use crate::position::{GRID_COLS, GRID_ROWS};
use crate::region::Region;

pub const GRID_COLOR: Rgba<u8> = Rgba([255, 255, 255, 200]);
pub const TARGET_COLOR: Rgba<u8> = Rgba([255, 0, 0, 150]);
pub const BOOK_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const TEXT_CONTOUR_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const EDGE_CONTOUR_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const DETECTION_COLOR: Rgba<u8> = Rgba([0, 128, 0, 255]);

/// 3x3 guide grid with the target cell outlined.
pub fn draw_grid(canvas: &mut RgbaImage) {
    let (width, height) = canvas.dimensions();
    let cell_width = width / GRID_COLS;
    let cell_height = height / GRID_ROWS;

    for i in 1..GRID_COLS {
        let x = (i * cell_width) as f32;
        draw_line_segment_mut(canvas, (x, 0.0), (x, height as f32), GRID_COLOR);
    }
    for i in 1..GRID_ROWS {
        let y = (i * cell_height) as f32;
        draw_line_segment_mut(canvas, (0.0, y), (width as f32, y), GRID_COLOR);
    }

    let target = Region {
        x: cell_width,
        y: cell_height,
        width: cell_width,
        height: cell_height,
    };
    draw_thick_rect(canvas, &target, TARGET_COLOR, 2);
}

/// Outline `region` with a border `thickness` pixels wide, growing inward.
pub fn draw_thick_rect(canvas: &mut RgbaImage, region: &Region, color: Rgba<u8>, thickness: u32) {
    for t in 0..thickness {
        if region.width <= 2 * t || region.height <= 2 * t {
            break;
        }
        let inset = Rect::at((region.x + t) as i32, (region.y + t) as i32)
            .of_size(region.width - 2 * t, region.height - 2 * t);
        draw_hollow_rect_mut(canvas, inset, color);
    }
}

pub fn draw_book(canvas: &mut RgbaImage, region: &Region) {
    draw_thick_rect(canvas, region, BOOK_COLOR, 2);
}

/// Plot contour pixels, clipped to the canvas.
pub fn draw_contours(canvas: &mut RgbaImage, contours: &[Vec<Point<i32>>], color: Rgba<u8>) {
    let (width, height) = canvas.dimensions();
    for point in contours.iter().flatten() {
        if point.x >= 0 && point.y >= 0 && (point.x as u32) < width && (point.y as u32) < height {
            canvas.put_pixel(point.x as u32, point.y as u32, color);
        }
    }
}

/// Box of a socket detection (`[x1, y1, x2, y2]`).
pub fn draw_detection(canvas: &mut RgbaImage, detection: &Detection) {
    let (x, y, w, h) = detection.rect();
    if let Some(region) = to_region(x, y, w, h) {
        draw_thick_rect(canvas, &region, DETECTION_COLOR, 3);
    }
}

/// Box of a model prediction (`[x, y, width, height]`).
pub fn draw_prediction(canvas: &mut RgbaImage, prediction: &Prediction) {
    let [x, y, w, h] = prediction.bbox;
    if let Some(region) = to_region(x, y, w, h) {
        draw_thick_rect(canvas, &region, DETECTION_COLOR, 2);
    }
}

fn to_region(x: f64, y: f64, w: f64, h: f64) -> Option<Region> {
    if !(x.is_finite() && y.is_finite() && w.is_finite() && h.is_finite()) || w < 1.0 || h < 1.0 {
        return None;
    }
    Some(Region {
        x: x.max(0.0) as u32,
        y: y.max(0.0) as u32,
        width: w as u32,
        height: h as u32,
    })
}
