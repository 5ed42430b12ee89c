use image::GrayImage;
use imageproc::point::Point;
use serde::Serialize;

/// Axis-aligned rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Clip to a `width` x `height` frame. Returns `None` if nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Region {
            x: self.x,
            y: self.y,
            width: w,
            height: h,
        })
    }

    pub fn to_rect(&self) -> Option<imageproc::rect::Rect> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        Some(imageproc::rect::Rect::at(self.x as i32, self.y as i32).of_size(self.width, self.height))
    }
}

/// A scored book candidate: its rectangle plus the metrics that ranked it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CandidateRegion {
    pub region: Region,
    pub text_density: f64,
    pub score: f64,
}

/// Inclusive area window a book rectangle must fall in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaBounds {
    pub min_area: f64,
    pub max_area: f64,
}

impl AreaBounds {
    pub fn for_frame(min_area: f64, max_area_ratio: f64, frame_width: u32, frame_height: u32) -> Self {
        Self {
            min_area,
            max_area: frame_width as f64 * frame_height as f64 * max_area_ratio,
        }
    }

    pub fn contains(&self, area: f64) -> bool {
        area >= self.min_area && area <= self.max_area
    }
}

pub const MIN_ASPECT: f64 = 0.5;
pub const MAX_ASPECT: f64 = 2.0;
pub const BOOK_ASPECT_LOW: f64 = 0.6;
pub const BOOK_ASPECT_HIGH: f64 = 1.6;

/// Bonus for page-like proportions.
pub fn ratio_bonus(aspect_ratio: f64) -> f64 {
    if (BOOK_ASPECT_LOW..=BOOK_ASPECT_HIGH).contains(&aspect_ratio) {
        1.0
    } else {
        0.5
    }
}

/// Score a candidate rectangle. Zero means rejected.
///
/// `sqrt(area) / sqrt(frame_area) * ratio_bonus * (text_density + 0.5)`
pub fn score_rectangle(region: &Region, text_density: f64, frame_area: f64, bounds: &AreaBounds) -> f64 {
    let area = region.area();
    if !bounds.contains(area) {
        return 0.0;
    }
    let aspect = region.aspect_ratio();
    if !(MIN_ASPECT..=MAX_ASPECT).contains(&aspect) {
        return 0.0;
    }
    if frame_area <= 0.0 {
        return 0.0;
    }
    let size_score = area.sqrt() / frame_area.sqrt();
    size_score * ratio_bonus(aspect) * (text_density + 0.5)
}

/// Fraction of foreground pixels of `binary` inside `region`.
pub fn text_density(binary: &GrayImage, region: &Region) -> f64 {
    let Some(r) = region.clamp_to(binary.width(), binary.height()) else {
        return 0.0;
    };
    let mut foreground = 0u64;
    for y in r.y..r.y + r.height {
        for x in r.x..r.x + r.width {
            if binary.get_pixel(x, y).0[0] > 0 {
                foreground += 1;
            }
        }
    }
    foreground as f64 / region.area()
}

/// Smallest upright rectangle containing every point (inclusive pixel extents).
pub fn bounding_rect(points: &[Point<i32>]) -> Option<Region> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let min_x = min_x.max(0);
    let min_y = min_y.max(0);
    if max_x < min_x || max_y < min_y {
        return None;
    }
    Some(Region {
        x: min_x as u32,
        y: min_y as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}

/// Area enclosed by a closed contour (shoelace formula).
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice as f64 / 2.0).abs()
}
