use image::{GrayImage, Luma, RgbaImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_polygon_mut;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use imageproc::morphology::{close, dilate};
use imageproc::point::Point;
use sightguide_common::config::BookConfig;
use tracing::debug;

use crate::region::{
    bounding_rect, polygon_area, score_rectangle, text_density, AreaBounds, CandidateRegion, Region,
};
use crate::VisionError;

/// Gaussian sigma of an 11x11 adaptive-threshold window.
const THRESHOLD_SIGMA: f32 = 2.0;
/// Subtracted from the local mean before comparing.
const THRESHOLD_C: i32 = 2;
const CANNY_LOW: f32 = 75.0;
const CANNY_HIGH: f32 = 200.0;
/// Douglas-Peucker tolerance as a fraction of the contour perimeter.
const APPROX_EPSILON: f64 = 0.04;
const MIN_BLOB_AREA: f64 = 50.0;
const MAX_BLOB_AREA: f64 = 5000.0;
/// Chebyshev radius of the ~20x20 kernel that merges text blobs into clusters.
const CLUSTER_RADIUS: u8 = 10;
const MIN_FRAME_SIDE: u32 = 8;

/// Tunables of the book framing heuristic.
#[derive(Debug, Clone, PartialEq)]
pub struct BookParams {
    pub min_area: f64,
    pub max_area_ratio: f64,
    pub min_clarity: f64,
    pub min_size_ratio: f64,
    pub max_size_ratio: f64,
    pub stable_threshold: u32,
}

impl Default for BookParams {
    fn default() -> Self {
        Self::from(&BookConfig::default())
    }
}

impl From<&BookConfig> for BookParams {
    fn from(config: &BookConfig) -> Self {
        Self {
            min_area: config.min_area,
            max_area_ratio: config.max_area_ratio,
            min_clarity: config.min_clarity,
            min_size_ratio: config.min_size_ratio,
            max_size_ratio: config.max_size_ratio,
            stable_threshold: config.stable_threshold,
        }
    }
}

/// Where the winning rectangle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    EdgeOutline,
    TextCluster,
}

/// Per-frame result of book detection.
#[derive(Debug, Clone, PartialEq)]
pub struct BookDetection {
    pub frame_width: u32,
    pub frame_height: u32,
    pub candidate: Option<CandidateRegion>,
    pub source: Option<CandidateSource>,
    /// Mean gradient magnitude inside the candidate; 0 when nothing was found.
    pub clarity: f64,
}

impl BookDetection {
    pub fn found(&self) -> bool {
        self.candidate.is_some()
    }

    pub fn region(&self) -> Option<Region> {
        self.candidate.map(|c| c.region)
    }
}

/// Detection plus the intermediate contours, kept for the debug overlay.
#[derive(Debug, Clone)]
pub struct BookAnalysis {
    pub detection: BookDetection,
    pub text_contours: Vec<Vec<Point<i32>>>,
    pub edge_contours: Vec<Vec<Point<i32>>>,
}

/// Locate the most book-like rectangle in `frame`.
pub fn detect_book(frame: &RgbaImage, params: &BookParams) -> Result<BookAnalysis, VisionError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(VisionError::EmptyFrame);
    }
    if width < MIN_FRAME_SIDE || height < MIN_FRAME_SIDE {
        return Err(VisionError::FrameTooSmall { width, height });
    }

    let gray = image::imageops::grayscale(frame);
    let binary = threshold_text(&gray);
    let morphed = close(&binary, Norm::LInf, 1);

    let text_contours: Vec<Contour<i32>> = find_contours::<i32>(&morphed)
        .into_iter()
        .filter(is_external)
        .collect();

    let edges = dilate(&canny(&gray, CANNY_LOW, CANNY_HIGH), Norm::LInf, 1);
    let edge_contours: Vec<Contour<i32>> = find_contours::<i32>(&edges);

    let frame_area = width as f64 * height as f64;
    let bounds = AreaBounds::for_frame(params.min_area, params.max_area_ratio, width, height);

    let mut best: Option<CandidateRegion> = None;
    let mut source = None;

    for contour in &edge_contours {
        let area = polygon_area(&contour.points);
        if !bounds.contains(area) {
            continue;
        }
        let vertices = approximate_vertex_count(&contour.points);
        if !(4..=6).contains(&vertices) {
            continue;
        }
        let Some(region) = bounding_rect(&contour.points) else {
            continue;
        };
        if let Some(candidate) = score_candidate(region, &binary, frame_area, &bounds) {
            if best.map_or(true, |b| candidate.score > b.score) {
                best = Some(candidate);
                source = Some(CandidateSource::EdgeOutline);
            }
        }
    }

    if best.is_none() {
        for region in text_clusters(&text_contours, width, height) {
            if !bounds.contains(region.area()) {
                continue;
            }
            if let Some(candidate) = score_candidate(region, &binary, frame_area, &bounds) {
                if best.map_or(true, |b| candidate.score > b.score) {
                    best = Some(candidate);
                    source = Some(CandidateSource::TextCluster);
                }
            }
        }
    }

    let clarity = match best {
        Some(candidate) => text_clarity(&gray, &candidate.region),
        None => 0.0,
    };

    debug!(
        edge_contours = edge_contours.len(),
        text_contours = text_contours.len(),
        found = best.is_some(),
        score = best.map(|b| b.score).unwrap_or(0.0),
        clarity,
        "book detection"
    );

    Ok(BookAnalysis {
        detection: BookDetection {
            frame_width: width,
            frame_height: height,
            candidate: best,
            source,
            clarity,
        },
        text_contours: text_contours.into_iter().map(|c| c.points).collect(),
        edge_contours: edge_contours.into_iter().map(|c| c.points).collect(),
    })
}

fn is_external(contour: &Contour<i32>) -> bool {
    contour.parent.is_none() && contour.border_type == BorderType::Outer
}

fn score_candidate(
    region: Region,
    binary: &GrayImage,
    frame_area: f64,
    bounds: &AreaBounds,
) -> Option<CandidateRegion> {
    let density = text_density(binary, &region);
    let score = score_rectangle(&region, density, frame_area, bounds);
    (score > 0.0).then_some(CandidateRegion {
        region,
        text_density: density,
        score,
    })
}

/// Inverted Gaussian adaptive threshold: dark strokes on a light page become foreground.
pub fn threshold_text(gray: &GrayImage) -> GrayImage {
    let local_mean = gaussian_blur_f32(gray, THRESHOLD_SIGMA);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y).0[0] as i32;
        let threshold = local_mean.get_pixel(x, y).0[0] as i32 - THRESHOLD_C;
        if value <= threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Vertex count of the closed Douglas-Peucker approximation of a contour.
///
/// The contour is split at the point farthest from its start and each half
/// is simplified as an open curve, so the closing edge is handled correctly.
pub fn approximate_vertex_count(points: &[Point<i32>]) -> usize {
    if points.len() < 3 {
        return points.len();
    }
    let perimeter = arc_length(points, true);
    let epsilon = APPROX_EPSILON * perimeter;
    if epsilon <= 0.0 {
        return 1;
    }

    let start = points[0];
    let split = points
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| {
            let dx = (p.x - start.x) as i64;
            let dy = (p.y - start.y) as i64;
            dx * dx + dy * dy
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    if split == 0 {
        return 1;
    }

    let first = approximate_polygon_dp(&points[..=split], epsilon, false);
    let mut second_half: Vec<Point<i32>> = points[split..].to_vec();
    second_half.push(start);
    let second = approximate_polygon_dp(&second_half, epsilon, false);

    // Both halves end on a shared vertex (the split point, then the start).
    first.len().saturating_sub(1) + second.len().saturating_sub(1)
}

/// Bounding rectangles of clustered medium-sized text blobs.
fn text_clusters(text_contours: &[Contour<i32>], width: u32, height: u32) -> Vec<Region> {
    let mut mask = GrayImage::new(width, height);
    for contour in text_contours {
        let area = polygon_area(&contour.points);
        if area <= MIN_BLOB_AREA || area >= MAX_BLOB_AREA {
            continue;
        }
        let mut poly = contour.points.clone();
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }
        if poly.len() < 3 {
            continue;
        }
        draw_polygon_mut(&mut mask, &poly, Luma([255]));
    }

    let merged = dilate(&mask, Norm::LInf, CLUSTER_RADIUS);
    find_contours::<i32>(&merged)
        .iter()
        .filter(|c| is_external(c))
        .filter_map(|c| bounding_rect(&c.points))
        .collect()
}

/// Mean Sobel gradient magnitude inside `region`; higher means sharper text.
///
/// Gradients are taken on the whole frame so pixels on the region border see
/// their real neighbours.
pub fn text_clarity(gray: &GrayImage, region: &Region) -> f64 {
    let Some(r) = region.clamp_to(gray.width(), gray.height()) else {
        return 0.0;
    };
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);
    let mut total = 0.0;
    for y in r.y..r.y + r.height {
        for x in r.x..r.x + r.width {
            let a = gx.get_pixel(x, y).0[0] as f64;
            let b = gy.get_pixel(x, y).0[0] as f64;
            total += (a * a + b * b).sqrt();
        }
    }
    total / (r.width as f64 * r.height as f64)
}
