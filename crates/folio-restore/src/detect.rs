// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Defect detection — measures skew, perspective distortion, yellowing,
// uneven lighting, blur, and noise on a decoded page, and classifies how the
// page was captured.

use image::{DynamicImage, GrayImage};
use imageproc::contours::{BorderType, find_contours};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::dilate;
use imageproc::point::Point as PixelPoint;
use tracing::{debug, info, instrument};

use folio_core::{BlurLevel, DocumentProfile, DocumentType, Measurements, Point};

use crate::raster::{IntegralImage, LabPlanes, laplacian_variance, median, noise_variance, std_dev};
use crate::segments::{SegmentOptions, detect_segments};

/// Skew beyond this magnitude (degrees) is reported.
pub const SKEW_DETECTION_THRESHOLD: f32 = 0.5;
/// Mean b* above this value marks yellowed paper.
pub const YELLOW_THRESHOLD: f64 = 135.0;
/// Quadrant brightness deviation above this value marks uneven lighting.
pub const SHADOW_THRESHOLD: f64 = 25.0;
/// Focus-measure tiers: below each bound the page is blurrier.
pub const BLUR_HIGH: f64 = 100.0;
pub const BLUR_MODERATE: f64 = 300.0;
pub const BLUR_SLIGHT: f64 = 500.0;
/// The page outline must cover this share of the image to count.
const MIN_PAGE_AREA_RATIO: f64 = 0.20;

/// Analyse a decoded page and produce its defect profile.
///
/// Deterministic and side-effect free. A zero-sized image yields a neutral
/// profile; callers reject such input at decode time.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
pub fn analyze(image: &DynamicImage) -> DocumentProfile {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return DocumentProfile::default();
    }

    let gray = image.to_luma8();
    let mut profile = DocumentProfile {
        width,
        height,
        ..DocumentProfile::default()
    };
    let mut measurements = Measurements::default();

    // Step 1: Skew.
    let skew = detect_skew(&gray);
    if skew.abs() > SKEW_DETECTION_THRESHOLD {
        profile.skew_angle = skew;
        profile.quality_issues.push(format!("Document skew: {:.1}°", skew));
    }

    // Step 2: Perspective.
    if let Some(corners) = detect_perspective(&gray) {
        profile.has_perspective_distortion = true;
        profile.perspective_corners = Some(corners);
        profile
            .quality_issues
            .push("Perspective distortion detected".to_string());
    }

    // Step 3: Yellowing.
    let lab = LabPlanes::from_rgb(&image.to_rgb8());
    measurements.yellow_blue_mean = lab.mean_b();
    measurements.red_green_mean = lab.mean_a();
    if measurements.yellow_blue_mean > YELLOW_THRESHOLD {
        profile.is_yellowed = true;
        profile.yellow_level = ((measurements.yellow_blue_mean - 128.0) * 2.0).round() as i32;
        profile
            .quality_issues
            .push(format!("Paper yellowing (level: {})", profile.yellow_level));
    }

    // Step 4: Shadows.
    let integral = IntegralImage::new(&gray);
    measurements.quadrant_deviation = quadrant_deviation(&integral, width, height);
    if measurements.quadrant_deviation > SHADOW_THRESHOLD {
        profile.has_shadows = true;
        profile
            .quality_issues
            .push("Uneven lighting/shadows".to_string());
    }

    // Step 5: Blur.
    measurements.focus_measure = laplacian_variance(&gray);
    let (blur_level, faded) = classify_blur(measurements.focus_measure);
    profile.blur_level = blur_level;
    profile.is_faded = faded;
    match blur_level {
        BlurLevel::High => profile
            .quality_issues
            .push("Significant blur/fading".to_string()),
        BlurLevel::Moderate => profile.quality_issues.push("Moderate blur".to_string()),
        BlurLevel::Slight | BlurLevel::None => {}
    }

    // Step 6: Capture type.
    measurements.background_uniformity = corner_uniformity(&integral, width, height);
    measurements.edge_density = edge_density(&gray);
    let (document_type, characteristic) = classify_document(
        measurements.background_uniformity,
        measurements.edge_density,
        profile.has_perspective_distortion,
    );
    profile.document_type = document_type;
    profile.type_confidence = document_type.confidence();
    profile.characteristics.push(characteristic.to_string());
    if profile.is_yellowed {
        profile.characteristics.push("Aged/yellowed paper".to_string());
    }
    if profile.is_faded {
        profile.characteristics.push("Faded ink/text".to_string());
    }
    if profile.has_shadows {
        profile.characteristics.push("Shadow/lighting issues".to_string());
    }

    // Step 7: Noise (gates denoising only, never reported as an issue).
    measurements.noise_variance = noise_variance(&gray);

    profile.measurements = measurements;
    info!(
        document_type = document_type.as_str(),
        skew = profile.skew_angle,
        issues = profile.quality_issues.len(),
        "Document analysed"
    );
    profile
}

// -- Skew ---------------------------------------------------------------------

/// Median angle of near-horizontal line segments, or 0 when none are found.
pub fn detect_skew(gray: &GrayImage) -> f32 {
    let edges = canny(gray, 50.0, 150.0);
    let segments = detect_segments(
        &edges,
        SegmentOptions {
            vote_threshold: 100,
            min_length: gray.width() as f32 / 4.0,
            max_gap: 20.0,
        },
    );

    let angles: Vec<f32> = segments
        .iter()
        .filter(|s| s.dx() != 0.0 && s.angle_degrees > -45.0 && s.angle_degrees < 45.0)
        .map(|s| s.angle_degrees)
        .collect();

    debug!(segments = segments.len(), usable = angles.len(), "Skew segments collected");
    if angles.is_empty() {
        return 0.0;
    }
    median(&angles)
}

// -- Perspective --------------------------------------------------------------

/// Corners of a dominant four-sided page outline, if one exists.
pub fn detect_perspective(gray: &GrayImage) -> Option<[Point; 4]> {
    let (w, h) = gray.dimensions();
    let blurred = gaussian_blur_f32(gray, 1.1);
    let edges = canny(&blurred, 75.0, 200.0);
    let dilated = dilate(&edges, Norm::LInf, 1);

    let contours = find_contours::<i32>(&dilated);
    let (area, outline) = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| (polygon_area(&c.points), c))
        .max_by(|a, b| a.0.total_cmp(&b.0))?;

    let image_area = w as f64 * h as f64;
    if area < image_area * MIN_PAGE_AREA_RATIO {
        debug!(area, image_area, "Largest outline too small for a page");
        return None;
    }

    let perimeter = arc_length(&outline.points, true);
    let epsilon = 0.02 * perimeter;
    let mut polygon = approximate_polygon_dp(&outline.points, epsilon, true);
    // The closed approximation repeats the start point, and the contour's
    // final pixel sits next to it.
    while polygon.len() > 1 && distance(polygon[0], polygon[polygon.len() - 1]) <= epsilon {
        polygon.pop();
    }
    debug!(vertices = polygon.len(), area, "Page outline approximated");

    if polygon.len() != 4 {
        return None;
    }
    Some([
        to_point(polygon[0]),
        to_point(polygon[1]),
        to_point(polygon[2]),
        to_point(polygon[3]),
    ])
}

fn distance(a: PixelPoint<i32>, b: PixelPoint<i32>) -> f64 {
    let dx = (a.x - b.x) as f64;
    let dy = (a.y - b.y) as f64;
    (dx * dx + dy * dy).sqrt()
}

fn to_point(p: PixelPoint<i32>) -> Point {
    Point::new(p.x as f32, p.y as f32)
}

/// Area enclosed by a closed pixel contour (shoelace formula).
fn polygon_area(points: &[PixelPoint<i32>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0f64;
    for i in 0..n {
        let j = (i + 1) % n;
        twice_area += points[i].x as f64 * points[j].y as f64;
        twice_area -= points[j].x as f64 * points[i].y as f64;
    }
    twice_area.abs() / 2.0
}

// -- Lighting, focus, capture type --------------------------------------------

fn quadrant_deviation(integral: &IntegralImage, w: u32, h: u32) -> f64 {
    let (hw, hh) = (w / 2, h / 2);
    let means = [
        integral.stats(0, 0, hw, hh).0,
        integral.stats(hw, 0, w, hh).0,
        integral.stats(0, hh, hw, h).0,
        integral.stats(hw, hh, w, h).0,
    ];
    std_dev(&means)
}

/// Map a focus measure to a blur tier and whether the page reads as faded.
pub fn classify_blur(focus_measure: f64) -> (BlurLevel, bool) {
    if focus_measure < BLUR_HIGH {
        (BlurLevel::High, true)
    } else if focus_measure < BLUR_MODERATE {
        (BlurLevel::Moderate, false)
    } else if focus_measure < BLUR_SLIGHT {
        (BlurLevel::Slight, false)
    } else {
        (BlurLevel::None, false)
    }
}

/// Mean standard deviation of the four corner patches.
fn corner_uniformity(integral: &IntegralImage, w: u32, h: u32) -> f64 {
    let size = 50.min(h / 10).min(w / 10).max(1);
    let (right, bottom) = (w.saturating_sub(size), h.saturating_sub(size));
    let stds = [
        integral.stats(0, 0, size, size).1.sqrt(),
        integral.stats(right, 0, w, size).1.sqrt(),
        integral.stats(0, bottom, size, h).1.sqrt(),
        integral.stats(right, bottom, w, h).1.sqrt(),
    ];
    stds.iter().sum::<f64>() / 4.0
}

fn edge_density(gray: &GrayImage) -> f64 {
    let edges = canny(gray, 50.0, 150.0);
    let total: u64 = edges.pixels().map(|p| p.0[0] as u64).sum();
    total as f64 / (edges.width() as f64 * edges.height() as f64)
}

/// Capture-type heuristic: uniform corners plus visible content means a
/// flatbed scan; perspective or busy corners mean a camera capture.
pub fn classify_document(
    background_uniformity: f64,
    edge_density: f64,
    has_perspective: bool,
) -> (DocumentType, &'static str) {
    if background_uniformity < 15.0 && edge_density > 5.0 {
        (DocumentType::Scan, "Uniform background - flatbed scan")
    } else if has_perspective || background_uniformity > 30.0 {
        (DocumentType::Photograph, "Non-uniform background - camera capture")
    } else {
        (DocumentType::Digital, "Clean digital capture")
    }
}

// -- Tests --------------------------------------------------------------------
