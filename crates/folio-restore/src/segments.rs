// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Probabilistic line-segment extraction on top of the Hough transform.
//
// `imageproc::hough::detect_lines` returns infinite polar lines. Each line
// is walked across the edge map to recover the supported stretches, which are
// split at gaps longer than `max_gap` and kept when at least `min_length`
// long. The angle of a kept segment is refined by a least-squares fit of its
// supporting pixels, so it is not limited to the 1° Hough bins.

use image::GrayImage;
use imageproc::hough::{LineDetectionOptions, PolarLine, detect_lines};

/// Perpendicular tolerance (pixels) when collecting edge support for a line.
const SUPPORT_BAND: i32 = 2;

/// Parameters for [`detect_segments`].
#[derive(Debug, Clone, Copy)]
pub struct SegmentOptions {
    /// Minimum Hough votes for a candidate line.
    pub vote_threshold: u32,
    /// Shortest segment kept (pixels).
    pub min_length: f32,
    /// Longest run of unsupported pixels bridged inside a segment.
    pub max_gap: f32,
}

/// A finite line segment in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: (f32, f32),
    pub end: (f32, f32),
    /// Direction in degrees, normalised to (-90, 90]. Positive angles slope
    /// downward to the right (image y grows downward).
    pub angle_degrees: f32,
}

impl LineSegment {
    pub fn length(&self) -> f32 {
        let dx = self.end.0 - self.start.0;
        let dy = self.end.1 - self.start.1;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn dx(&self) -> f32 {
        self.end.0 - self.start.0
    }
}

/// Extract line segments from a binary edge map (non-zero = edge).
pub fn detect_segments(edges: &GrayImage, options: SegmentOptions) -> Vec<LineSegment> {
    let (w, h) = edges.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let lines = detect_lines(
        edges,
        LineDetectionOptions {
            vote_threshold: options.vote_threshold,
            suppression_radius: 8,
        },
    );

    let mut segments = Vec::new();
    for line in &lines {
        walk_line(edges, line, options, &mut segments);
    }
    segments
}

/// Walk a polar line across the image, collecting supported runs.
///
/// A `PolarLine` with parameters `(r, theta)` represents the line
///   `x * cos(theta) + y * sin(theta) = r`
/// whose direction vector is `(-sin(theta), cos(theta))`.
fn walk_line(
    edges: &GrayImage,
    line: &PolarLine,
    options: SegmentOptions,
    out: &mut Vec<LineSegment>,
) {
    let (w, h) = edges.dimensions();
    let theta = (line.angle_in_degrees as f32).to_radians();
    let (sin, cos) = theta.sin_cos();
    let (x0, y0) = (line.r * cos, line.r * sin);
    let dir = (-sin, cos);
    let reach = (w + h) as i32;

    let mut run: Vec<(f32, f32)> = Vec::new();
    let mut last_hit: Option<i32> = None;

    for t in -reach..=reach {
        let x = x0 + t as f32 * dir.0;
        let y = y0 + t as f32 * dir.1;

        let Some(hit) = support_at(edges, x, y, (cos, sin), w, h) else {
            continue;
        };

        if let Some(last) = last_hit {
            if (t - last) as f32 > options.max_gap {
                flush_run(&mut run, options.min_length, dir, out);
            }
        }
        run.push(hit);
        last_hit = Some(t);
    }
    flush_run(&mut run, options.min_length, dir, out);
}

/// Find an edge pixel at `(x, y)` or within the support band along the normal.
fn support_at(
    edges: &GrayImage,
    x: f32,
    y: f32,
    normal: (f32, f32),
    w: u32,
    h: u32,
) -> Option<(f32, f32)> {
    let offsets = std::iter::once(0).chain((1..=SUPPORT_BAND).flat_map(|d| [-d, d]));
    for k in offsets {
        let px = (x + k as f32 * normal.0).round();
        let py = (y + k as f32 * normal.1).round();
        if px < 0.0 || py < 0.0 || px >= w as f32 || py >= h as f32 {
            continue;
        }
        if edges.get_pixel(px as u32, py as u32).0[0] > 0 {
            return Some((px, py));
        }
    }
    None
}

fn flush_run(
    run: &mut Vec<(f32, f32)>,
    min_length: f32,
    dir: (f32, f32),
    out: &mut Vec<LineSegment>,
) {
    if run.len() >= 2 {
        let first = run[0];
        let last = run[run.len() - 1];
        let length = ((last.0 - first.0).powi(2) + (last.1 - first.1).powi(2)).sqrt();
        if length >= min_length {
            // Orient left-to-right so horizontal-ish segments have dx > 0.
            let (start, end) = if last.0 < first.0 || (last.0 == first.0 && last.1 < first.1) {
                (last, first)
            } else {
                (first, last)
            };
            out.push(LineSegment {
                start,
                end,
                angle_degrees: fitted_angle(run, dir),
            });
        }
    }
    run.clear();
}

/// Least-squares direction of a point set, in degrees within (-90, 90].
fn fitted_angle(points: &[(f32, f32)], dir: (f32, f32)) -> f32 {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0 as f64).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1 as f64).sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
    for p in points {
        let dx = p.0 as f64 - mx;
        let dy = p.1 as f64 - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    let degrees = if dir.0.abs() >= dir.1.abs() {
        // Mostly horizontal: regress y on x.
        if sxx == 0.0 {
            90.0
        } else {
            (sxy / sxx).atan().to_degrees()
        }
    } else {
        // Mostly vertical: regress x on y, then convert to a direction angle.
        let slope = if syy == 0.0 { 0.0 } else { sxy / syy };
        1.0f64.atan2(slope).to_degrees()
    };

    normalise_angle(degrees as f32)
}

fn normalise_angle(mut degrees: f32) -> f32 {
    while degrees > 90.0 {
        degrees -= 180.0;
    }
    while degrees <= -90.0 {
        degrees += 180.0;
    }
    degrees
}
