// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Restoration operators.
//
// Every operator borrows its input and returns a new RGB image. None of them
// can fail: degenerate input (zero-sized images, collinear corners) is logged
// and handed back unchanged.

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use tracing::{debug, warn};

use folio_core::{DamageArea, DamageKind, DamageSeverity, Point};

use crate::raster::{IntegralImage, LabPlanes, NEUTRAL_CHROMA, clahe};

/// Largest chroma shift applied by [`correct_yellowing`].
const MAX_CHROMA_SHIFT: f32 = 40.0;
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

// -- Geometry -----------------------------------------------------------------

/// Warp the quadrilateral bounded by `corners` onto an upright rectangle.
///
/// Corners may arrive in any order. The output is as wide as the longer of
/// the top and bottom edges and as tall as the longer of the side edges.
pub fn perspective_rectify(image: &DynamicImage, corners: &[Point; 4]) -> DynamicImage {
    let [tl, tr, br, bl] = order_corners(corners);

    let out_w = distance(tl, tr).max(distance(bl, br)).round() as u32;
    let out_h = distance(tl, bl).max(distance(tr, br)).round() as u32;
    if out_w < 2 || out_h < 2 {
        warn!(out_w, out_h, "Degenerate page outline; perspective unchanged");
        return DynamicImage::ImageRgb8(image.to_rgb8());
    }

    let src = [(tl.x, tl.y), (tr.x, tr.y), (br.x, br.y), (bl.x, bl.y)];
    let (right, bottom) = ((out_w - 1) as f32, (out_h - 1) as f32);
    let dest = [(0.0, 0.0), (right, 0.0), (right, bottom), (0.0, bottom)];

    let Some(projection) = Projection::from_control_points(src, dest) else {
        warn!("Failed to compute projective transform; perspective unchanged");
        return DynamicImage::ImageRgb8(image.to_rgb8());
    };

    let input = image.to_rgb8();
    let mut output = RgbImage::new(out_w, out_h);
    warp_into(&input, &projection, Interpolation::Bilinear, WHITE, &mut output);
    debug!(out_w, out_h, "Perspective rectified");
    DynamicImage::ImageRgb8(output)
}

/// Order corners as top-left, top-right, bottom-right, bottom-left.
///
/// Top-left has the smallest `x + y` and bottom-right the largest; top-right
/// has the smallest `y - x` and bottom-left the largest.
pub fn order_corners(corners: &[Point; 4]) -> [Point; 4] {
    let by = |key: fn(&Point) -> f32, largest: bool| {
        let pick = corners.iter().copied().reduce(|best, p| {
            let better = if largest { key(&p) > key(&best) } else { key(&p) < key(&best) };
            if better { p } else { best }
        });
        pick.unwrap_or(corners[0])
    };
    let sum = |p: &Point| p.x + p.y;
    let diff = |p: &Point| p.y - p.x;
    [by(sum, false), by(diff, false), by(sum, true), by(diff, true)]
}

fn distance(a: Point, b: Point) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Rotate by `-angle_degrees` about the centre, growing the canvas to hold
/// the whole rotated page and filling the new border with white.
pub fn deskew(image: &DynamicImage, angle_degrees: f32) -> DynamicImage {
    let input = image.to_rgb8();
    let (w, h) = input.dimensions();
    if w == 0 || h == 0 {
        return DynamicImage::ImageRgb8(input);
    }

    let radians = (-angle_degrees).to_radians();
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let new_w = (w as f32 * cos + h as f32 * sin).ceil() as u32;
    let new_h = (w as f32 * sin + h as f32 * cos).ceil() as u32;

    let projection = Projection::translate(new_w as f32 / 2.0, new_h as f32 / 2.0)
        * Projection::rotate(radians)
        * Projection::translate(-(w as f32) / 2.0, -(h as f32) / 2.0);

    let mut output = RgbImage::new(new_w, new_h);
    warp_into(&input, &projection, Interpolation::Bilinear, WHITE, &mut output);
    debug!(angle_degrees, new_w, new_h, "Deskewed");
    DynamicImage::ImageRgb8(output)
}

// -- Tone and colour ----------------------------------------------------------

/// Even out lighting with CLAHE on the lightness plane (clip 2.0, 8x8 tiles).
pub fn remove_shadows(image: &DynamicImage) -> DynamicImage {
    equalise_lightness(image, 2.0)
}

/// Restore faded ink with CLAHE on lightness; faded pages get a stronger clip.
pub fn enhance_contrast(image: &DynamicImage, faded: bool) -> DynamicImage {
    equalise_lightness(image, if faded { 4.0 } else { 2.0 })
}

fn equalise_lightness(image: &DynamicImage, clip_limit: f32) -> DynamicImage {
    let mut lab = LabPlanes::from_rgb(&image.to_rgb8());
    let equalised = clahe(&lab.lightness(), clip_limit, 8);
    lab.set_lightness(&equalised);
    DynamicImage::ImageRgb8(lab.to_rgb())
}

/// Shift b* down by `amount` across the whole page.
pub fn reduce_yellow(image: &DynamicImage, amount: f32) -> DynamicImage {
    let mut lab = LabPlanes::from_rgb(&image.to_rgb8());
    lab.b.iter_mut().for_each(|v| *v -= amount);
    DynamicImage::ImageRgb8(lab.to_rgb())
}

/// Pull yellow (b*) and red (a*) casts back toward neutral.
///
/// The b* shift is at least 70% of the excess over neutral and always large
/// enough to bring the mean within 4 units of neutral, so a corrected page no
/// longer reads as yellowed. Each shift is capped at 40.
pub fn correct_yellowing(image: &DynamicImage) -> DynamicImage {
    let mut lab = LabPlanes::from_rgb(&image.to_rgb8());
    let mean_b = lab.mean_b();
    let mean_a = lab.mean_a();

    if mean_b > crate::detect::YELLOW_THRESHOLD {
        let excess = (mean_b - NEUTRAL_CHROMA) as f32;
        let shift = (excess * 0.7).trunc().max((excess - 4.0).ceil()).min(MAX_CHROMA_SHIFT);
        lab.b.iter_mut().for_each(|v| *v -= shift);
        debug!(mean_b, shift, "Yellow cast reduced");
    }
    if mean_a > 132.0 {
        let shift = (((mean_a - NEUTRAL_CHROMA) * 0.5).trunc() as f32).min(MAX_CHROMA_SHIFT);
        lab.a.iter_mut().for_each(|v| *v -= shift);
        debug!(mean_a, shift, "Red cast reduced");
    }

    DynamicImage::ImageRgb8(lab.to_rgb())
}

// -- Sharpening and noise -----------------------------------------------------

/// Strength of [`sharpen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharpenLevel {
    /// Unsharp mask, sigma 3: `2.0 * img - 1.0 * blur`.
    High,
    /// Unsharp mask, sigma 2: `1.5 * img - 0.5 * blur`.
    Moderate,
    /// 3x3 kernel with -1 around a centre of 9.
    Light,
}

impl SharpenLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Moderate => "moderate",
            Self::Light => "light",
        }
    }
}

pub fn sharpen(image: &DynamicImage, level: SharpenLevel) -> DynamicImage {
    match level {
        SharpenLevel::High => unsharp_mask(image, 3.0, 2.0, 1.0),
        SharpenLevel::Moderate => unsharp_mask(image, 2.0, 1.5, 0.5),
        SharpenLevel::Light => sharpen_kernel(image),
    }
}

/// `9 * centre - sum(neighbours)` with edge pixels clamped.
fn sharpen_kernel(image: &DynamicImage) -> DynamicImage {
    let input = image.to_rgb8();
    let (w, h) = input.dimensions();
    let mut output = RgbImage::new(w, h);
    for (x, y, out) in output.enumerate_pixels_mut() {
        let mut acc = [0f32; 3];
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                let ny = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                let weight = if dx == 0 && dy == 0 { 9.0 } else { -1.0 };
                let p = input.get_pixel(nx, ny);
                for c in 0..3 {
                    acc[c] += weight * p.0[c] as f32;
                }
            }
        }
        for c in 0..3 {
            out.0[c] = acc[c].round().clamp(0.0, 255.0) as u8;
        }
    }
    DynamicImage::ImageRgb8(output)
}

fn unsharp_mask(image: &DynamicImage, sigma: f32, original: f32, blurred: f32) -> DynamicImage {
    let input = image.to_rgb8();
    let blur = image::imageops::blur(&input, sigma);
    let mut output = RgbImage::new(input.width(), input.height());
    for ((out, src), soft) in output.pixels_mut().zip(input.pixels()).zip(blur.pixels()) {
        for c in 0..3 {
            let v = original * src.0[c] as f32 - blurred * soft.0[c] as f32;
            out.0[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    DynamicImage::ImageRgb8(output)
}

/// Gentle unsharp mask used as a last pass after targeted repair.
pub fn enhance_detail(image: &DynamicImage) -> DynamicImage {
    unsharp_mask(image, 1.0, 1.25, 0.25)
}

/// Default filter strength for [`denoise`].
pub const DENOISE_STRENGTH: f32 = 6.0;
const PATCH_RADIUS: i64 = 1;
const SEARCH_RADIUS: i64 = 3;

/// Non-local means on colour with 3x3 patches and a 7x7 search window.
///
/// Patch similarity is measured on luminance; the weight of a neighbour is
/// `exp(-max(d² - 2h², 0) / h²)` where `d²` is the mean squared patch
/// difference and `h` is `strength`.
pub fn denoise(image: &DynamicImage, strength: f32) -> DynamicImage {
    let input = image.to_rgb8();
    let (w, h) = input.dimensions();
    if w == 0 || h == 0 {
        return DynamicImage::ImageRgb8(input);
    }

    let luma: Vec<f32> = image.to_luma8().pixels().map(|p| p.0[0] as f32).collect();
    let (wi, hi) = (w as i64, h as i64);
    let at = |x: i64, y: i64| luma[(y.clamp(0, hi - 1) * wi + x.clamp(0, wi - 1)) as usize];

    let h2 = strength.max(1.0).powi(2);
    let patch_len = ((2 * PATCH_RADIUS + 1) * (2 * PATCH_RADIUS + 1)) as f32;
    let mut output = RgbImage::new(w, h);

    for y in 0..hi {
        for x in 0..wi {
            let mut acc = [0f32; 3];
            let mut total = 0f32;
            for sy in -SEARCH_RADIUS..=SEARCH_RADIUS {
                for sx in -SEARCH_RADIUS..=SEARCH_RADIUS {
                    let (nx, ny) = (x + sx, y + sy);
                    if nx < 0 || ny < 0 || nx >= wi || ny >= hi {
                        continue;
                    }
                    let mut d2 = 0f32;
                    for py in -PATCH_RADIUS..=PATCH_RADIUS {
                        for px in -PATCH_RADIUS..=PATCH_RADIUS {
                            let diff = at(x + px, y + py) - at(nx + px, ny + py);
                            d2 += diff * diff;
                        }
                    }
                    d2 /= patch_len;
                    let weight = (-(d2 - 2.0 * h2).max(0.0) / h2).exp();
                    let neighbour = input.get_pixel(nx as u32, ny as u32);
                    for c in 0..3 {
                        acc[c] += weight * neighbour.0[c] as f32;
                    }
                    total += weight;
                }
            }
            let pixel = output.get_pixel_mut(x as u32, y as u32);
            for c in 0..3 {
                pixel.0[c] = (acc[c] / total).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    debug!(strength, "Non-local means applied");
    DynamicImage::ImageRgb8(output)
}

// -- Targeted repair ----------------------------------------------------------

/// Half-width of the square repaired around a damage centre.
pub fn repair_radius(severity: DamageSeverity) -> u32 {
    match severity {
        DamageSeverity::Critical => 80,
        DamageSeverity::Moderate => 50,
        DamageSeverity::Minor => 30,
    }
}

/// Repair each located damage area in place and describe what was done.
///
/// Centres are given in percent of the page and clamped onto it. Each area
/// is treated inside a square of [`repair_radius`] around its centre; the
/// rest of the page is left untouched. Unrecognised damage types are skipped.
pub fn targeted_repair(image: &DynamicImage, areas: &[DamageArea]) -> (DynamicImage, Vec<String>) {
    let mut page = image.to_rgb8();
    let (w, h) = page.dimensions();
    let mut labels = Vec::new();
    if w == 0 || h == 0 {
        return (DynamicImage::ImageRgb8(page), labels);
    }

    for area in areas {
        let cx = ((area.x_percent.clamp(0.0, 100.0) / 100.0 * w as f32) as u32).min(w - 1);
        let cy = ((area.y_percent.clamp(0.0, 100.0) / 100.0 * h as f32) as u32).min(h - 1);
        let radius = repair_radius(area.severity);
        let (x0, y0) = (cx.saturating_sub(radius), cy.saturating_sub(radius));
        let (x1, y1) = ((cx + radius).min(w), (cy + radius).min(h));

        let roi = image::imageops::crop_imm(&page, x0, y0, x1 - x0, y1 - y0).to_image();
        let (repaired, action) = match area.kind {
            DamageKind::WaterStain => (treat_water_stain(&roi), "Water stain treated"),
            DamageKind::Foxing => (remove_foxing(&roi), "Foxing removed"),
            DamageKind::InkBleed => (correct_ink_bleed(&roi), "Ink bleed corrected"),
            DamageKind::Fading => (restore_fading(&roi), "Fading restored"),
            DamageKind::Tear => (median_filter(&roi, 2, 2), "Tear edges smoothed"),
            DamageKind::Other => {
                debug!(x = cx, y = cy, "Unrecognised damage type; skipped");
                continue;
            }
        };
        image::imageops::replace(&mut page, &repaired, x0 as i64, y0 as i64);
        labels.push(format!("{action} at ({cx}, {cy})"));
    }

    debug!(areas = areas.len(), repaired = labels.len(), "Targeted repair applied");
    (DynamicImage::ImageRgb8(page), labels)
}

fn map_lightness(roi: &RgbImage, f: impl FnOnce(&GrayImage) -> GrayImage) -> RgbImage {
    let mut lab = LabPlanes::from_rgb(roi);
    let mapped = f(&lab.lightness());
    lab.set_lightness(&mapped);
    lab.to_rgb()
}

/// Stretch lightness to the full range, then equalise.
fn treat_water_stain(roi: &RgbImage) -> RgbImage {
    map_lightness(roi, |l| {
        let (lo, hi) = l.pixels().fold((255u8, 0u8), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
        if hi <= lo {
            return clahe(l, 3.0, 4);
        }
        let scale = 255.0 / (hi - lo) as f32;
        let mut stretched = l.clone();
        for p in stretched.pixels_mut() {
            p.0[0] = ((p.0[0] - lo) as f32 * scale).round().clamp(0.0, 255.0) as u8;
        }
        clahe(&stretched, 3.0, 4)
    })
}

fn correct_ink_bleed(roi: &RgbImage) -> RgbImage {
    map_lightness(&median_filter(roi, 2, 2), |l| clahe(l, 2.5, 4))
}

fn restore_fading(roi: &RgbImage) -> RgbImage {
    map_lightness(roi, |l| {
        let mut boosted = clahe(l, 4.0, 4);
        for p in boosted.pixels_mut() {
            p.0[0] = (p.0[0] as f32 * 1.3 + 10.0).round().clamp(0.0, 255.0) as u8;
        }
        boosted
    })
}

/// Brown-orange spots: hue 20-60°, saturation at least 0.2, value 50-200.
fn is_foxing(pixel: &Rgb<u8>) -> bool {
    let [r, g, b] = pixel.0.map(|c| c as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if !(50.0..=200.0).contains(&max) {
        return false;
    }
    let chroma = max - min;
    if chroma / max < 0.2 {
        return false;
    }
    let hue = if max == r {
        60.0 * ((g - b) / chroma).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / chroma + 2.0)
    } else {
        60.0 * ((r - g) / chroma + 4.0)
    };
    (20.0..=60.0).contains(&hue)
}

const FILL_RADIUS: i64 = 3;

/// Replace foxed pixels with the mean of nearby clean paper.
fn remove_foxing(roi: &RgbImage) -> RgbImage {
    let (w, h) = roi.dimensions();
    let mask: Vec<bool> = roi.pixels().map(is_foxing).collect();
    if !mask.contains(&true) {
        return roi.clone();
    }

    let clean: Vec<&Rgb<u8>> = roi.pixels().zip(&mask).filter(|(_, m)| !**m).map(|(p, _)| p).collect();
    let fallback = average(clean.iter().copied());

    let mut out = roi.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if !mask[(y * w + x) as usize] {
            continue;
        }
        let mut neighbours = Vec::new();
        for dy in -FILL_RADIUS..=FILL_RADIUS {
            for dx in -FILL_RADIUS..=FILL_RADIUS {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                if !mask[(ny as u32 * w + nx as u32) as usize] {
                    neighbours.push(roi.get_pixel(nx as u32, ny as u32));
                }
            }
        }
        if let Some(fill) = average(neighbours.into_iter()).or(fallback) {
            *pixel = fill;
        }
    }
    out
}

fn average<'a>(pixels: impl Iterator<Item = &'a Rgb<u8>>) -> Option<Rgb<u8>> {
    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for p in pixels {
        for c in 0..3 {
            sum[c] += p.0[c] as u64;
        }
        count += 1;
    }
    (count > 0).then(|| Rgb(sum.map(|s| ((s + count / 2) / count) as u8)))
}

const THRESHOLD_RADIUS: u32 = 5;
const THRESHOLD_OFFSET: f64 = 2.0;

/// Blend 70% of the page with 30% of a locally thresholded copy.
///
/// A pixel is ink when it is more than 2 levels darker than the mean of the
/// 11x11 block around it.
pub fn blend_adaptive_threshold(image: &DynamicImage) -> DynamicImage {
    let rgb = image.to_rgb8();
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();
    let integral = IntegralImage::new(&gray);

    let mut out = RgbImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let (x0, y0) = (x.saturating_sub(THRESHOLD_RADIUS), y.saturating_sub(THRESHOLD_RADIUS));
        let (x1, y1) = ((x + THRESHOLD_RADIUS + 1).min(w), (y + THRESHOLD_RADIUS + 1).min(h));
        let (local_mean, _) = integral.stats(x0, y0, x1, y1);
        let value = gray.get_pixel(x, y).0[0] as f64;
        let binary: f32 = if value > local_mean - THRESHOLD_OFFSET { 255.0 } else { 0.0 };
        let src = rgb.get_pixel(x, y);
        for c in 0..3 {
            pixel.0[c] = (0.7 * src.0[c] as f32 + 0.3 * binary).round().clamp(0.0, 255.0) as u8;
        }
    }
    DynamicImage::ImageRgb8(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{noise_variance, std_dev};
    use crate::testing::cream_page;
    use image::{GrayImage, Luma};
    use imageproc::drawing::draw_polygon_mut;
    use imageproc::point::Point as PixelPoint;

    fn gray_page(w: u32, h: u32, f: impl Fn(u32, u32) -> u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| Luma([f(x, y)])))
    }

    /// Corners are ordered regardless of the order they arrive in.
    #[test]
    fn corners_are_ordered() {
        let shuffled = [
            Point::new(300.0, 310.0),
            Point::new(10.0, 20.0),
            Point::new(20.0, 290.0),
            Point::new(280.0, 15.0),
        ];
        let [tl, tr, br, bl] = order_corners(&shuffled);
        assert_eq!(tl, Point::new(10.0, 20.0));
        assert_eq!(tr, Point::new(280.0, 15.0));
        assert_eq!(br, Point::new(300.0, 310.0));
        assert_eq!(bl, Point::new(20.0, 290.0));
    }

    /// A bright trapezoid is warped to a rectangle filled with page colour.
    #[test]
    fn rectify_trapezoid() {
        let mut gray = GrayImage::from_pixel(400, 400, Luma([30u8]));
        let quad = [
            PixelPoint::new(100, 50),
            PixelPoint::new(300, 50),
            PixelPoint::new(360, 350),
            PixelPoint::new(40, 350),
        ];
        draw_polygon_mut(&mut gray, &quad, Luma([220u8]));
        let corners = quad.map(|p| Point::new(p.x as f32, p.y as f32));

        let out = perspective_rectify(&DynamicImage::ImageLuma8(gray), &corners).to_rgb8();
        // Top edge 200, bottom edge 320 → width 320; sides ≈ 306.
        assert_eq!(out.width(), 320);
        assert!((out.height() as i32 - 306).abs() <= 1, "height {}", out.height());
        let centre = out.get_pixel(out.width() / 2, out.height() / 2);
        assert!(centre.0[0] > 200, "centre {:?}", centre);
    }

    /// The quad's right and bottom edges land on the last output column and row.
    #[test]
    fn rectify_maps_edges_onto_last_pixel() {
        let mut gray = GrayImage::from_pixel(130, 80, Luma([255u8]));
        for y in 10..=60 {
            gray.put_pixel(10, y, Luma([0]));
            gray.put_pixel(110, y, Luma([0]));
        }
        for x in 10..=110 {
            gray.put_pixel(x, 60, Luma([0]));
        }
        let corners = [
            Point::new(10.0, 10.0),
            Point::new(110.0, 10.0),
            Point::new(110.0, 60.0),
            Point::new(10.0, 60.0),
        ];

        let out = perspective_rectify(&DynamicImage::ImageLuma8(gray), &corners).to_rgb8();
        assert_eq!(out.dimensions(), (100, 50));
        assert!(out.get_pixel(0, 25).0[0] < 60, "left {:?}", out.get_pixel(0, 25));
        assert!(out.get_pixel(99, 25).0[0] < 60, "right {:?}", out.get_pixel(99, 25));
        assert!(out.get_pixel(50, 49).0[0] < 60, "bottom {:?}", out.get_pixel(50, 49));
        assert!(out.get_pixel(50, 25).0[0] > 200);
    }

    /// Collinear corners leave the image untouched.
    #[test]
    fn rectify_degenerate_corners() {
        let page = gray_page(50, 40, |_, _| 128);
        let corners = [Point::new(5.0, 5.0); 4];
        let out = perspective_rectify(&page, &corners);
        assert_eq!((out.width(), out.height()), (50, 40));
    }

    /// Rotation grows the canvas and fills the new corners with white.
    #[test]
    fn deskew_expands_canvas() {
        let page = gray_page(200, 100, |_, _| 90);
        let out = deskew(&page, 10.0).to_rgb8();
        assert!(out.width() > 200 && out.height() > 100);
        assert_eq!(out.get_pixel(0, 0), &WHITE);
        let centre = out.get_pixel(out.width() / 2, out.height() / 2);
        assert_eq!(centre.0[0], 90);
    }

    /// A zero angle keeps the dimensions.
    #[test]
    fn deskew_zero_is_identity_size() {
        let page = gray_page(64, 48, |x, y| ((x + y) % 256) as u8);
        let out = deskew(&page, 0.0);
        assert_eq!((out.width(), out.height()), (64, 48));
    }

    /// Equalisation stretches a low-contrast texture.
    #[test]
    fn remove_shadows_stretches_contrast() {
        let page = gray_page(128, 128, |x, y| 100 + ((x + y) % 16) as u8);
        let spread = |img: &DynamicImage| {
            let values: Vec<f64> = img.to_luma8().pixels().map(|p| p.0[0] as f64).collect();
            std_dev(&values)
        };
        let out = remove_shadows(&page);
        assert!(spread(&out) > spread(&page) * 1.5);
        let faded = enhance_contrast(&page, true);
        assert!(spread(&faded) >= spread(&out));
    }

    /// Cream paper comes back below the yellowing threshold.
    #[test]
    fn yellowing_is_corrected() {
        let out = correct_yellowing(&cream_page(32, 32));
        let lab = LabPlanes::from_rgb(&out.to_rgb8());
        assert!(lab.mean_b() <= 134.0, "b* mean {}", lab.mean_b());
    }

    /// Neutral pages pass through colour correction unchanged.
    #[test]
    fn neutral_page_untouched_by_yellowing() {
        let page = gray_page(16, 16, |_, _| 180);
        let out = correct_yellowing(&page).to_rgb8();
        for p in out.pixels() {
            assert!(p.0.iter().all(|&c| (c as i32 - 180).abs() <= 1), "{:?}", p);
        }
    }

    /// Sharpening leaves flat areas alone and steepens edges.
    #[test]
    fn sharpen_levels() {
        let flat = gray_page(40, 40, |_, _| 120);
        for level in [SharpenLevel::High, SharpenLevel::Moderate, SharpenLevel::Light] {
            let out = sharpen(&flat, level).to_rgb8();
            assert!(out.pixels().all(|p| p.0[0].abs_diff(120) <= 1), "{:?}", level);
        }

        let step = gray_page(40, 40, |x, _| if x < 20 { 80 } else { 160 });
        let out = sharpen(&step, SharpenLevel::High).to_rgb8();
        assert!(out.get_pixel(18, 20).0[0] < 80);
        assert!(out.get_pixel(21, 20).0[0] > 160);
    }

    fn area(kind: DamageKind, severity: DamageSeverity, x: f32, y: f32) -> DamageArea {
        DamageArea {
            kind,
            severity,
            location: None,
            x_percent: x,
            y_percent: y,
        }
    }

    /// Each treated area is labelled with its pixel centre; unknown types are skipped.
    #[test]
    fn targeted_repair_labels_areas() {
        let page = gray_page(400, 300, |x, y| (100 + (x + y) % 60) as u8);
        let areas = [
            area(DamageKind::WaterStain, DamageSeverity::Critical, 50.0, 50.0),
            area(DamageKind::Foxing, DamageSeverity::Minor, 10.0, 10.0),
            area(DamageKind::Other, DamageSeverity::Minor, 50.0, 50.0),
            area(DamageKind::Tear, DamageSeverity::Moderate, 120.0, 100.0),
        ];
        let (out, labels) = targeted_repair(&page, &areas);
        assert_eq!((out.width(), out.height()), (400, 300));
        assert_eq!(
            labels,
            vec![
                "Water stain treated at (200, 150)",
                "Foxing removed at (40, 30)",
                "Tear edges smoothed at (399, 299)",
            ]
        );
    }

    /// Pixels outside every repair square are left alone.
    #[test]
    fn targeted_repair_is_local() {
        let page = gray_page(400, 300, |x, y| (100 + (x * 7 + y * 3) % 90) as u8);
        let areas = [area(DamageKind::Fading, DamageSeverity::Minor, 10.0, 10.0)];
        let (out, labels) = targeted_repair(&page, &areas);
        assert_eq!(labels.len(), 1);
        let (before, after) = (page.to_rgb8(), out.to_rgb8());
        for (x, y) in [(200, 200), (399, 0), (0, 299), (71, 61)] {
            assert_eq!(before.get_pixel(x, y), after.get_pixel(x, y), "({x}, {y})");
        }
    }

    /// Brown spots are filled with the surrounding paper colour.
    #[test]
    fn foxing_spots_are_filled() {
        let paper = Rgb([245, 240, 230]);
        let mut rgb = RgbImage::from_pixel(200, 200, paper);
        for y in 99..102 {
            for x in 99..102 {
                rgb.put_pixel(x, y, Rgb([150, 100, 50]));
            }
        }
        let areas = [area(DamageKind::Foxing, DamageSeverity::Minor, 50.0, 50.0)];
        let (out, _) = targeted_repair(&DynamicImage::ImageRgb8(rgb), &areas);
        assert_eq!(out.to_rgb8().get_pixel(100, 100), &paper);
    }

    /// Ink darkens against its neighbourhood; plain paper brightens.
    #[test]
    fn threshold_blend_separates_ink() {
        let page = gray_page(60, 60, |x, _| if (28..32).contains(&x) { 100 } else { 230 });
        let out = blend_adaptive_threshold(&page).to_rgb8();
        assert!(out.get_pixel(30, 30).0[0] < 100);
        assert!(out.get_pixel(5, 30).0[0] >= 230);
    }

    #[test]
    fn reduce_yellow_lowers_b() {
        let page = cream_page(16, 16);
        let before = LabPlanes::from_rgb(&page.to_rgb8()).mean_b();
        let after = LabPlanes::from_rgb(&reduce_yellow(&page, 10.0).to_rgb8()).mean_b();
        assert!(before - after > 5.0, "before {before}, after {after}");
    }

    /// Grain is averaged away.
    #[test]
    fn denoise_reduces_noise() {
        let noisy = gray_page(64, 64, |x, y| {
            let hash = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663))
                .wrapping_mul(2_654_435_761)
                >> 16;
            (108 + hash % 41) as u8
        });
        let before = noise_variance(&noisy.to_luma8());
        let after = noise_variance(&denoise(&noisy, 12.0).to_luma8());
        assert!(after < before / 2.0, "before {before}, after {after}");
    }
}
