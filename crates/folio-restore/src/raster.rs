// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raster helpers shared by the detector, the operators, and the layout
// analyzer — L*a*b* conversion, contrast-limited equalisation, summed-area
// tables, and the focus/noise statistics.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::filter::laplacian_filter;

// -- L*a*b* -------------------------------------------------------------------

/// Neutral chroma on the 8-bit L*a*b* scale.
pub const NEUTRAL_CHROMA: f64 = 128.0;

const WHITE_X: f32 = 0.950456;
const WHITE_Z: f32 = 1.088754;
const LAB_EPSILON: f32 = 0.008856;

/// L*a*b* planes on the 8-bit scale: `l` in 0-255, `a` and `b` centred on 128.
pub struct LabPlanes {
    width: u32,
    height: u32,
    pub l: Vec<f32>,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

impl LabPlanes {
    pub fn from_rgb(rgb: &RgbImage) -> Self {
        let linear = srgb_to_linear_table();
        let len = (rgb.width() * rgb.height()) as usize;
        let mut l = Vec::with_capacity(len);
        let mut a = Vec::with_capacity(len);
        let mut b = Vec::with_capacity(len);

        for pixel in rgb.pixels() {
            let [r, g, bl] = pixel.0;
            let (lv, av, bv) = linear_rgb_to_lab(
                linear[r as usize],
                linear[g as usize],
                linear[bl as usize],
            );
            l.push(lv);
            a.push(av);
            b.push(bv);
        }

        Self {
            width: rgb.width(),
            height: rgb.height(),
            l,
            a,
            b,
        }
    }

    pub fn to_rgb(&self) -> RgbImage {
        let mut out = RgbImage::new(self.width, self.height);
        for (i, pixel) in out.pixels_mut().enumerate() {
            *pixel = lab_to_rgb(self.l[i], self.a[i], self.b[i]);
        }
        out
    }

    pub fn mean_a(&self) -> f64 {
        mean(self.a.iter().map(|&v| v as f64))
    }

    pub fn mean_b(&self) -> f64 {
        mean(self.b.iter().map(|&v| v as f64))
    }

    /// The lightness plane as an 8-bit image.
    pub fn lightness(&self) -> GrayImage {
        let data = self.l.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect();
        GrayImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    /// Replace the lightness plane. Dimensions must match.
    pub fn set_lightness(&mut self, gray: &GrayImage) {
        for (dst, src) in self.l.iter_mut().zip(gray.pixels()) {
            *dst = src.0[0] as f32;
        }
    }
}

fn srgb_to_linear_table() -> [f32; 256] {
    let mut table = [0f32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let c = i as f32 / 255.0;
        *slot = if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        };
    }
    table
}

fn linear_to_srgb(c: f32) -> u8 {
    let c = c.clamp(0.0, 1.0);
    let v = if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f32) -> f32 {
    let cube = f * f * f;
    if cube > LAB_EPSILON {
        cube
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

fn linear_rgb_to_lab(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / WHITE_X;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / WHITE_Z;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > LAB_EPSILON {
        116.0 * fy - 16.0
    } else {
        903.3 * y
    };

    (
        l * 255.0 / 100.0,
        500.0 * (fx - fy) + 128.0,
        200.0 * (fy - fz) + 128.0,
    )
}

fn lab_to_rgb(l8: f32, a8: f32, b8: f32) -> Rgb<u8> {
    let l = l8 * 100.0 / 255.0;
    let fy = (l + 16.0) / 116.0;
    let fx = fy + (a8 - 128.0) / 500.0;
    let fz = fy - (b8 - 128.0) / 200.0;

    let x = lab_f_inv(fx) * WHITE_X;
    let y = if l > 903.3 * LAB_EPSILON {
        fy * fy * fy
    } else {
        l / 903.3
    };
    let z = lab_f_inv(fz) * WHITE_Z;

    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_992 * y + 0.041_556 * z;
    let b = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;

    Rgb([linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b)])
}

// -- Contrast-limited adaptive equalisation ------------------------------------

/// Contrast-limited adaptive histogram equalisation on a single channel.
///
/// The image is split into a `grid` x `grid` set of tiles. Each tile's
/// histogram is clipped at `clip_limit` times the uniform bin height, the
/// excess is spread over all bins, and the resulting lookup tables are
/// bilinearly blended between neighbouring tile centres.
pub fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let tiles_x = grid.clamp(1, w);
    let tiles_y = grid.clamp(1, h);

    let bounds_x: Vec<u32> = (0..=tiles_x).map(|i| i * w / tiles_x).collect();
    let bounds_y: Vec<u32> = (0..=tiles_y).map(|i| i * h / tiles_y).collect();

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x0, x1) = (bounds_x[tx as usize], bounds_x[tx as usize + 1]);
            let (y0, y1) = (bounds_y[ty as usize], bounds_y[ty as usize + 1]);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y).0[0] as usize] += 1;
                }
            }

            let area = (x1 - x0) * (y1 - y0);
            let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for count in hist.iter_mut() {
                if *count > limit {
                    excess += *count - limit;
                    *count = limit;
                }
            }
            let bonus = excess / 256;
            let residual = excess % 256;
            for (i, count) in hist.iter_mut().enumerate() {
                *count += bonus + u32::from((i as u32) < residual);
            }

            let scale = 255.0 / area as f32;
            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u32;
            for (i, &count) in hist.iter().enumerate() {
                cdf += count;
                lut[i] = (cdf as f32 * scale).round().min(255.0) as u8;
            }
        }
    }

    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;
    let neighbours = |pos: f32, tile: f32, count: u32| -> (usize, usize, f32) {
        let f = (pos + 0.5) / tile - 0.5;
        let lo = (f.floor() as i64).clamp(0, count as i64 - 1) as usize;
        let hi = (lo + 1).min(count as usize - 1);
        let weight = (f - lo as f32).clamp(0.0, 1.0);
        (lo, hi, weight)
    };

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let (ty0, ty1, wy) = neighbours(y as f32, tile_h, tiles_y);
        for x in 0..w {
            let (tx0, tx1, wx) = neighbours(x as f32, tile_w, tiles_x);
            let v = gray.get_pixel(x, y).0[0] as usize;
            let lut = |ty: usize, tx: usize| luts[ty * tiles_x as usize + tx][v] as f32;

            let top = (1.0 - wx) * lut(ty0, tx0) + wx * lut(ty0, tx1);
            let bottom = (1.0 - wx) * lut(ty1, tx0) + wx * lut(ty1, tx1);
            let value = (1.0 - wy) * top + wy * bottom;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

// -- Summed-area tables -------------------------------------------------------

/// Summed-area tables of pixel values and squared pixel values.
///
/// Both tables have dimensions `(width+1) x (height+1)` with a zero-padded
/// border, so `sum[y * stride + x]` is the sum over `[0, x) x [0, y)`.
pub struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sum_sq: Vec<u64>,
}

impl IntegralImage {
    pub fn new(gray: &GrayImage) -> Self {
        let (w, h) = gray.dimensions();
        let stride = (w + 1) as usize;
        let mut sum = vec![0u64; stride * (h + 1) as usize];
        let mut sum_sq = vec![0u64; stride * (h + 1) as usize];

        for y in 0..h {
            let mut row_sum: u64 = 0;
            let mut row_sq: u64 = 0;
            for x in 0..w {
                let v = gray.get_pixel(x, y).0[0] as u64;
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) as usize * stride + (x + 1) as usize;
                let above = y as usize * stride + (x + 1) as usize;
                sum[idx] = row_sum + sum[above];
                sum_sq[idx] = row_sq + sum_sq[above];
            }
        }

        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    fn rect_total(&self, table: &[u64], x0: u32, y0: u32, x1: u32, y1: u32) -> f64 {
        let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);
        table[y1 * self.stride + x1] as f64 - table[y0 * self.stride + x1] as f64
            - table[y1 * self.stride + x0] as f64
            + table[y0 * self.stride + x0] as f64
    }

    /// Mean and population variance over `[x0, x1) x [y0, y1)`.
    pub fn stats(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> (f64, f64) {
        let area = (x1.saturating_sub(x0) as f64) * (y1.saturating_sub(y0) as f64);
        if area == 0.0 {
            return (0.0, 0.0);
        }
        let mean = self.rect_total(&self.sum, x0, y0, x1, y1) / area;
        let mean_sq = self.rect_total(&self.sum_sq, x0, y0, x1, y1) / area;
        (mean, (mean_sq - mean * mean).max(0.0))
    }
}

// -- Statistics ---------------------------------------------------------------

pub fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values.iter().copied());
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Median of an unsorted slice (mean of the two middle values for even length).
pub fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Variance of the 4-neighbour Laplacian response — high for crisp edges,
/// low for blurred or faded pages.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let response = laplacian_filter(gray);
    let values: Vec<f64> = response.pixels().map(|p| p.0[0] as f64).collect();
    let m = mean(values.iter().copied());
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Estimate sensor/grain noise as the median variance among the smoothest
/// quarter of 8x8 blocks. Text and edges land in the rougher blocks and do
/// not contribute.
pub fn noise_variance(gray: &GrayImage) -> f64 {
    const BLOCK: u32 = 8;
    let (w, h) = gray.dimensions();
    if w < BLOCK || h < BLOCK {
        return 0.0;
    }

    let integral = IntegralImage::new(gray);
    let mut variances: Vec<f32> = Vec::new();
    let mut y = 0;
    while y + BLOCK <= h {
        let mut x = 0;
        while x + BLOCK <= w {
            variances.push(integral.stats(x, y, x + BLOCK, y + BLOCK).1 as f32);
            x += BLOCK;
        }
        y += BLOCK;
    }

    variances.sort_by(|a, b| a.total_cmp(b));
    let quarter = (variances.len() / 4).max(1);
    median(&variances[..quarter]) as f64
}

/// Global Otsu binarisation with ink as foreground (255) and paper as 0.
/// A page of a single tone has no ink.
pub fn ink_mask(gray: &GrayImage) -> GrayImage {
    let mut mask = GrayImage::new(gray.width(), gray.height());
    let mut tones = gray.pixels().map(|p| p.0[0]);
    let first = tones.next();
    if tones.all(|t| Some(t) == first) {
        return mask;
    }

    let level = otsu_level(gray);
    for (x, y, pixel) in gray.enumerate_pixels() {
        if pixel.0[0] <= level {
            mask.put_pixel(x, y, Luma([255u8]));
        }
    }
    mask
}
