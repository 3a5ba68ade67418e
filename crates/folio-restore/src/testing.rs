// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Synthetic pages for unit tests.

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

const BAR_HEIGHT: f32 = 10.0;
const BAR_PITCH: u32 = 30;

/// White page with level black "text lines" and clean margins.
pub fn clean_page(width: u32, height: u32) -> DynamicImage {
    skewed_page(width, height, 0.0)
}

/// Like [`clean_page`] but every line is rotated by `degrees` about the page
/// centre (positive slopes down to the right).
pub fn skewed_page(width: u32, height: u32, degrees: f32) -> DynamicImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let (sin, cos) = degrees.to_radians().sin_cos();
    let rotate = |x: f32, y: f32| {
        let (dx, dy) = (x - cx, y - cy);
        Point::new(
            (cx + dx * cos - dy * sin).round() as i32,
            (cy + dx * sin + dy * cos).round() as i32,
        )
    };

    let (left, right) = (width as f32 * 0.1, width as f32 * 0.9);
    let mut top = height / 10;
    while top + BAR_PITCH < height - height / 10 {
        let y0 = top as f32;
        let y1 = y0 + BAR_HEIGHT;
        let bar = [
            rotate(left, y0),
            rotate(right, y0),
            rotate(right, y1),
            rotate(left, y1),
        ];
        draw_polygon_mut(&mut img, &bar, Rgb([0, 0, 0]));
        top += BAR_PITCH;
    }
    DynamicImage::ImageRgb8(img)
}

/// Plain aged cream paper.
pub fn cream_page(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([240, 225, 180])))
}
