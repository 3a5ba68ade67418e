// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Layout analysis — header/footer bands, column gutters, ruled tables,
// embedded pictures, and heading/paragraph blocks, all from projections of
// an Otsu ink mask.

use image::{DynamicImage, GrayImage};
use imageproc::contours::{BorderType, find_contours};
use imageproc::edges::canny;
use tracing::{debug, instrument};

use folio_core::{BlockKind, LayoutProfile, Region, TextBlock};

use crate::raster::{IntegralImage, ink_mask};
use crate::segments::{SegmentOptions, detect_segments};

/// Minimum ink density for a header or footer band.
const BAND_DENSITY: f64 = 0.02;
/// Gap columns closer than this (pixels) belong to the same gutter.
const GAP_JOIN: u32 = 5;
/// Text blocks must span more rows than this.
const MIN_BLOCK_ROWS: u32 = 5;

/// Detect the structure of a (restored) page.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
pub fn analyze_layout(image: &DynamicImage) -> LayoutProfile {
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return LayoutProfile::default();
    }

    let mask = ink_mask(&gray);
    let ink = Projections::new(&mask);

    let (has_header, has_footer) = header_footer(&ink, h);
    let layout = LayoutProfile {
        has_header,
        has_footer,
        estimated_columns: estimate_columns(&ink.columns, w),
        has_table: detect_table(&gray),
        image_regions: image_regions(&gray, &mask),
        text_blocks: text_blocks(&mask, &ink.rows),
    };

    debug!(
        columns = layout.estimated_columns,
        table = layout.has_table,
        images = layout.image_regions.len(),
        blocks = layout.text_blocks.len(),
        "Layout analysed"
    );
    layout
}

/// Ink-pixel counts per row and per column.
struct Projections {
    rows: Vec<u32>,
    columns: Vec<u32>,
    width: u32,
}

impl Projections {
    fn new(mask: &GrayImage) -> Self {
        let (w, h) = mask.dimensions();
        let mut rows = vec![0u32; h as usize];
        let mut columns = vec![0u32; w as usize];
        for (x, y, p) in mask.enumerate_pixels() {
            if p.0[0] > 0 {
                rows[y as usize] += 1;
                columns[x as usize] += 1;
            }
        }
        Self {
            rows,
            columns,
            width: w,
        }
    }

    /// Ink density of rows `y0..y1`.
    fn band_density(&self, y0: usize, y1: usize) -> f64 {
        let y1 = y1.min(self.rows.len());
        if y0 >= y1 {
            return 0.0;
        }
        let ink: u64 = self.rows[y0..y1].iter().map(|&v| v as u64).sum();
        ink as f64 / ((y1 - y0) as f64 * self.width as f64)
    }
}

fn header_footer(ink: &Projections, h: u32) -> (bool, bool) {
    let at = |fraction: f64| (h as f64 * fraction) as usize;
    let top = ink.band_density(0, at(0.12));
    let main = ink.band_density(at(0.15), at(0.85));
    let bottom = ink.band_density(at(0.88), h as usize);

    let has_header = top > BAND_DENSITY && (top - main).abs() > BAND_DENSITY;
    let has_footer = bottom > BAND_DENSITY && (bottom - main).abs() > BAND_DENSITY;
    (has_header, has_footer)
}

/// Count interior gutters in the vertical projection: none → 1, one → 2,
/// two or more → 3.
fn estimate_columns(columns: &[u32], w: u32) -> u8 {
    let max = columns.iter().copied().max().unwrap_or(0);
    let threshold = max as f64 * 0.1;

    let mut groups: Vec<Vec<u32>> = Vec::new();
    for (x, &count) in columns.iter().enumerate() {
        if (count as f64) >= threshold {
            continue;
        }
        let x = x as u32;
        match groups.last_mut() {
            Some(group) if group.last().is_some_and(|&last| x - last <= GAP_JOIN) => group.push(x),
            _ => groups.push(vec![x]),
        }
    }

    let min_width = w as f64 * 0.02;
    let interior = groups
        .iter()
        .filter(|g| g.len() as f64 > min_width)
        .filter(|g| {
            let centre = g.iter().map(|&x| x as f64).sum::<f64>() / g.len() as f64;
            centre > w as f64 * 0.2 && centre < w as f64 * 0.8
        })
        .count();

    match interior {
        0 => 1,
        1 => 2,
        _ => 3,
    }
}

/// Ruled tables: several long horizontal and vertical rules.
fn detect_table(gray: &GrayImage) -> bool {
    let edges = canny(gray, 50.0, 150.0);
    let segments = detect_segments(
        &edges,
        SegmentOptions {
            vote_threshold: 80,
            min_length: gray.width() as f32 / 4.0,
            max_gap: 10.0,
        },
    );
    let horizontal = segments
        .iter()
        .filter(|s| s.angle_degrees.abs() < 10.0)
        .count();
    let vertical = segments
        .iter()
        .filter(|s| s.angle_degrees.abs() > 80.0 && s.angle_degrees.abs() < 100.0)
        .count();
    horizontal > 3 && vertical > 2
}

/// Large, roughly square ink blobs with strong tonal variation (stamps,
/// seals, photographs).
fn image_regions(gray: &GrayImage, mask: &GrayImage) -> Vec<Region> {
    let (w, h) = gray.dimensions();
    let page_area = w as f64 * h as f64;
    let integral = IntegralImage::new(gray);

    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|c| {
            let min_x = c.points.iter().map(|p| p.x).min()?;
            let max_x = c.points.iter().map(|p| p.x).max()?;
            let min_y = c.points.iter().map(|p| p.y).min()?;
            let max_y = c.points.iter().map(|p| p.y).max()?;
            Some((
                min_x.max(0) as u32,
                min_y.max(0) as u32,
                (max_x - min_x + 1) as u32,
                (max_y - min_y + 1) as u32,
            ))
        })
        .filter(|&(_, _, bw, bh)| {
            let aspect = bw as f64 / bh.max(1) as f64;
            bw as f64 * bh as f64 > page_area * 0.01 && (0.33..=3.0).contains(&aspect)
        })
        .filter(|&(x, y, bw, bh)| integral.stats(x, y, x + bw, y + bh).1.sqrt() > 40.0)
        .map(|(x, y, bw, bh)| percent_region(x, y, bw, bh, w, h))
        .collect()
}

/// Runs of inked rows become heading (short) or paragraph (tall) blocks.
fn text_blocks(mask: &GrayImage, rows: &[u32]) -> Vec<TextBlock> {
    let (w, h) = mask.dimensions();
    let max = rows.iter().copied().max().unwrap_or(0);
    let threshold = max as f64 * 0.05;

    let mut runs = Vec::new();
    let mut start: Option<u32> = None;
    for (y, &count) in rows.iter().enumerate() {
        let inked = count as f64 > threshold;
        match (inked, start) {
            (true, None) => start = Some(y as u32),
            (false, Some(s)) => {
                runs.push((s, y as u32));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, h));
    }

    runs.into_iter()
        .filter(|&(s, e)| e - s > MIN_BLOCK_ROWS)
        .filter_map(|(s, e)| {
            let (x0, x1) = ink_span(mask, s, e)?;
            let kind = if ((e - s) as f64) < h as f64 * 0.04 {
                BlockKind::Heading
            } else {
                BlockKind::Paragraph
            };
            Some(TextBlock {
                kind,
                region: percent_region(x0, s, x1 - x0, e - s, w, h),
            })
        })
        .collect()
}

/// Leftmost and one-past-rightmost inked column within rows `y0..y1`.
fn ink_span(mask: &GrayImage, y0: u32, y1: u32) -> Option<(u32, u32)> {
    let mut span: Option<(u32, u32)> = None;
    for y in y0..y1 {
        for x in 0..mask.width() {
            if mask.get_pixel(x, y).0[0] > 0 {
                span = Some(match span {
                    Some((lo, hi)) => (lo.min(x), hi.max(x + 1)),
                    None => (x, x + 1),
                });
            }
        }
    }
    span
}

fn percent_region(x: u32, y: u32, bw: u32, bh: u32, w: u32, h: u32) -> Region {
    Region {
        x: x as f32 / w as f32 * 100.0,
        y: y as f32 / h as f32 * 100.0,
        width: bw as f32 / w as f32 * 100.0,
        height: bh as f32 / h as f32 * 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn white(w: u32, h: u32) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([255u8]))
    }

    fn ink(img: &mut GrayImage, x: i32, y: i32, w: u32, h: u32) {
        draw_filled_rect_mut(img, Rect::at(x, y).of_size(w, h), Luma([0u8]));
    }

    /// Striped text lines between `x0` and `x0 + width`.
    fn text_column(img: &mut GrayImage, x0: i32, width: u32, y0: i32, y1: i32) {
        let mut y = y0;
        while y + 6 <= y1 {
            ink(img, x0, y, width, 6);
            y += 12;
        }
    }

    /// A blank page is a single column with no structure.
    #[test]
    fn blank_page_is_plain() {
        let layout = analyze_layout(&DynamicImage::ImageLuma8(white(300, 400)));
        assert_eq!(layout.estimated_columns, 1);
        assert!(!layout.has_header && !layout.has_footer && !layout.has_table);
        assert!(layout.image_regions.is_empty());
    }

    /// Dense letterhead over sparse body text reads as a header.
    #[test]
    fn dense_top_band_is_header() {
        let mut page = white(400, 500);
        ink(&mut page, 20, 10, 360, 35);
        for y in (100..420).step_by(40) {
            ink(&mut page, 40, y, 300, 3);
        }
        let layout = analyze_layout(&DynamicImage::ImageLuma8(page));
        assert!(layout.has_header);
        assert!(!layout.has_footer);
    }

    /// A clear central gutter means two columns.
    #[test]
    fn two_columns() {
        let mut page = white(600, 400);
        text_column(&mut page, 60, 210, 40, 360);
        text_column(&mut page, 330, 210, 40, 360);
        let layout = analyze_layout(&DynamicImage::ImageLuma8(page));
        assert_eq!(layout.estimated_columns, 2);
    }

    /// Two gutters mean three columns.
    #[test]
    fn three_columns() {
        let mut page = white(900, 400);
        for x0 in [60, 340, 620] {
            text_column(&mut page, x0, 220, 40, 360);
        }
        let layout = analyze_layout(&DynamicImage::ImageLuma8(page));
        assert_eq!(layout.estimated_columns, 3);
    }

    /// A ruled grid is recognised as a table.
    #[test]
    fn ruled_grid_is_table() {
        let mut page = white(400, 400);
        for y in [50, 110, 170, 230, 290, 350] {
            ink(&mut page, 50, y, 300, 2);
        }
        for x in [50, 150, 250, 348] {
            ink(&mut page, x, 50, 2, 302);
        }
        let layout = analyze_layout(&DynamicImage::ImageLuma8(page));
        assert!(layout.has_table);
    }

    /// A toned, square picture becomes an image region; flat text bars do not.
    #[test]
    fn toned_square_is_image_region() {
        let mut page = white(400, 400);
        for y in 100..200 {
            for x in 150..250 {
                page.put_pixel(x, y, Luma([((x - 150) * 160 / 100) as u8]));
            }
        }
        ink(&mut page, 40, 300, 320, 8);

        let layout = analyze_layout(&DynamicImage::ImageLuma8(page));
        assert_eq!(layout.image_regions.len(), 1, "{:?}", layout.image_regions);
        let region = layout.image_regions[0];
        assert!((region.x - 37.5).abs() < 1.0);
        assert!((region.width - 25.0).abs() < 1.5);
    }

    /// Short runs are headings, tall runs are paragraphs, with ink extents.
    #[test]
    fn headings_and_paragraphs() {
        let mut page = white(500, 400);
        ink(&mut page, 100, 40, 300, 10);
        ink(&mut page, 50, 100, 400, 60);
        let layout = analyze_layout(&DynamicImage::ImageLuma8(page));
        assert_eq!(layout.heading_count(), 1);
        assert_eq!(layout.paragraph_count(), 1);

        let heading = layout.text_blocks[0];
        assert_eq!(heading.kind, BlockKind::Heading);
        assert!((heading.region.x - 20.0).abs() < 0.5);
        assert!((heading.region.width - 60.0).abs() < 0.5);
        assert!((heading.region.y - 10.0).abs() < 0.5);
    }
}
