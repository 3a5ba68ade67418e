// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Restoration pipeline — applies the operators a profile calls for, in a
// fixed order, and records what was done.

use image::DynamicImage;
use tracing::{info, instrument};

use folio_core::{BlurLevel, DamageAnalysis, DocumentProfile};

use crate::operators::{
    DENOISE_STRENGTH, SharpenLevel, blend_adaptive_threshold, correct_yellowing, denoise, deskew,
    enhance_contrast, enhance_detail, perspective_rectify, reduce_yellow, remove_shadows, sharpen,
    targeted_repair,
};
use crate::raster::noise_variance;

/// Skew below this magnitude (degrees) is left alone.
pub const SKEW_CORRECTION_THRESHOLD: f32 = 1.0;
/// Noise variance above which the page is denoised.
pub const DENOISE_THRESHOLD: f64 = 150.0;
/// Legibility assumed when the damage analysis leaves it out.
pub const DEFAULT_LEGIBILITY: f64 = 70.0;
/// Below this legibility the text is reinforced with a threshold blend.
pub const LEGIBILITY_FLOOR: f64 = 60.0;
/// Reported yellowing above which b* is pulled down further.
pub const DEEP_YELLOWING_THRESHOLD: f64 = 50.0;
/// Recorded when no operator fired.
pub const MINIMAL_PROCESSING: &str = "minimal processing";

/// The restored page and the ordered list of operations applied to it.
#[derive(Debug, Clone)]
pub struct RestorationResult {
    pub enhanced_image: DynamicImage,
    pub operations_applied: Vec<String>,
}

impl RestorationResult {
    /// Whether any operator actually ran.
    pub fn was_modified(&self) -> bool {
        self.operations_applied != [MINIMAL_PROCESSING]
    }
}

/// Accumulates operator output without copying the input until something fires.
struct Steps<'a> {
    original: &'a DynamicImage,
    current: Option<DynamicImage>,
    operations: Vec<String>,
}

impl<'a> Steps<'a> {
    fn new(original: &'a DynamicImage) -> Self {
        Self {
            original,
            current: None,
            operations: Vec::new(),
        }
    }

    fn image(&self) -> &DynamicImage {
        self.current.as_ref().unwrap_or(self.original)
    }

    fn apply(&mut self, label: String, op: impl FnOnce(&DynamicImage) -> DynamicImage) {
        let next = op(self.image());
        self.current = Some(next);
        self.operations.push(label);
    }

    fn finish(mut self) -> RestorationResult {
        let enhanced_image = match self.current {
            Some(img) => img,
            None => {
                self.operations.push(MINIMAL_PROCESSING.to_string());
                self.original.clone()
            }
        };
        RestorationResult {
            enhanced_image,
            operations_applied: self.operations,
        }
    }
}

/// Run the gated operators over `image` as described by `profile`.
///
/// Order: perspective, deskew, shadows, yellowing, contrast, sharpen, denoise.
/// When nothing fires the input is returned as-is with the single entry
/// `"minimal processing"`.
#[instrument(skip_all, fields(issues = profile.quality_issues.len()))]
pub fn restore(image: &DynamicImage, profile: &DocumentProfile) -> RestorationResult {
    let mut steps = Steps::new(image);

    // Step 1: Perspective.
    if profile.has_perspective_distortion {
        if let Some(corners) = profile.perspective_corners {
            steps.apply(
                "Perspective corrected (4-point transform)".to_string(),
                |img| perspective_rectify(img, &corners),
            );
        }
    }

    // Step 2: Skew.
    if profile.skew_angle.abs() > SKEW_CORRECTION_THRESHOLD {
        let angle = profile.skew_angle;
        steps.apply(format!("Skew corrected ({:.1}° via Hough)", angle), |img| {
            deskew(img, angle)
        });
    }

    // Step 3: Shadows.
    if profile.has_shadows {
        steps.apply("Shadows removed (CLAHE)".to_string(), remove_shadows);
    }

    // Step 4: Yellowing.
    if profile.is_yellowed {
        steps.apply(
            "Yellowing corrected (LAB color balance)".to_string(),
            correct_yellowing,
        );
    }

    // Step 5: Faded ink.
    if profile.is_faded {
        steps.apply("Faded text restored (CLAHE)".to_string(), |img| {
            enhance_contrast(img, true)
        });
    }

    // Step 6: Blur.
    let sharpen_level = match profile.blur_level {
        BlurLevel::High => Some(SharpenLevel::High),
        BlurLevel::Moderate => Some(SharpenLevel::Moderate),
        BlurLevel::Slight | BlurLevel::None => None,
    };
    if let Some(level) = sharpen_level {
        steps.apply(
            format!("Sharpness enhanced ({} unsharp mask)", level.as_str()),
            |img| sharpen(img, level),
        );
    }

    // Step 7: Noise, measured on the image as it stands now. The filter
    // strength tracks the noise so a single pass clears the threshold.
    let noise = noise_variance(&steps.image().to_luma8());
    if noise > DENOISE_THRESHOLD {
        let strength = DENOISE_STRENGTH.max(noise.sqrt() as f32);
        steps.apply("Noise reduction (NLM denoising)".to_string(), |img| {
            denoise(img, strength)
        });
    }

    let result = steps.finish();
    info!(
        operations = result.operations_applied.len(),
        modified = result.was_modified(),
        "Restoration complete"
    );
    result
}

/// Second pass over an already restored page, driven by a vision model's
/// damage analysis.
///
/// Repairs each located area, reinforces text when legibility is reported
/// below 60, pulls b* down by half the reported yellowing over 50, and
/// finishes with a light detail enhancement. The returned operations list
/// only the steps of this pass.
#[instrument(skip_all, fields(areas = analysis.damage_areas.len()))]
pub fn guided_restore(image: &DynamicImage, analysis: &DamageAnalysis) -> RestorationResult {
    let (mut current, mut operations) = targeted_repair(image, &analysis.damage_areas);

    let legibility = analysis.text_quality.legibility.unwrap_or(DEFAULT_LEGIBILITY);
    if legibility < LEGIBILITY_FLOOR {
        current = blend_adaptive_threshold(&current);
        operations.push("Text clarity enhanced (adaptive threshold blend)".to_string());
    }

    if let Some(yellowing) = analysis
        .paper_condition
        .yellowing
        .filter(|&y| y > DEEP_YELLOWING_THRESHOLD)
    {
        let shift = ((yellowing - DEEP_YELLOWING_THRESHOLD) * 0.5).trunc() as f32;
        current = reduce_yellow(&current, shift);
        operations.push(format!("Deep yellowing correction ({yellowing}% detected)"));
    }

    current = enhance_detail(&current);
    operations.push("Detail enhancement (final polish)".to_string());

    info!(operations = operations.len(), "Guided restoration complete");
    RestorationResult {
        enhanced_image: current,
        operations_applied: operations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::analyze;
    use crate::testing::{clean_page, cream_page, skewed_page};
    use image::{GrayImage, Luma};

    /// A clean scan passes through untouched.
    #[test]
    fn clean_scan_gets_minimal_processing() {
        let page = clean_page(1000, 800);
        let profile = analyze(&page);
        assert!(profile.quality_issues.is_empty(), "{:?}", profile.quality_issues);

        let result = restore(&page, &profile);
        assert_eq!(result.operations_applied, vec!["minimal processing"]);
        assert!(!result.was_modified());
        assert_eq!(result.enhanced_image, page);
    }

    /// A profile with no flags never touches the pixels.
    #[test]
    fn empty_profile_is_identity() {
        let page = DynamicImage::ImageLuma8(GrayImage::from_fn(30, 20, |x, y| {
            Luma([((x * 7 + y * 3) % 256) as u8])
        }));
        let result = restore(&page, &DocumentProfile::default());
        assert_eq!(result.operations_applied, vec![MINIMAL_PROCESSING]);
        assert_eq!(result.enhanced_image, page);
    }

    /// A 3.2° skew is corrected and reported with one decimal.
    #[test]
    fn skew_is_corrected_and_labelled() {
        let page = clean_page(400, 300);
        let profile = DocumentProfile {
            skew_angle: 3.2,
            quality_issues: vec!["Document skew: 3.2°".to_string()],
            ..DocumentProfile::default()
        };
        let result = restore(&page, &profile);
        assert_eq!(result.operations_applied.len(), 1);
        assert!(result.operations_applied[0].contains("3.2"));
        assert!(result.enhanced_image.width() > 400);
    }

    /// Skew within the correction tolerance is left alone.
    #[test]
    fn small_skew_is_ignored() {
        let profile = DocumentProfile {
            skew_angle: 0.8,
            ..DocumentProfile::default()
        };
        let result = restore(&clean_page(200, 150), &profile);
        assert!(!result.was_modified());
    }

    /// After deskewing, the page measures as level and deskew does not fire again.
    #[test]
    fn deskew_is_idempotent() {
        let page = skewed_page(800, 600, 3.0);
        let profile = analyze(&page);
        let first = restore(&page, &profile);
        assert!(first.operations_applied.iter().any(|op| op.starts_with("Skew corrected")));

        let again = analyze(&first.enhanced_image);
        assert!(again.skew_angle.abs() <= SKEW_CORRECTION_THRESHOLD, "residual {}", again.skew_angle);
        let second = restore(&first.enhanced_image, &again);
        assert!(!second.operations_applied.iter().any(|op| op.starts_with("Skew corrected")));
    }

    /// After colour balancing, the page no longer reads as yellowed.
    #[test]
    fn yellowing_is_idempotent() {
        let page = cream_page(120, 120);
        let profile = analyze(&page);
        assert!(profile.is_yellowed);
        let first = restore(&page, &profile);
        assert!(
            first
                .operations_applied
                .contains(&"Yellowing corrected (LAB color balance)".to_string())
        );

        let again = analyze(&first.enhanced_image);
        assert!(!again.is_yellowed, "b* mean {}", again.measurements.yellow_blue_mean);
        let second = restore(&first.enhanced_image, &again);
        assert!(
            !second
                .operations_applied
                .iter()
                .any(|op| op.starts_with("Yellowing"))
        );
    }

    /// Operators run in the fixed order regardless of how flags were set.
    #[test]
    fn operations_follow_fixed_order() {
        let profile = DocumentProfile {
            skew_angle: -2.0,
            has_shadows: true,
            is_yellowed: true,
            is_faded: true,
            blur_level: BlurLevel::Moderate,
            ..DocumentProfile::default()
        };
        let result = restore(&cream_page(60, 60), &profile);
        let prefixes = ["Skew", "Shadows", "Yellowing", "Faded", "Sharpness enhanced (moderate"];
        assert!(result.operations_applied.len() >= prefixes.len());
        for (op, prefix) in result.operations_applied.iter().zip(prefixes) {
            assert!(op.starts_with(prefix), "{op} should start with {prefix}");
        }
    }

    /// Guided restoration reports area repairs, then the page-wide steps.
    #[test]
    fn guided_restore_reports_each_step() {
        let analysis: DamageAnalysis = serde_json::from_value(serde_json::json!({
            "damage_areas": [{"type": "fading", "severity": "minor", "x_percent": 50, "y_percent": 50}],
            "text_quality": {"legibility": 40},
            "paper_condition": {"yellowing": 70}
        }))
        .unwrap();
        let result = guided_restore(&cream_page(200, 100), &analysis);
        assert_eq!(
            result.operations_applied,
            vec![
                "Fading restored at (100, 50)",
                "Text clarity enhanced (adaptive threshold blend)",
                "Deep yellowing correction (70% detected)",
                "Detail enhancement (final polish)",
            ]
        );
        assert_eq!((result.enhanced_image.width(), result.enhanced_image.height()), (200, 100));
    }

    /// Legible, mildly yellowed pages only get the final polish.
    #[test]
    fn guided_restore_without_findings() {
        let result = guided_restore(&clean_page(100, 80), &DamageAnalysis::default());
        assert_eq!(result.operations_applied, vec!["Detail enhancement (final polish)"]);

        let mild: DamageAnalysis = serde_json::from_value(serde_json::json!({
            "text_quality": {"legibility": 60},
            "paper_condition": {"yellowing": 50}
        }))
        .unwrap();
        let result = guided_restore(&clean_page(100, 80), &mild);
        assert_eq!(result.operations_applied.len(), 1);
    }

    /// Heavy grain triggers denoising even when nothing else fires.
    #[test]
    fn grainy_page_is_denoised() {
        let page = DynamicImage::ImageLuma8(GrayImage::from_fn(64, 64, |x, y| {
            let hash = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663))
                .wrapping_mul(2_654_435_761)
                >> 16;
            Luma([(88 + hash % 81) as u8])
        }));
        let result = restore(&page, &DocumentProfile::default());
        assert_eq!(result.operations_applied, vec!["Noise reduction (NLM denoising)"]);
    }
}
