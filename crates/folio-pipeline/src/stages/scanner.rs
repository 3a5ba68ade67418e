// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanner stage — restore the page image, then read its text.
//
// The only mandatory stage. Raster work runs on the blocking pool; the
// recognition call carries its own timeout. Badly degraded pages may also
// get a vision-guided repair pass, which never fails the stage.

use std::time::Duration;

use image::DynamicImage;
use tracing::{info, instrument, warn};

use folio_core::error::{FolioError, Result};
use folio_core::{
    DamageAnalysis, DocumentProfile, LayoutProfile, PipelineConfig, ScannerFindings,
    ServiceError, StageKind, StageMessage, TextRecognizer, VisionService,
};
use folio_restore::{
    MINIMAL_PROCESSING, RestorationResult, analyze, analyze_layout, codec, guided_restore,
    restore,
};

use crate::text::{doke_characters, post_filter};

/// Scanner findings plus the messages emitted while producing them.
#[derive(Debug, Clone)]
pub struct ScannerOutput {
    pub findings: ScannerFindings,
    pub messages: Vec<StageMessage>,
}

/// Time limits for the scanner's collaborator calls.
#[derive(Debug, Clone, Copy)]
pub struct ScannerOptions {
    pub recognition_timeout: Duration,
    pub vision_timeout: Duration,
}

impl ScannerOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            recognition_timeout: config.stage_timeout(StageKind::Scanner),
            vision_timeout: config.vision_timeout(),
        }
    }
}

/// Pages reporting more quality issues than this get a damage analysis.
pub const TARGETED_REPAIR_ISSUE_LIMIT: usize = 2;

pub fn needs_targeted_repair(profile: &DocumentProfile) -> bool {
    profile.quality_issues.len() > TARGETED_REPAIR_ISSUE_LIMIT
}

struct PreparedPage {
    width: u32,
    height: u32,
    profile: DocumentProfile,
    operations_applied: Vec<String>,
    layout: LayoutProfile,
    enhanced_image: DynamicImage,
    enhanced_png: Vec<u8>,
}

fn prepare(bytes: &[u8]) -> Result<PreparedPage> {
    let image: DynamicImage = codec::decode(bytes)?;
    let profile = analyze(&image);
    let RestorationResult {
        enhanced_image,
        operations_applied,
    } = restore(&image, &profile);
    let layout = analyze_layout(&enhanced_image);
    let enhanced_png = codec::encode_png(&enhanced_image)?;
    Ok(PreparedPage {
        width: image.width(),
        height: image.height(),
        profile,
        operations_applied,
        layout,
        enhanced_image,
        enhanced_png,
    })
}

fn keep_deterministic(
    page: PreparedPage,
    reason: String,
    messages: &mut Vec<StageMessage>,
) -> PreparedPage {
    warn!(reason = %reason, "Damage analysis failed; keeping standard restoration");
    messages.push(StageMessage::new(
        StageKind::Scanner,
        format!("AI damage analysis unavailable ({reason}); keeping standard restoration"),
    ));
    page
}

/// Ask `vision` where the restored page is still damaged and repair those
/// areas. On any failure the page comes back exactly as it went in.
async fn refine_with_vision(
    mut page: PreparedPage,
    vision: &dyn VisionService,
    limit: Duration,
    messages: &mut Vec<StageMessage>,
) -> PreparedPage {
    let stage = StageKind::Scanner;
    messages.push(StageMessage::new(stage, "Running AI damage analysis"));

    let reply = tokio::time::timeout(limit, vision.analyze_damage(&page.enhanced_png)).await;
    let analysis: DamageAnalysis = match reply {
        Ok(Ok(analysis)) => analysis,
        Ok(Err(err)) => return keep_deterministic(page, err.to_string(), messages),
        Err(_) => {
            let err = ServiceError::Timeout(limit);
            return keep_deterministic(page, err.to_string(), messages);
        }
    };
    if !analysis.damage_areas.is_empty() {
        messages.push(StageMessage::new(
            stage,
            format!("AI detected {} damage area(s)", analysis.damage_areas.len()),
        ));
    }

    let image = page.enhanced_image.clone();
    let repaired = tokio::task::spawn_blocking(move || {
        let result = guided_restore(&image, &analysis);
        codec::encode_png(&result.enhanced_image).map(|png| (result, png))
    })
    .await;
    let (result, png) = match repaired {
        Ok(Ok(done)) => done,
        Ok(Err(err)) => return keep_deterministic(page, err.to_string(), messages),
        Err(err) => {
            return keep_deterministic(page, format!("raster task failed: {err}"), messages);
        }
    };

    let preview: Vec<&str> = result
        .operations_applied
        .iter()
        .take(2)
        .map(String::as_str)
        .collect();
    messages.push(StageMessage::new(
        stage,
        format!("AI restoration: {}", preview.join(", ")),
    ));
    page.operations_applied.retain(|op| op != MINIMAL_PROCESSING);
    page.operations_applied.extend(result.operations_applied);
    page.enhanced_image = result.enhanced_image;
    page.enhanced_png = png;
    page
}

fn layout_summary(layout: &LayoutProfile) -> String {
    let mut parts = Vec::new();
    if layout.has_header {
        parts.push("header".to_string());
    }
    if layout.has_footer {
        parts.push("footer".to_string());
    }
    if layout.has_table {
        parts.push("table".to_string());
    }
    if !layout.image_regions.is_empty() {
        parts.push(format!("{} image(s)", layout.image_regions.len()));
    }
    parts.push(format!("{} col(s)", layout.estimated_columns));
    format!("Layout: {}", parts.join(", "))
}

/// Run the scanner stage over encoded page bytes.
///
/// Undecodable input is `MalformedInput`; a failed or slow recognition call
/// surfaces as the collaborator's `ServiceError`. The coordinator escalates
/// both. When `vision` is given and the page shows more than two quality
/// issues, a guided repair pass runs before recognition.
#[instrument(skip_all, fields(bytes = image_bytes.len()))]
pub async fn run(
    image_bytes: &[u8],
    recognizer: &dyn TextRecognizer,
    vision: Option<&dyn VisionService>,
    options: ScannerOptions,
) -> Result<ScannerOutput> {
    let stage = StageKind::Scanner;
    let mut messages = vec![StageMessage::new(stage, "Initializing document scan")];

    let bytes = image_bytes.to_vec();
    let mut page = tokio::task::spawn_blocking(move || prepare(&bytes))
        .await
        .map_err(|err| FolioError::Image(format!("raster task failed: {}", err)))??;

    let profile = &page.profile;
    messages.push(StageMessage::new(
        stage,
        format!("Analyzing document ({}x{}px)", page.width, page.height),
    ));
    messages.push(
        StageMessage::new(
            stage,
            format!(
                "Document type: {} ({:.0}% confidence)",
                profile.document_type.as_str().to_uppercase(),
                profile.type_confidence
            ),
        )
        .with_confidence(f64::from(profile.type_confidence)),
    );
    for issue in &profile.quality_issues {
        messages.push(StageMessage::new(stage, format!("Detected: {}", issue)));
    }
    if let Some(vision) = vision.filter(|_| needs_targeted_repair(&page.profile)) {
        page = refine_with_vision(page, vision, options.vision_timeout, &mut messages).await;
    }
    for op in &page.operations_applied {
        messages.push(StageMessage::new(stage, format!("Applied: {}", op)));
    }
    messages.push(StageMessage::new(stage, layout_summary(&page.layout)));

    messages.push(StageMessage::new(stage, "Running text extraction"));
    let recognition = tokio::time::timeout(
        options.recognition_timeout,
        recognizer.recognize(&page.enhanced_png),
    )
    .await
    .map_err(|_| ServiceError::Timeout(options.recognition_timeout))??;

    let raw_text = post_filter(&recognition.text);
    let ocr_confidence = recognition.confidence;
    messages.push(
        StageMessage::new(
            stage,
            format!(
                "Extracted {} characters (confidence: {:.1}%)",
                raw_text.chars().count(),
                ocr_confidence
            ),
        )
        .with_confidence(ocr_confidence),
    );

    let doke = doke_characters(&raw_text);
    if !doke.is_empty() {
        let listed: Vec<String> = doke.iter().map(|c| c.to_string()).collect();
        messages.push(
            StageMessage::new(
                stage,
                format!("Doke orthography detected: {}", listed.join(", ")),
            )
            .with_confidence(88.0),
        );
    }

    messages.push(
        StageMessage::new(
            stage,
            format!("Scanner complete (confidence: {:.1}%)", ocr_confidence),
        )
        .with_confidence(ocr_confidence),
    );
    info!(
        chars = raw_text.chars().count(),
        ocr_confidence,
        operations = page.operations_applied.len(),
        "Scanner stage complete"
    );

    Ok(ScannerOutput {
        findings: ScannerFindings {
            profile: page.profile,
            operations_applied: page.operations_applied,
            layout: page.layout,
            raw_text,
            ocr_confidence,
            doke_characters: doke,
            enhanced_png: page.enhanced_png,
        },
        messages,
    })
}
