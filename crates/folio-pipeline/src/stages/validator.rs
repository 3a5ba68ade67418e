// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Validator stage — cross-checks the joined findings, scores the run, and
// optionally asks the language service to reconstruct the text.

use std::time::Duration;

use tracing::{info, instrument, warn};

use folio_core::{
    ConfidenceLevel, LanguageService, ServiceError, StageFindings, StageKind, StageMessage,
    StageResult, ValidatorFindings,
};

use crate::context::PipelineContext;

const STAGE: StageKind = StageKind::Validator;

/// Recognition confidence below this is flagged for manual review.
pub const MEDIUM_OCR_THRESHOLD: f64 = 60.0;
pub const LOW_OCR_WARNING: &str = "Low OCR confidence - manual review recommended";
pub const RECONSTRUCTION_FALLBACK: &str = "Reconstruction unavailable - using normalized text";

const RECONSTRUCTION_PROMPT: &str = "You are a document restoration specialist. Format the raw \
OCR text of a historical document into a clean, readable version. Fix obvious OCR errors and \
paragraph breaks, keep the original meaning, mark unreadable passages as [illegible], preserve \
dates and names exactly, and output only the restored text.";

/// Settings for the final stage.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorOptions {
    pub reconstruction_timeout: Duration,
    pub max_output_tokens: u32,
}

/// Weighted run confidence, always within [0, 100].
///
/// 40% recognition confidence, 30% verified facts (15 points each, capped),
/// 30% warning penalty (10 points per warning).
pub fn aggregate_confidence(ocr_confidence: f64, verified_facts: usize, warnings: usize) -> f64 {
    let ocr = if ocr_confidence.is_finite() {
        ocr_confidence.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let history = (verified_facts as f64 * 15.0).min(100.0);
    let penalty = (100.0 - warnings as f64 * 10.0).max(0.0);
    (0.4 * ocr + 0.3 * history + 0.3 * penalty).clamp(0.0, 100.0)
}

fn level_label(level: ConfidenceLevel) -> &'static str {
    match level {
        ConfidenceLevel::High => "HIGH",
        ConfidenceLevel::Medium => "MEDIUM",
        ConfidenceLevel::Low => "LOW",
    }
}

/// Run the validator over the assembled context.
///
/// `prior_warnings` holds what the coordinator has already flagged (stage
/// timeouts, inconsistencies) so the score reflects them. `language` is the
/// reconstruction service; when it fails or exceeds the reconstruction
/// timeout the fixed fallback note is recorded instead.
#[instrument(skip_all, fields(prior_warnings = prior_warnings.len()))]
pub async fn run(
    context: &PipelineContext,
    prior_warnings: &[String],
    language: Option<&dyn LanguageService>,
    options: &ValidatorOptions,
) -> StageResult {
    let scan = context.scanner();
    let ocr_confidence = scan.ocr_confidence;
    let mut messages = vec![StageMessage::new(STAGE, "Initializing cross-verification")];
    let mut warnings = Vec::new();

    messages.push(
        StageMessage::new(STAGE, format!("OCR confidence check: {:.1}%", ocr_confidence))
            .with_confidence(ocr_confidence),
    );
    if ocr_confidence < MEDIUM_OCR_THRESHOLD {
        warnings.push(LOW_OCR_WARNING.to_string());
        messages.push(
            StageMessage::new(
                STAGE,
                "Warning: OCR confidence below threshold. Flagging for manual review.",
            )
            .with_confidence(ocr_confidence),
        );
    }

    messages.push(StageMessage::new(
        STAGE,
        "Cross-referencing Scanner, Linguist and Historian outputs",
    ));
    if let Some(linguist) = context.linguist() {
        if !linguist.changes.is_empty() {
            messages.push(StageMessage::new(
                STAGE,
                format!(
                    "Linguist reported {} character conversions. Verifying.",
                    linguist.changes.len()
                ),
            ));
        }
    }
    let verified = context.verified_fact_count();
    if verified > 0 {
        messages.push(
            StageMessage::new(
                STAGE,
                format!("{} historical facts verified by Historian", verified),
            )
            .with_confidence(88.0),
        );
    }

    let score = aggregate_confidence(
        ocr_confidence,
        verified,
        prior_warnings.len() + warnings.len(),
    );
    let level = ConfidenceLevel::from_score(score);
    messages.push(
        StageMessage::new(STAGE, format!("Final confidence score: {:.1}%", score))
            .with_confidence(score),
    );

    let mut reconstructed_text = None;
    let mut fallback_note = None;
    let text = context.best_text();
    if let Some(service) = language.filter(|_| !text.trim().is_empty()) {
        let mut input = text.to_string();
        if let Some(historian) = context.historian() {
            let facts: Vec<&str> = historian
                .verified_facts
                .iter()
                .take(3)
                .map(|f| f.fact.as_str())
                .collect();
            if !facts.is_empty() {
                input.push_str(&format!("\n\nVerified historical context: {}", facts.join(", ")));
            }
        }

        let call = service.analyze(RECONSTRUCTION_PROMPT, &input, options.max_output_tokens);
        let outcome = tokio::time::timeout(options.reconstruction_timeout, call)
            .await
            .unwrap_or(Err(ServiceError::Timeout(options.reconstruction_timeout)));
        match outcome {
            Ok(restored) => {
                messages.push(
                    StageMessage::new(STAGE, "Document reconstructed and formatted for presentation")
                        .with_confidence(score),
                );
                reconstructed_text = Some(restored);
            }
            Err(err) => {
                warn!(error = %err, "Reconstruction failed, keeping normalized text");
                messages.push(StageMessage::new(STAGE, RECONSTRUCTION_FALLBACK));
                fallback_note = Some(RECONSTRUCTION_FALLBACK.to_string());
            }
        }
    }

    messages.push(
        StageMessage::new(
            STAGE,
            format!(
                "Validator complete: confidence level {}. {} warnings issued.",
                level_label(level),
                prior_warnings.len() + warnings.len()
            ),
        )
        .with_confidence(score),
    );
    info!(score, warnings = warnings.len(), reconstructed = reconstructed_text.is_some(), "Validator stage complete");

    StageResult::new(
        StageFindings::Validator(ValidatorFindings {
            warnings,
            reconstructed_text,
            fallback_note,
        }),
        score,
        messages,
    )
}
