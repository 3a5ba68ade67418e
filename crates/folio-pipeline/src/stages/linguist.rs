// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Linguist stage — orthography normalisation, historical terminology, and
// cultural markers.

use tracing::{info, instrument, warn};

use folio_core::error::Result;
use folio_core::{
    CulturalMarker, LanguageService, LinguistFindings, MarkerCategory, ScannerFindings,
    StageFindings, StageKind, StageMessage, StageResult, Transliteration,
};

const STAGE: StageKind = StageKind::Linguist;
const COMPLETE_CONFIDENCE: f64 = 85.0;

const READING_PROMPT: &str = "You are a document text cleaner. Clean up OCR errors and garbled \
text, make the text readable, and note any unusual characters or scripts. Answer as \
\"Cleaned text: ... Notes: ...\".";

/// Pre-1955 orthography letters and their modern spelling.
const TRANSLITERATIONS: [(char, &str); 11] = [
    ('ɓ', "b"),
    ('ɗ', "d"),
    ('ȿ', "sv"),
    ('ɀ', "zv"),
    ('ŋ', "ng"),
    ('ʃ', "sh"),
    ('ʒ', "zh"),
    ('ṱ', "t"),
    ('ḓ', "d"),
    ('ḽ', "l"),
    ('ṋ', "n"),
];

/// Colonial-era terms: (term, modern form, note).
const HISTORICAL_TERMS: [(&str, &str, &str); 7] = [
    ("Matabele", "AmaNdebele", "Colonial term for Ndebele people"),
    ("Mashona", "VaShona", "Colonial term for Shona people"),
    ("kraal", "musha", "Settlement/homestead"),
    ("induna", "induna", "Chief/headman - term retained"),
    ("lobola", "roora", "Bride price tradition"),
    ("Mambo", "Mambo", "King/paramount chief"),
    ("VaRungu", "VaRungu", "White people/Europeans"),
];

const CULTURAL_MARKERS: [(MarkerCategory, &str, &str); 12] = [
    (MarkerCategory::TraditionalName, "Lobengula", "Last Ndebele king, son of Mzilikazi"),
    (MarkerCategory::TraditionalName, "Nehanda", "Shona spirit medium, resistance leader"),
    (MarkerCategory::TraditionalName, "Kaguvi", "Shona spirit medium, First Chimurenga"),
    (MarkerCategory::TraditionalName, "Chaminuka", "Legendary Shona spirit medium"),
    (MarkerCategory::ColonialTerm, "Native Commissioner", "Colonial administrative position"),
    (MarkerCategory::ColonialTerm, "Compound", "Segregated worker housing"),
    (MarkerCategory::ColonialTerm, "Pass Laws", "Movement restriction system"),
    (MarkerCategory::ColonialTerm, "Hut Tax", "Colonial taxation system"),
    (MarkerCategory::CulturalConcept, "Kuraguza", "Traditional Shona greeting/respect"),
    (MarkerCategory::CulturalConcept, "Dare", "Traditional court/meeting place"),
    (MarkerCategory::CulturalConcept, "Musha", "Homestead/village"),
    (MarkerCategory::CulturalConcept, "Totems", "Clan identity system"),
];

/// Settings for the optional language-model reading.
#[derive(Debug, Clone, Copy)]
pub struct LinguistOptions {
    /// The reading only runs when recognition confidence is below this.
    pub low_ocr_threshold: f64,
    pub max_output_tokens: u32,
}

fn reason_for(letter: char) -> &'static str {
    match letter {
        'ɓ' => "Implosive bilabial → standard 'b' (1955 reform)",
        'ɗ' => "Implosive alveolar → standard 'd' (1955 reform)",
        'ȿ' => "Whistling fricative → 'sv' digraph",
        'ɀ' => "Voiced whistling → 'zv' digraph",
        'ŋ' => "Velar nasal → 'ng' digraph",
        'ʃ' => "Postalveolar → 'sh' digraph",
        'ʒ' => "Voiced postalveolar → 'zh' digraph",
        _ => "Standardized per 1955 orthography",
    }
}

/// Rewrite historical orthography in modern spelling.
pub fn transliterate(text: &str) -> (String, Vec<Transliteration>) {
    let mut result = text.to_string();
    let mut changes = Vec::new();
    for (letter, modern) in TRANSLITERATIONS {
        let occurrences = result.matches(letter).count();
        if occurrences == 0 {
            continue;
        }
        result = result.replace(letter, modern);
        changes.push(Transliteration {
            original: letter.to_string(),
            modern: modern.to_string(),
            reason: reason_for(letter).to_string(),
            occurrences,
        });
    }
    (result, changes)
}

/// Colonial-era terms present in `text`, matched case-insensitively.
pub fn find_historical_terms(text: &str) -> Vec<(&'static str, &'static str, &'static str)> {
    let lower = text.to_lowercase();
    HISTORICAL_TERMS
        .into_iter()
        .filter(|(term, _, _)| lower.contains(&term.to_lowercase()))
        .collect()
}

/// Traditional names, colonial terms, and cultural concepts in `text`.
pub fn detect_cultural_markers(text: &str) -> Vec<CulturalMarker> {
    let lower = text.to_lowercase();
    CULTURAL_MARKERS
        .iter()
        .filter(|(_, term, _)| lower.contains(&term.to_lowercase()))
        .map(|(category, term, _)| CulturalMarker {
            category: *category,
            term: term.to_string(),
        })
        .collect()
}

fn marker_note(term: &str) -> &'static str {
    CULTURAL_MARKERS
        .iter()
        .find(|(_, t, _)| *t == term)
        .map(|(_, _, note)| *note)
        .unwrap_or("")
}

/// 30 + 12 per marker + 15 per traditional name, capped at 100.
pub fn cultural_significance(markers: &[CulturalMarker]) -> u32 {
    let traditional = markers
        .iter()
        .filter(|m| m.category == MarkerCategory::TraditionalName)
        .count() as u32;
    (30 + 12 * markers.len() as u32 + 15 * traditional).min(100)
}

/// Run the linguist over the scanner's text.
///
/// `language` is consulted only when recognition confidence is low; its
/// failure is noted and the rule-based findings stand.
#[instrument(skip_all, fields(chars = scan.raw_text.chars().count()))]
pub async fn run(
    scan: &ScannerFindings,
    language: Option<&dyn LanguageService>,
    options: &LinguistOptions,
) -> Result<StageResult> {
    let raw_text = &scan.raw_text;
    let mut messages = vec![
        StageMessage::new(STAGE, "Scanning for pre-1955 Shona phonetic markers").with_confidence(75.0),
    ];

    let mut ai_notes = None;
    if let Some(service) = language.filter(|_| scan.ocr_confidence < options.low_ocr_threshold) {
        match service
            .analyze(READING_PROMPT, raw_text, options.max_output_tokens)
            .await
        {
            Ok(notes) => {
                messages.push(
                    StageMessage::new(STAGE, format!("Language model reading:\n{}", notes))
                        .with_confidence(88.0),
                );
                ai_notes = Some(notes);
            }
            Err(err) => {
                warn!(error = %err, "Linguistic reading unavailable");
                messages.push(StageMessage::new(
                    STAGE,
                    format!("Language model reading unavailable: {}", err),
                ));
            }
        }
    }

    let (normalized_text, changes) = transliterate(raw_text);
    if changes.is_empty() {
        messages.push(
            StageMessage::new(STAGE, "No Doke characters found. Text in Latin/Modern Shona script.")
                .with_confidence(78.0),
        );
    } else {
        messages.push(
            StageMessage::new(
                STAGE,
                format!("Transliteration: {} Doke→Modern conversions made", changes.len()),
            )
            .with_confidence(85.0),
        );
        for change in changes.iter().take(4) {
            messages.push(StageMessage::new(
                STAGE,
                format!("'{}' → '{}': {}", change.original, change.modern, change.reason),
            ));
        }
    }

    let terms = find_historical_terms(raw_text);
    if !terms.is_empty() {
        messages.push(
            StageMessage::new(
                STAGE,
                format!("Historical terms: {} colonial-era terms identified", terms.len()),
            )
            .with_confidence(82.0),
        );
        for (term, modern, note) in terms.iter().take(3) {
            messages.push(StageMessage::new(
                STAGE,
                format!("'{}' (modern: {}): {}", term, modern, note),
            ));
        }
    }

    let cultural_markers = detect_cultural_markers(raw_text);
    if !cultural_markers.is_empty() {
        messages.push(
            StageMessage::new(
                STAGE,
                format!(
                    "Cultural markers: {} traditional/colonial elements found",
                    cultural_markers.len()
                ),
            )
            .with_confidence(85.0),
        );
        for marker in cultural_markers.iter().take(3) {
            messages.push(StageMessage::new(
                STAGE,
                format!("{}: {}", marker.term, marker_note(&marker.term)),
            ));
        }
    }

    let significance = cultural_significance(&cultural_markers);
    if significance > 50 {
        let level = if significance > 70 { "HIGH" } else { "MEDIUM" };
        messages.push(
            StageMessage::new(
                STAGE,
                format!("Heritage significance: {} ({}%)", level, significance),
            )
            .with_confidence(f64::from(significance)),
        );
    }

    messages.push(
        StageMessage::new(STAGE, "Linguist complete: text normalized, cultural context analyzed")
            .with_confidence(COMPLETE_CONFIDENCE),
    );
    info!(
        changes = changes.len(),
        terms = terms.len(),
        markers = cultural_markers.len(),
        significance,
        "Linguist stage complete"
    );

    let findings = LinguistFindings {
        normalized_text,
        changes,
        historical_terms: terms.iter().map(|(term, _, _)| term.to_string()).collect(),
        cultural_markers,
        cultural_significance: significance,
        ai_notes,
    };
    Ok(StageResult::new(
        StageFindings::Linguist(findings),
        COMPLETE_CONFIDENCE,
        messages,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{EchoLanguage, FailingLanguage, scanner_findings};

    const OPTIONS: LinguistOptions = LinguistOptions {
        low_ocr_threshold: 60.0,
        max_output_tokens: 300,
    };

    fn findings(result: &StageResult) -> &LinguistFindings {
        match &result.findings {
            StageFindings::Linguist(f) => f,
            other => panic!("unexpected findings: {other:?}"),
        }
    }

    /// Each historical letter becomes its modern spelling, with a reason.
    #[test]
    fn transliterates_doke_letters() {
        let (text, changes) = transliterate("ɓaɓa ŋoma ʃiri");
        assert_eq!(text, "baba ngoma shiri");
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].original, "ɓ");
        assert_eq!(changes[0].occurrences, 2);
        assert!(changes[0].reason.contains("1955 reform"));
        assert_eq!(changes[2].reason, "Postalveolar → 'sh' digraph");
    }

    #[test]
    fn retroflex_letters_use_default_reason() {
        let (text, changes) = transliterate("ṱ");
        assert_eq!(text, "t");
        assert_eq!(changes[0].reason, "Standardized per 1955 orthography");
    }

    #[test]
    fn finds_terms_case_insensitively() {
        let terms = find_historical_terms("the MATABELE kraal");
        let names: Vec<_> = terms.iter().map(|(t, _, _)| *t).collect();
        assert_eq!(names, vec!["Matabele", "kraal"]);
    }

    /// Two markers, one of them a traditional name: 30 + 24 + 15.
    #[test]
    fn significance_rewards_traditional_names() {
        let markers = detect_cultural_markers("Lobengula paid the hut tax");
        assert_eq!(markers.len(), 2);
        assert_eq!(cultural_significance(&markers), 69);
    }

    #[test]
    fn significance_is_capped() {
        let markers = detect_cultural_markers("Lobengula Nehanda Kaguvi Chaminuka Dare");
        assert_eq!(cultural_significance(&markers), 100);
    }

    #[tokio::test]
    async fn stage_normalizes_text() {
        let scan = scanner_findings("Ini Lobengula, Mambo weMatabele, ndinoɗa", 82.0);
        let result = run(&scan, None, &OPTIONS).await.unwrap();
        let f = findings(&result);
        assert_eq!(f.normalized_text, "Ini Lobengula, Mambo weMatabele, ndinoda");
        assert_eq!(f.historical_terms, vec!["Matabele", "Mambo"]);
        assert!(f.ai_notes.is_none());
        assert_eq!(result.stage(), StageKind::Linguist);
        assert_eq!(result.confidence, 85.0);
    }

    /// The language model is consulted only for poorly recognised text.
    #[tokio::test]
    async fn reading_requested_only_for_low_confidence() {
        let service = EchoLanguage;
        let good = run(&scanner_findings("clear text", 82.0), Some(&service), &OPTIONS)
            .await
            .unwrap();
        assert!(findings(&good).ai_notes.is_none());

        let poor = run(&scanner_findings("blurry text", 40.0), Some(&service), &OPTIONS)
            .await
            .unwrap();
        assert_eq!(findings(&poor).ai_notes.as_deref(), Some("blurry text"));
    }

    #[tokio::test]
    async fn failed_reading_keeps_rule_findings() {
        let scan = scanner_findings("ŋoma", 20.0);
        let result = run(&scan, Some(&FailingLanguage), &OPTIONS).await.unwrap();
        assert_eq!(findings(&result).normalized_text, "ngoma");
        assert!(findings(&result).ai_notes.is_none());
        assert!(result.messages.iter().any(|m| m.text.contains("unavailable")));
    }
}
