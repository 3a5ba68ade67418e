// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Repair advisor stage — physical conservation advice derived from the
// recognised text, recognition confidence, and the measured page defects.

use tracing::{info, instrument};

use folio_core::{
    DamageHotspot, DamageSeverity, RepairFindings, RepairPriority, RepairRecommendation,
    ScannerFindings, StageFindings, StageKind, StageMessage, StageResult,
};

const STAGE: StageKind = StageKind::RepairAdvisor;
const COMPLETE_CONFIDENCE: f64 = 82.0;

/// One entry of the damage catalogue.
#[derive(Debug, Clone, Copy)]
pub struct DamageType {
    pub key: &'static str,
    pub description: &'static str,
    pub severity: DamageSeverity,
    pub treatment: &'static str,
    pub cost: &'static str,
    /// Marker position on the page, in percent.
    pub position: (f32, f32),
}

pub const IRON_GALL_INK: DamageType = DamageType {
    key: "iron_gall_ink",
    description: "Iron-gall ink corrosion",
    severity: DamageSeverity::Critical,
    treatment: "Calcium phytate treatment to neutralize acid",
    cost: "$200-500 per document",
    position: (25.0, 35.0),
};

pub const FOXING: DamageType = DamageType {
    key: "foxing",
    description: "Brown spots from fungal/oxidation damage",
    severity: DamageSeverity::Moderate,
    treatment: "Aqueous deacidification and bleaching",
    cost: "$100-300 per document",
    position: (70.0, 25.0),
};

pub const TEARS: DamageType = DamageType {
    key: "tears",
    description: "Physical tears and losses",
    severity: DamageSeverity::Moderate,
    treatment: "Japanese tissue repair with wheat starch paste",
    cost: "$50-200 per repair",
    position: (85.0, 45.0),
};

pub const FADING: DamageType = DamageType {
    key: "fading",
    description: "Ink fading from light exposure",
    severity: DamageSeverity::Minor,
    treatment: "Multispectral imaging for text recovery",
    cost: "$150-400 for imaging",
    position: (50.0, 60.0),
};

pub const WATER_DAMAGE: DamageType = DamageType {
    key: "water_damage",
    description: "Water staining and tide lines",
    severity: DamageSeverity::Moderate,
    treatment: "Controlled humidification and flattening",
    cost: "$100-250 per document",
    position: (80.0, 75.0),
};

pub const BRITTLENESS: DamageType = DamageType {
    key: "brittleness",
    description: "Paper brittleness from acid degradation",
    severity: DamageSeverity::Critical,
    treatment: "Mass deacidification (Bookkeeper process)",
    cost: "$75-150 per document",
    position: (20.0, 80.0),
};

pub const YELLOWING: DamageType = DamageType {
    key: "yellowing",
    description: "Paper yellowing from acidity",
    severity: DamageSeverity::Moderate,
    treatment: "Magnesium bicarbonate wash",
    cost: "$50-150 per document",
    position: (45.0, 20.0),
};

pub const STORAGE_ADVICE: &str = "Storage: acid-free folders, 65°F/40% RH, UV-filtered lighting.";

const IRON_GALL_WORDS: [&str; 5] = ["degradation", "damaged", "faded", "illegible", "torn"];
const WATER_WORDS: [&str; 3] = ["stain", "water", "tide"];
const BRITTLE_WORDS: [&str; 3] = ["brittle", "crumbl", "fragment"];
const LOSS_WORDS: [&str; 3] = ["ripped", "missing", "losses"];

/// Damage indicated by the text, recognition confidence, and page profile.
///
/// Each damage type appears at most once, in order of first detection.
pub fn detect_damage(scan: &ScannerFindings) -> Vec<DamageType> {
    let text = &scan.raw_text;
    let lower = text.to_lowercase();
    let ocr = scan.ocr_confidence;
    let mut detected: Vec<DamageType> = Vec::new();
    let mut add = |damage: DamageType| {
        if !detected.iter().any(|d| d.key == damage.key) {
            detected.push(damage);
        }
    };

    if IRON_GALL_WORDS.iter().any(|w| lower.contains(w)) {
        add(IRON_GALL_INK);
    }
    if WATER_WORDS.iter().any(|w| lower.contains(w)) {
        add(WATER_DAMAGE);
    }
    if BRITTLE_WORDS.iter().any(|w| lower.contains(w)) {
        add(BRITTLENESS);
    }
    if LOSS_WORDS.iter().any(|w| lower.contains(w)) {
        add(TEARS);
    }
    // Bracketed passages usually mark text the reader could not recover.
    if text.contains('[') && text.contains(']') {
        add(FADING);
    }
    if ocr < 70.0 {
        add(IRON_GALL_INK);
    }
    if ocr < 60.0 {
        add(FOXING);
    }
    if scan.profile.is_yellowed {
        add(YELLOWING);
    }
    if scan.profile.is_faded {
        add(FADING);
    }
    detected
}

/// 50 + a weight per damage severity + a low-confidence bonus, capped at 100.
pub fn digitization_priority(damage: &[DamageType], ocr_confidence: f64) -> u32 {
    let severity: u32 = damage
        .iter()
        .map(|d| match d.severity {
            DamageSeverity::Critical => 20,
            DamageSeverity::Moderate => 10,
            DamageSeverity::Minor => 5,
        })
        .sum();
    let confidence_bonus = if ocr_confidence < 60.0 {
        20
    } else if ocr_confidence < 75.0 {
        10
    } else {
        0
    };
    (50 + severity + confidence_bonus).min(100)
}

fn priority_label(priority: RepairPriority) -> &'static str {
    match priority {
        RepairPriority::High => "HIGH",
        RepairPriority::Medium => "MEDIUM",
        RepairPriority::Low => "LOW",
    }
}

fn severity_marker(severity: DamageSeverity) -> &'static str {
    match severity {
        DamageSeverity::Critical => "[critical]",
        DamageSeverity::Moderate => "[moderate]",
        DamageSeverity::Minor => "[minor]",
    }
}

/// Assess the page. Purely rule-based, so it cannot fail.
#[instrument(skip_all, fields(ocr_confidence = scan.ocr_confidence))]
pub fn assess(scan: &ScannerFindings) -> StageResult {
    let mut messages = vec![
        StageMessage::new(STAGE, "Initializing physical condition assessment"),
        StageMessage::new(STAGE, "Analyzing document degradation indicators"),
    ];

    let damage = detect_damage(scan);
    let score = digitization_priority(&damage, scan.ocr_confidence);
    let priority = RepairPriority::from_score(score);

    if damage.is_empty() {
        messages.push(
            StageMessage::new(STAGE, "No critical damage indicators detected").with_confidence(85.0),
        );
    } else {
        messages.push(
            StageMessage::new(
                STAGE,
                format!("Damage detected: {} conservation issues identified", damage.len()),
            )
            .with_confidence(80.0),
        );
        for d in &damage {
            messages.push(StageMessage::new(
                STAGE,
                format!("{} {}: {}", severity_marker(d.severity), d.description, d.treatment),
            ));
        }
    }

    messages.push(StageMessage::new(STAGE, STORAGE_ADVICE));
    let urgency = if priority == RepairPriority::High {
        "Immediate scanning recommended"
    } else {
        "Schedule within 6 months"
    };
    messages.push(
        StageMessage::new(
            STAGE,
            format!("Digitization priority: {} ({}%) - {}", priority_label(priority), score, urgency),
        )
        .with_confidence(f64::from(score)),
    );

    let recommendations: Vec<RepairRecommendation> = damage
        .iter()
        .map(|d| RepairRecommendation {
            damage: d.key.to_string(),
            description: d.description.to_string(),
            severity: d.severity,
            treatment: d.treatment.to_string(),
            estimated_cost: d.cost.to_string(),
            priority,
            priority_score: score,
        })
        .collect();
    let hotspots: Vec<DamageHotspot> = damage
        .iter()
        .map(|d| DamageHotspot {
            damage: d.key.to_string(),
            x: d.position.0,
            y: d.position.1,
            severity: d.severity,
        })
        .collect();

    messages.push(
        StageMessage::new(
            STAGE,
            format!("Repair advisor complete: {} recommendations issued", recommendations.len()),
        )
        .with_confidence(COMPLETE_CONFIDENCE),
    );
    info!(damage = damage.len(), priority_score = score, "Repair advisor stage complete");

    StageResult::new(
        StageFindings::RepairAdvisor(RepairFindings {
            recommendations,
            hotspots,
        }),
        COMPLETE_CONFIDENCE,
        messages,
    )
}
