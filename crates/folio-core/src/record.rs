// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stage results and the final record assembled at the end of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    ConfidenceLevel, DocumentProfile, DocumentType, LayoutProfile, RunId, StageKind,
};

/// A single human-readable finding emitted by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMessage {
    pub stage: StageKind,
    pub text: String,
    pub confidence: Option<f64>,
    pub at: DateTime<Utc>,
}

impl StageMessage {
    pub fn new(stage: StageKind, text: impl Into<String>) -> Self {
        Self {
            stage,
            text: text.into(),
            confidence: None,
            at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 100.0));
        self
    }
}

// -- Scanner ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerFindings {
    pub profile: DocumentProfile,
    pub operations_applied: Vec<String>,
    pub layout: LayoutProfile,
    /// Recognised text after post-filtering.
    pub raw_text: String,
    /// Confidence reported by the recogniser (not clamped).
    pub ocr_confidence: f64,
    /// Historical orthography characters present in the text.
    pub doke_characters: Vec<char>,
    /// PNG encoding of the restored image.
    #[serde(skip)]
    pub enhanced_png: Vec<u8>,
}

// -- Linguist -----------------------------------------------------------------

/// One orthography substitution applied during normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transliteration {
    pub original: String,
    pub modern: String,
    pub reason: String,
    pub occurrences: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerCategory {
    TraditionalName,
    ColonialTerm,
    CulturalConcept,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CulturalMarker {
    pub category: MarkerCategory,
    pub term: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinguistFindings {
    pub normalized_text: String,
    pub changes: Vec<Transliteration>,
    pub historical_terms: Vec<String>,
    pub cultural_markers: Vec<CulturalMarker>,
    pub cultural_significance: u32,
    pub ai_notes: Option<String>,
}

// -- Historian ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedFact {
    pub fact: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorianFindings {
    pub figures: Vec<String>,
    pub dates: Vec<String>,
    pub verified_facts: Vec<VerifiedFact>,
    pub ai_notes: Option<String>,
}

// -- Repair advisor -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DamageSeverity {
    Critical,
    Moderate,
    Minor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RepairPriority {
    High,
    Medium,
    Low,
}

impl RepairPriority {
    pub fn from_score(score: u32) -> Self {
        if score > 70 {
            Self::High
        } else if score > 40 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairRecommendation {
    pub damage: String,
    pub description: String,
    pub severity: DamageSeverity,
    pub treatment: String,
    pub estimated_cost: String,
    pub priority: RepairPriority,
    pub priority_score: u32,
}

/// Approximate location of a damage type, in percent of the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageHotspot {
    pub damage: String,
    pub x: f32,
    pub y: f32,
    pub severity: DamageSeverity,
}

// -- Targeted damage analysis --------------------------------------------------

/// Damage types a vision model can point at on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageKind {
    WaterStain,
    Foxing,
    Tear,
    InkBleed,
    Fading,
    #[serde(other)]
    Other,
}

fn default_severity() -> DamageSeverity {
    DamageSeverity::Moderate
}

/// One damaged region, located by its centre in percent of the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageArea {
    #[serde(rename = "type")]
    pub kind: DamageKind,
    #[serde(default = "default_severity")]
    pub severity: DamageSeverity,
    #[serde(default)]
    pub location: Option<String>,
    pub x_percent: f32,
    pub y_percent: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextQuality {
    /// 0-100.
    pub legibility: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperCondition {
    /// 0-100.
    pub yellowing: Option<f64>,
}

/// A vision model's reading of where a page is damaged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DamageAnalysis {
    #[serde(default)]
    pub damage_areas: Vec<DamageArea>,
    #[serde(default)]
    pub text_quality: TextQuality,
    #[serde(default)]
    pub paper_condition: PaperCondition,
}

impl DamageAnalysis {
    /// Parse the first JSON object embedded in a model reply.
    ///
    /// Models tend to wrap the object in prose or code fences; everything
    /// outside the outermost braces is ignored. Returns `None` when no
    /// well-formed object is found.
    pub fn from_reply(reply: &str) -> Option<Self> {
        let start = reply.find('{')?;
        let end = reply.rfind('}')?;
        if end < start {
            return None;
        }
        serde_json::from_str(&reply[start..=end]).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairFindings {
    pub recommendations: Vec<RepairRecommendation>,
    pub hotspots: Vec<DamageHotspot>,
}

// -- Validator ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorFindings {
    pub warnings: Vec<String>,
    pub reconstructed_text: Option<String>,
    /// Set when the reconstruction call timed out or failed.
    pub fallback_note: Option<String>,
}

// -- Stage results ------------------------------------------------------------

/// Stage-specific findings, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageFindings {
    Scanner(ScannerFindings),
    Linguist(LinguistFindings),
    Historian(HistorianFindings),
    RepairAdvisor(RepairFindings),
    Validator(ValidatorFindings),
}

impl StageFindings {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Scanner(_) => StageKind::Scanner,
            Self::Linguist(_) => StageKind::Linguist,
            Self::Historian(_) => StageKind::Historian,
            Self::RepairAdvisor(_) => StageKind::RepairAdvisor,
            Self::Validator(_) => StageKind::Validator,
        }
    }
}

/// Everything one stage produced, exactly once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub findings: StageFindings,
    pub confidence: f64,
    pub messages: Vec<StageMessage>,
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(findings: StageFindings, confidence: f64, messages: Vec<StageMessage>) -> Self {
        Self {
            findings,
            confidence: confidence.clamp(0.0, 100.0),
            messages,
            completed_at: Utc::now(),
        }
    }

    pub fn stage(&self) -> StageKind {
        self.findings.kind()
    }
}

// -- Final record -------------------------------------------------------------

/// Restoration outcome condensed for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorationSummary {
    pub document_type: DocumentType,
    pub detected_issues: Vec<String>,
    pub enhancements_applied: Vec<String>,
    pub quality_score: f64,
    pub skew_corrected: bool,
    pub shadows_removed: bool,
    pub yellowing_fixed: bool,
    pub image_regions_count: usize,
}

/// The result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub run_id: RunId,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_time_ms: u64,
    pub stages: Vec<StageResult>,
    /// All stage messages in emission order.
    pub messages: Vec<StageMessage>,
    pub overall_confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub inconsistencies: Vec<String>,
    pub warnings: Vec<String>,
    pub restoration: RestorationSummary,
    pub layout: LayoutProfile,
    pub raw_text: String,
    pub normalized_text: Option<String>,
    pub reconstructed_text: Option<String>,
    pub repair_recommendations: Vec<RepairRecommendation>,
    pub damage_hotspots: Vec<DamageHotspot>,
    pub archive_id: Option<String>,
}

impl FinalRecord {
    /// Look up the result a given stage produced, if it completed.
    pub fn stage(&self, kind: StageKind) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_confidence_is_clamped() {
        let msg = StageMessage::new(StageKind::Scanner, "ok").with_confidence(140.0);
        assert_eq!(msg.confidence, Some(100.0));
    }

    #[test]
    fn stage_result_reports_its_kind() {
        let result = StageResult::new(
            StageFindings::Validator(ValidatorFindings {
                warnings: vec![],
                reconstructed_text: None,
                fallback_note: None,
            }),
            -5.0,
            vec![],
        );
        assert_eq!(result.stage(), StageKind::Validator);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn repair_priority_thresholds() {
        assert_eq!(RepairPriority::from_score(71), RepairPriority::High);
        assert_eq!(RepairPriority::from_score(70), RepairPriority::Medium);
        assert_eq!(RepairPriority::from_score(41), RepairPriority::Medium);
        assert_eq!(RepairPriority::from_score(40), RepairPriority::Low);
    }

    /// Damage analysis is read out of a fenced reply; unknown types survive.
    #[test]
    fn damage_analysis_from_fenced_reply() {
        let reply = r#"Here is the assessment:
```json
{"damage_areas": [
  {"location": "upper left", "type": "water_stain", "severity": "critical", "x_percent": 20, "y_percent": 15},
  {"type": "mould", "x_percent": 80, "y_percent": 90}
 ],
 "text_quality": {"legibility": 45},
 "paper_condition": {"yellowing": 70}}
```"#;
        let analysis = DamageAnalysis::from_reply(reply).unwrap();
        assert_eq!(analysis.damage_areas.len(), 2);
        assert_eq!(analysis.damage_areas[0].kind, DamageKind::WaterStain);
        assert_eq!(analysis.damage_areas[0].severity, DamageSeverity::Critical);
        assert_eq!(analysis.damage_areas[1].kind, DamageKind::Other);
        assert_eq!(analysis.damage_areas[1].severity, DamageSeverity::Moderate);
        assert_eq!(analysis.text_quality.legibility, Some(45.0));
        assert_eq!(analysis.paper_condition.yellowing, Some(70.0));
    }

    #[test]
    fn damage_analysis_rejects_prose() {
        assert!(DamageAnalysis::from_reply("No damage visible.").is_none());
        assert!(DamageAnalysis::from_reply("} nothing {").is_none());
    }

    #[test]
    fn findings_serialize_with_stage_tag() {
        let findings = StageFindings::Historian(HistorianFindings {
            figures: vec!["Rudd".into()],
            dates: vec!["1888".into()],
            verified_facts: vec![],
            ai_notes: None,
        });
        let json = serde_json::to_value(&findings).unwrap();
        assert_eq!(json["stage"], "historian");
        assert_eq!(json["figures"][0], "Rudd");
    }
}
