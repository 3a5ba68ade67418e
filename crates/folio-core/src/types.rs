// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for Folio: document profiles, layout structure, and the
// identifiers shared by every stage of a run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The five analysis stages of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Image quality, restoration, layout, and text recognition. Mandatory.
    Scanner,
    /// Orthography normalisation and cultural markers.
    Linguist,
    /// Historical figures, dates, and fact verification.
    Historian,
    /// Physical conservation advice.
    RepairAdvisor,
    /// Cross-checks everything once the parallel group has finished.
    Validator,
}

impl StageKind {
    /// Only the scanner stage may abort a run.
    pub fn is_mandatory(&self) -> bool {
        matches!(self, Self::Scanner)
    }

    /// Human-readable stage name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Scanner => "Scanner",
            Self::Linguist => "Linguist",
            Self::Historian => "Historian",
            Self::RepairAdvisor => "Repair advisor",
            Self::Validator => "Validator",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// How badly focus or ink density has degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlurLevel {
    #[default]
    None,
    Slight,
    Moderate,
    High,
}

impl BlurLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Slight => "slight",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }
}

/// How the page was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// Flatbed scan: uniform background, crisp edges.
    Scan,
    /// Camera capture: uneven background or perspective.
    Photograph,
    /// Neither signal present — born-digital or already cleaned.
    #[default]
    Digital,
}

impl DocumentType {
    /// Fixed heuristic confidence for each classification tier.
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Scan => 85.0,
            Self::Photograph => 75.0,
            Self::Digital => 70.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Photograph => "photograph",
            Self::Digital => "digital",
        }
    }
}

/// Defects found on a page, produced once per run by the defect detector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentProfile {
    pub width: u32,
    pub height: u32,
    /// Median text-line angle in degrees (0 when no usable segment was found
    /// or the angle is within the detection tolerance).
    pub skew_angle: f32,
    pub has_perspective_distortion: bool,
    /// Page corners as detected, in contour order.
    pub perspective_corners: Option<[Point; 4]>,
    pub is_yellowed: bool,
    pub yellow_level: i32,
    pub has_shadows: bool,
    pub blur_level: BlurLevel,
    pub is_faded: bool,
    pub document_type: DocumentType,
    pub type_confidence: f32,
    /// Descriptive traits for reporting (not defects).
    pub characteristics: Vec<String>,
    /// Detected defects in detection order.
    pub quality_issues: Vec<String>,
    pub measurements: Measurements,
}

/// Raw numbers behind the profile flags.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurements {
    /// Variance of the Laplacian response.
    pub focus_measure: f64,
    /// Median local variance of the smoothest image blocks.
    pub noise_variance: f64,
    /// Mean of the yellow-blue chroma channel (128 = neutral).
    pub yellow_blue_mean: f64,
    /// Mean of the red-green chroma channel (128 = neutral).
    pub red_green_mean: f64,
    /// Standard deviation of the four quadrant brightness means.
    pub quadrant_deviation: f64,
    /// Mean standard deviation of the four corner patches.
    pub background_uniformity: f64,
    /// Mean of the edge map, 0-255.
    pub edge_density: f64,
}

/// Axis-aligned rectangle in percent of page width/height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Role of a text block on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Heading,
    Paragraph,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub kind: BlockKind,
    pub region: Region,
}

/// Page structure detected on the enhanced image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutProfile {
    pub has_header: bool,
    pub has_footer: bool,
    pub estimated_columns: u8,
    pub has_table: bool,
    pub image_regions: Vec<Region>,
    pub text_blocks: Vec<TextBlock>,
}

impl Default for LayoutProfile {
    fn default() -> Self {
        Self {
            has_header: false,
            has_footer: false,
            estimated_columns: 1,
            has_table: false,
            image_regions: Vec::new(),
            text_blocks: Vec::new(),
        }
    }
}

impl LayoutProfile {
    pub fn heading_count(&self) -> usize {
        self.text_blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Heading)
            .count()
    }

    pub fn paragraph_count(&self) -> usize {
        self.text_blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Paragraph)
            .count()
    }
}

/// Confidence tier for presenting scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::High
        } else if score >= 60.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}
