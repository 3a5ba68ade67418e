// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Test doubles and sample documents shared by the pipeline tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

use folio_core::error::{FolioError, Result};
use folio_core::{
    ArchiveSink, ConfidenceLevel, DamageAnalysis, DocumentProfile, DocumentType, FinalRecord,
    LanguageService, LayoutProfile, Recognition, RestorationSummary, RunId, ScannerFindings,
    ServiceError, TextRecognizer, VisionService,
};

use crate::text::doke_characters;

/// Excerpt in the register of the 1888 concession correspondence.
pub const LETTER_1888: &str = "To the Chief Lobengula. Mr Rudd and his party have arrived \
at the kraal. Dr Jameson writes that Colquhoun will follow with the wagons. Ndinoda \
kutaura nezve chibvumirano re 30 Gumiguru 1888.";

/// PNG of a white 1000x800 page with level black text lines.
pub fn page_png() -> Vec<u8> {
    let (width, height) = (1000u32, 800u32);
    let mut img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let (left, right) = ((width / 10) as i32, (width * 9 / 10) as i32);
    let mut top = height / 10;
    while top + 30 < height - height / 10 {
        let (y0, y1) = (top as i32, top as i32 + 10);
        let bar = [
            Point::new(left, y0),
            Point::new(right, y0),
            Point::new(right, y1),
            Point::new(left, y1),
        ];
        draw_polygon_mut(&mut img, &bar, Rgb([0, 0, 0]));
        top += 30;
    }
    folio_restore::codec::encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
}

/// Scanner findings for `text` on an undamaged page.
pub fn scanner_findings(text: &str, ocr_confidence: f64) -> ScannerFindings {
    ScannerFindings {
        profile: DocumentProfile {
            width: 1000,
            height: 800,
            document_type: DocumentType::Scan,
            ..DocumentProfile::default()
        },
        operations_applied: vec!["minimal processing".to_string()],
        layout: LayoutProfile::default(),
        raw_text: text.to_string(),
        ocr_confidence,
        doke_characters: doke_characters(text),
        enhanced_png: Vec::new(),
    }
}

pub fn sample_record() -> FinalRecord {
    let scan = scanner_findings(LETTER_1888, 82.0);
    FinalRecord {
        run_id: RunId::new(),
        content_hash: None,
        created_at: Utc::now(),
        processing_time_ms: 12,
        stages: Vec::new(),
        messages: Vec::new(),
        overall_confidence: 71.8,
        confidence_level: ConfidenceLevel::Medium,
        inconsistencies: Vec::new(),
        warnings: Vec::new(),
        restoration: RestorationSummary {
            document_type: DocumentType::Scan,
            detected_issues: Vec::new(),
            enhancements_applied: scan.operations_applied.clone(),
            quality_score: 71.8,
            skew_corrected: false,
            shadows_removed: false,
            yellowing_fixed: false,
            image_regions_count: 0,
        },
        layout: scan.layout,
        raw_text: scan.raw_text,
        normalized_text: None,
        reconstructed_text: None,
        repair_recommendations: Vec::new(),
        damage_hotspots: Vec::new(),
        archive_id: None,
    }
}

// -- Recognizers --------------------------------------------------------------

/// Always returns the same text, counting calls.
pub struct FixedRecognizer {
    text: String,
    confidence: f64,
    pub calls: AtomicUsize,
}

impl FixedRecognizer {
    pub fn new(text: &str, confidence: f64) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextRecognizer for FixedRecognizer {
    async fn recognize(&self, _image_png: &[u8]) -> std::result::Result<Recognition, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Recognition {
            text: self.text.clone(),
            confidence: self.confidence,
        })
    }
}

pub struct FailingRecognizer;

#[async_trait]
impl TextRecognizer for FailingRecognizer {
    async fn recognize(&self, _image_png: &[u8]) -> std::result::Result<Recognition, ServiceError> {
        Err(ServiceError::Unavailable("recognizer offline".into()))
    }
}

pub struct SlowRecognizer(pub Duration);

#[async_trait]
impl TextRecognizer for SlowRecognizer {
    async fn recognize(&self, _image_png: &[u8]) -> std::result::Result<Recognition, ServiceError> {
        tokio::time::sleep(self.0).await;
        Ok(Recognition {
            text: "late".into(),
            confidence: 90.0,
        })
    }
}

// -- Vision services ----------------------------------------------------------

/// Reports the same damage every time, counting calls.
pub struct FixedVision {
    analysis: DamageAnalysis,
    pub calls: AtomicUsize,
}

impl FixedVision {
    /// One critical water stain in the middle of the page, poor legibility.
    pub fn water_stain() -> Self {
        let analysis = serde_json::from_value(serde_json::json!({
            "damage_areas": [
                {"type": "water_stain", "severity": "critical", "x_percent": 50, "y_percent": 50}
            ],
            "text_quality": {"legibility": 45},
            "paper_condition": {"yellowing": 30}
        }))
        .unwrap();
        Self {
            analysis,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionService for FixedVision {
    async fn analyze_damage(
        &self,
        _image_png: &[u8],
    ) -> std::result::Result<DamageAnalysis, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.analysis.clone())
    }
}

pub struct FailingVision;

#[async_trait]
impl VisionService for FailingVision {
    async fn analyze_damage(
        &self,
        _image_png: &[u8],
    ) -> std::result::Result<DamageAnalysis, ServiceError> {
        Err(ServiceError::InvalidResponse("no JSON object in reply".into()))
    }
}

// -- Language services --------------------------------------------------------

/// Returns the document text unchanged.
pub struct EchoLanguage;

#[async_trait]
impl LanguageService for EchoLanguage {
    async fn analyze(
        &self,
        _prompt: &str,
        text: &str,
        _max_output_tokens: u32,
    ) -> std::result::Result<String, ServiceError> {
        Ok(text.to_string())
    }
}

pub struct FailingLanguage;

#[async_trait]
impl LanguageService for FailingLanguage {
    async fn analyze(
        &self,
        _prompt: &str,
        _text: &str,
        _max_output_tokens: u32,
    ) -> std::result::Result<String, ServiceError> {
        Err(ServiceError::Unavailable("language model offline".into()))
    }
}

pub struct SlowLanguage(pub Duration);

#[async_trait]
impl LanguageService for SlowLanguage {
    async fn analyze(
        &self,
        _prompt: &str,
        text: &str,
        _max_output_tokens: u32,
    ) -> std::result::Result<String, ServiceError> {
        tokio::time::sleep(self.0).await;
        Ok(text.to_string())
    }
}

// -- Archives -----------------------------------------------------------------

/// Keeps persisted records in memory.
#[derive(Default)]
pub struct MemoryArchive {
    pub records: Mutex<Vec<FinalRecord>>,
}

#[async_trait]
impl ArchiveSink for MemoryArchive {
    async fn persist(&self, record: &FinalRecord) -> Result<String> {
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        Ok(format!("memory-{}", records.len()))
    }
}

pub struct FailingArchive;

#[async_trait]
impl ArchiveSink for FailingArchive {
    async fn persist(&self, _record: &FinalRecord) -> Result<String> {
        Err(FolioError::Archive("database unreachable".into()))
    }
}
