// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Collaborator interfaces consumed by the pipeline.
//
// Implementations live outside the core: a local OCR engine, a hosted
// language model, a database archive. Each call is attempted once.

use async_trait::async_trait;

use crate::error::{Result, ServiceError};
use crate::record::{DamageAnalysis, FinalRecord};

/// Text recognised on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Self-reported confidence, nominally 0-100 but not guaranteed.
    pub confidence: f64,
}

/// Extracts text from an encoded page image.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image_png: &[u8]) -> std::result::Result<Recognition, ServiceError>;
}

/// Sends a prompt plus document text to a language model.
///
/// Callers are responsible for capping input length and response time; see
/// the guarded wrapper in `folio-pipeline`.
#[async_trait]
pub trait LanguageService: Send + Sync {
    async fn analyze(
        &self,
        prompt: &str,
        text: &str,
        max_output_tokens: u32,
    ) -> std::result::Result<String, ServiceError>;
}

/// Locates physical damage on an encoded page image.
///
/// Only consulted for heavily degraded pages. A failure leaves the
/// deterministic restoration in place.
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn analyze_damage(
        &self,
        image_png: &[u8],
    ) -> std::result::Result<DamageAnalysis, ServiceError>;
}

/// Persists completed records. Failures never fail the run.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Store the record and return its archive identifier.
    async fn persist(&self, record: &FinalRecord) -> Result<String>;
}
