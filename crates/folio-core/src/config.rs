// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Run configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};
use crate::types::StageKind;

/// Settings for one pipeline coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on the external text-recognition call (seconds).
    pub recognition_timeout_secs: u64,
    /// Per-stage timeouts for the parallel group (seconds).
    pub linguist_timeout_secs: u64,
    pub historian_timeout_secs: u64,
    pub repair_timeout_secs: u64,
    /// Timeout for the validator's reconstruction call (seconds).
    pub validator_timeout_secs: u64,
    /// Timeout for the scanner's damage-analysis call (seconds).
    pub vision_timeout_secs: u64,
    /// Language-service guard settings.
    pub language: LanguageConfig,
    /// Ask the language service for a linguistic reading when OCR confidence
    /// falls below `low_ocr_threshold`.
    pub linguist_ai: bool,
    pub low_ocr_threshold: f64,
    /// Ask the language service for historical context.
    pub historian_ai: bool,
    /// Ask the language service to reconstruct damaged passages.
    pub reconstruction: bool,
    /// Ask the vision service to locate damage on badly degraded pages.
    pub targeted_repair: bool,
    /// Consult the deduplication cache before running.
    pub cache_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recognition_timeout_secs: 120,
            linguist_timeout_secs: 20,
            historian_timeout_secs: 20,
            repair_timeout_secs: 20,
            validator_timeout_secs: 25,
            vision_timeout_secs: 30,
            language: LanguageConfig::default(),
            linguist_ai: true,
            low_ocr_threshold: 60.0,
            historian_ai: false,
            reconstruction: true,
            targeted_repair: true,
            cache_enabled: true,
        }
    }
}

impl PipelineConfig {
    /// Load settings from a JSON file. Missing keys fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every stage time out immediately.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("recognition", self.recognition_timeout_secs),
            ("linguist", self.linguist_timeout_secs),
            ("historian", self.historian_timeout_secs),
            ("repair", self.repair_timeout_secs),
            ("validator", self.validator_timeout_secs),
            ("vision", self.vision_timeout_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                return Err(FolioError::Config(format!("{name} timeout must be positive")));
            }
        }
        if self.language.max_input_chars < 2 {
            return Err(FolioError::Config(
                "language.max_input_chars must be at least 2".into(),
            ));
        }
        Ok(())
    }

    /// Timeout applied to a non-mandatory stage.
    pub fn stage_timeout(&self, stage: StageKind) -> Duration {
        let secs = match stage {
            StageKind::Scanner => self.recognition_timeout_secs,
            StageKind::Linguist => self.linguist_timeout_secs,
            StageKind::Historian => self.historian_timeout_secs,
            StageKind::RepairAdvisor => self.repair_timeout_secs,
            StageKind::Validator => self.validator_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn vision_timeout(&self) -> Duration {
        Duration::from_secs(self.vision_timeout_secs)
    }
}

/// Limits enforced on every language-service call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Longer inputs keep their head and tail only.
    pub max_input_chars: usize,
    pub max_output_tokens: u32,
    /// Response-time budget per call (seconds).
    pub call_timeout_secs: u64,
    /// Spend ceiling per UTC day.
    pub daily_budget_usd: f64,
    /// Estimated cost of one call.
    pub cost_per_call_usd: f64,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 1500,
            max_output_tokens: 300,
            call_timeout_secs: 20,
            daily_budget_usd: 5.0,
            cost_per_call_usd: 0.003,
        }
    }
}
