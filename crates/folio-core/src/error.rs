// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Folio.
//
// Only the scanner stage may fail a run. Everything a collaborator raises in a
// later stage is escalated to `DegradedStage` and recorded as a finding.

use std::time::Duration;

use thiserror::Error;

use crate::types::StageKind;

/// Failures reported by external collaborators (recognition, language model).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("daily budget exhausted: spent ${spent:.3} of ${budget:.2}")]
    BudgetExceeded { spent: f64, budget: f64 },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid service response: {0}")]
    InvalidResponse(String),
}

/// Top-level error type for all Folio operations.
#[derive(Debug, Error)]
pub enum FolioError {
    // -- Run-level errors --
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("{stage} stage failed: {reason}")]
    FatalStage { stage: StageKind, reason: String },

    #[error("{stage} stage degraded: {reason}")]
    DegradedStage { stage: StageKind, reason: String },

    #[error("external service error: {0}")]
    ExternalService(#[from] ServiceError),

    // -- Processing errors --
    #[error("image processing failed: {0}")]
    Image(String),

    #[error("context slot for {0} stage already filled")]
    SlotAlreadyFilled(StageKind),

    // -- Storage / persistence --
    #[error("archive write failed: {0}")]
    Archive(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FolioError {
    /// Re-classify an error raised while `stage` was running.
    ///
    /// Scanner failures become `FatalStage`; any other stage degrades.
    /// `MalformedInput` is surfaced unchanged so callers see the real cause.
    pub fn escalate(self, stage: StageKind) -> Self {
        match self {
            err @ (FolioError::MalformedInput(_)
            | FolioError::FatalStage { .. }
            | FolioError::DegradedStage { .. }) => err,
            other if stage.is_mandatory() => FolioError::FatalStage {
                stage,
                reason: other.to_string(),
            },
            other => FolioError::DegradedStage {
                stage,
                reason: other.to_string(),
            },
        }
    }

    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FolioError::MalformedInput(_) | FolioError::FatalStage { .. }
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FolioError>;
