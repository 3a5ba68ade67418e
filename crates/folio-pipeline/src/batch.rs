// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Batch runs — several documents through the pipeline, one at a time.
//
// A failing document is reported in its own outcome and never stops the rest
// of the batch.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use folio_core::FinalRecord;
use folio_core::error::{FolioError, Result};

use crate::coordinator::Coordinator;

/// Most documents accepted in one batch.
pub const MAX_BATCH_SIZE: usize = 5;

/// One named upload.
#[derive(Debug, Clone)]
pub struct BatchDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl BatchDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub name: String,
    pub status: BatchStatus,
    pub error_message: Option<String>,
    pub processing_time_ms: u64,
    pub archive_id: Option<String>,
    pub overall_confidence: Option<f64>,
    #[serde(skip)]
    pub record: Option<FinalRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_time_ms: u64,
    pub outcomes: Vec<BatchOutcome>,
}

impl Coordinator {
    /// Run up to [`MAX_BATCH_SIZE`] documents in order.
    ///
    /// An empty or oversized batch is rejected as `MalformedInput` before any
    /// document is touched.
    #[instrument(skip_all, fields(documents = documents.len()))]
    pub async fn run_batch(&self, documents: Vec<BatchDocument>) -> Result<BatchReport> {
        if documents.is_empty() {
            return Err(FolioError::MalformedInput("batch contains no documents".into()));
        }
        if documents.len() > MAX_BATCH_SIZE {
            return Err(FolioError::MalformedInput(format!(
                "batch of {} documents exceeds the limit of {}",
                documents.len(),
                MAX_BATCH_SIZE
            )));
        }

        let batch_id = Uuid::new_v4();
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(documents.len());

        for document in documents {
            let doc_started = Instant::now();
            let outcome = match self.run(&document.bytes).await {
                Ok(record) => BatchOutcome {
                    name: document.name,
                    status: BatchStatus::Success,
                    error_message: None,
                    processing_time_ms: doc_started.elapsed().as_millis() as u64,
                    archive_id: record.archive_id.clone(),
                    overall_confidence: Some(record.overall_confidence),
                    record: Some(record),
                },
                Err(err) => {
                    warn!(document = %document.name, error = %err, "Batch document failed");
                    BatchOutcome {
                        name: document.name,
                        status: BatchStatus::Error,
                        error_message: Some(err.to_string()),
                        processing_time_ms: doc_started.elapsed().as_millis() as u64,
                        archive_id: None,
                        overall_confidence: None,
                        record: None,
                    }
                }
            };
            outcomes.push(outcome);
        }

        let successful = outcomes
            .iter()
            .filter(|o| o.status == BatchStatus::Success)
            .count();
        let report = BatchReport {
            batch_id,
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
            total_time_ms: started.elapsed().as_millis() as u64,
            outcomes,
        };
        info!(
            batch_id = %report.batch_id,
            successful = report.successful,
            failed = report.failed,
            "Batch complete"
        );
        Ok(report)
    }
}
