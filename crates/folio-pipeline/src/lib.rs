// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// folio-pipeline — Runs a page through the scanner, the parallel analysis
// group, and the validator, then assembles the final record.
//
// Also home to the deduplication cache, the guarded language-service
// wrapper, batch runs, and the JSON archive sink.

pub mod archive;
pub mod batch;
pub mod cache;
pub mod context;
pub mod coordinator;
pub mod guard;
pub mod stages;
pub mod text;

#[cfg(test)]
mod fixtures;

pub use archive::JsonDirectoryArchive;
pub use batch::{BatchDocument, BatchOutcome, BatchReport, BatchStatus, MAX_BATCH_SIZE};
pub use cache::{CacheEntry, CacheStats, ContentHash, DedupCache};
pub use context::PipelineContext;
pub use coordinator::{CachedRun, Coordinator, LiteRecord, PipelineEvent, RunState};
pub use guard::{GuardedLanguageService, UsageStats, UsageTracker};
