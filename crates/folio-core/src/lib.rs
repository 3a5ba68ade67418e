// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Folio — Core types, errors, configuration, and collaborator traits shared
// across all crates.

pub mod config;
pub mod error;
pub mod record;
pub mod services;
pub mod types;

pub use config::{LanguageConfig, PipelineConfig};
pub use error::{FolioError, ServiceError};
pub use record::*;
pub use services::{ArchiveSink, LanguageService, Recognition, TextRecognizer, VisionService};
pub use types::*;
