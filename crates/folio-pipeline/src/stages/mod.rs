// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The five analysis stages of a run.
//
// The scanner runs first and alone. Linguist, historian, and repair advisor
// read only the scanner's findings and run in parallel. The validator runs
// last over everything the others produced.

pub mod historian;
pub mod linguist;
pub mod repair;
pub mod scanner;
pub mod validator;

pub use linguist::LinguistOptions;
pub use scanner::{ScannerOptions, ScannerOutput};
pub use validator::{ValidatorOptions, aggregate_confidence};
