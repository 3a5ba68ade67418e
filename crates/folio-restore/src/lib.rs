// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// folio-restore — The image side of Folio.
//
// Measures page defects (skew, perspective, yellowing, shadows, blur, noise),
// applies the matching restoration operators, and analyses page layout. With
// the `ocr` feature it also provides a local text recognizer.

pub mod codec;
pub mod detect;
pub mod layout;
pub mod operators;
pub mod pipeline;
pub mod raster;
pub mod segments;

#[cfg(feature = "ocr")]
pub mod ocr;

#[cfg(test)]
mod testing;

pub use detect::analyze;
pub use layout::analyze_layout;
pub use operators::{SharpenLevel, targeted_repair};
pub use pipeline::{MINIMAL_PROCESSING, RestorationResult, guided_restore, restore};

#[cfg(feature = "ocr")]
pub use ocr::{LocalRecognizer, ModelPaths};
