// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-run context: the shared scanner snapshot plus one write-once slot per
// later stage.
//
// Stages never see this type. The parallel group receives only the scanner
// findings; the coordinator fills the slots after the barrier and hands the
// assembled context to the validator.

use std::sync::Arc;

use folio_core::error::{FolioError, Result};
use folio_core::{
    HistorianFindings, LinguistFindings, RepairFindings, ScannerFindings, StageFindings,
    StageKind, ValidatorFindings,
};

/// A value that may be written exactly once.
#[derive(Debug, Clone)]
pub struct Slot<T> {
    stage: StageKind,
    value: Option<T>,
}

impl<T> Slot<T> {
    pub fn new(stage: StageKind) -> Self {
        Self { stage, value: None }
    }

    /// Store the value. A second write is rejected and leaves the first intact.
    pub fn fill(&mut self, value: T) -> Result<()> {
        if self.value.is_some() {
            return Err(FolioError::SlotAlreadyFilled(self.stage));
        }
        self.value = Some(value);
        Ok(())
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_filled(&self) -> bool {
        self.value.is_some()
    }
}

/// Everything known about a run once the parallel group has joined.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    scanner: Arc<ScannerFindings>,
    linguist: Slot<LinguistFindings>,
    historian: Slot<HistorianFindings>,
    repair: Slot<RepairFindings>,
    validator: Slot<ValidatorFindings>,
}

impl PipelineContext {
    pub fn new(scanner: Arc<ScannerFindings>) -> Self {
        Self {
            scanner,
            linguist: Slot::new(StageKind::Linguist),
            historian: Slot::new(StageKind::Historian),
            repair: Slot::new(StageKind::RepairAdvisor),
            validator: Slot::new(StageKind::Validator),
        }
    }

    /// Route findings into their stage's slot.
    ///
    /// Scanner findings are fixed at construction, so offering them again is
    /// treated as a second write.
    pub fn fill(&mut self, findings: StageFindings) -> Result<()> {
        match findings {
            StageFindings::Scanner(_) => Err(FolioError::SlotAlreadyFilled(StageKind::Scanner)),
            StageFindings::Linguist(f) => self.linguist.fill(f),
            StageFindings::Historian(f) => self.historian.fill(f),
            StageFindings::RepairAdvisor(f) => self.repair.fill(f),
            StageFindings::Validator(f) => self.validator.fill(f),
        }
    }

    pub fn scanner(&self) -> &ScannerFindings {
        &self.scanner
    }

    pub fn linguist(&self) -> Option<&LinguistFindings> {
        self.linguist.get()
    }

    pub fn historian(&self) -> Option<&HistorianFindings> {
        self.historian.get()
    }

    pub fn repair(&self) -> Option<&RepairFindings> {
        self.repair.get()
    }

    pub fn validator(&self) -> Option<&ValidatorFindings> {
        self.validator.get()
    }

    /// Normalised text if the linguist finished, otherwise the raw text.
    pub fn best_text(&self) -> &str {
        self.linguist()
            .map(|l| l.normalized_text.as_str())
            .unwrap_or(&self.scanner.raw_text)
    }

    pub fn verified_fact_count(&self) -> usize {
        self.historian().map(|h| h.verified_facts.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::scanner_findings;

    fn linguist(text: &str) -> LinguistFindings {
        LinguistFindings {
            normalized_text: text.into(),
            changes: vec![],
            historical_terms: vec![],
            cultural_markers: vec![],
            cultural_significance: 30,
            ai_notes: None,
        }
    }

    /// Writing a slot twice fails and keeps the first value.
    #[test]
    fn slot_is_write_once() {
        let mut slot = Slot::new(StageKind::Historian);
        assert!(!slot.is_filled());
        slot.fill(1).unwrap();
        let err = slot.fill(2).unwrap_err();
        assert!(matches!(err, FolioError::SlotAlreadyFilled(StageKind::Historian)));
        assert_eq!(slot.get(), Some(&1));
    }

    #[test]
    fn context_routes_findings_by_stage() {
        let mut ctx = PipelineContext::new(Arc::new(scanner_findings("raw text", 80.0)));
        assert_eq!(ctx.best_text(), "raw text");

        ctx.fill(StageFindings::Linguist(linguist("normalized"))).unwrap();
        assert_eq!(ctx.best_text(), "normalized");
        assert!(ctx.historian().is_none());
        assert_eq!(ctx.verified_fact_count(), 0);

        let again = ctx.fill(StageFindings::Linguist(linguist("other")));
        assert!(again.is_err());
        assert_eq!(ctx.best_text(), "normalized");
    }

    #[test]
    fn scanner_slot_cannot_be_refilled() {
        let scan = scanner_findings("raw", 80.0);
        let mut ctx = PipelineContext::new(Arc::new(scan.clone()));
        let err = ctx.fill(StageFindings::Scanner(scan)).unwrap_err();
        assert!(matches!(err, FolioError::SlotAlreadyFilled(StageKind::Scanner)));
    }
}
