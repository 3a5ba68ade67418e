// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline coordinator — sequences the stages of one run.
//
// Run lifecycle:
//
//   NotStarted → ScannerRunning → ParallelGroupRunning → BarrierReached
//              → FinalStageRunning → Completed
//
// `Errored` is reachable from any non-terminal state, but only a scanner
// failure gets there: later stages degrade to a warning and the run
// continues. Nothing is retried.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use folio_core::error::{FolioError, Result};
use folio_core::{
    ArchiveSink, ConfidenceLevel, FinalRecord, LanguageService, LayoutProfile, PipelineConfig,
    RestorationSummary, RunId, ScannerFindings, StageFindings, StageKind, StageMessage,
    StageResult, TextRecognizer, VisionService,
};

use crate::cache::{ContentHash, DedupCache};
use crate::context::PipelineContext;
use crate::guard::{GuardedLanguageService, UsageStats};
use crate::stages::{
    LinguistOptions, ScannerOptions, ValidatorOptions, aggregate_confidence, historian,
    linguist, repair, scanner, validator,
};

/// Relative change in text length above which transliteration is suspect.
pub const LENGTH_CHANGE_THRESHOLD: f64 = 0.3;

pub const NO_INCONSISTENCIES: &str = "No cross-stage inconsistencies detected.";

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    NotStarted,
    ScannerRunning,
    ParallelGroupRunning,
    BarrierReached,
    FinalStageRunning,
    Completed,
    Errored,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}

/// Progress reported to a streaming caller.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    State { run_id: RunId, state: RunState },
    Message(StageMessage),
    Failed { run_id: RunId, error: String },
}

/// Result of a cache-aware run.
#[derive(Debug, Clone)]
pub struct CachedRun {
    pub record: Arc<FinalRecord>,
    pub content_hash: ContentHash,
    pub from_cache: bool,
}

/// Scanner-only result returned by [`Coordinator::run_lite`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiteRecord {
    pub run_id: RunId,
    pub content_hash: String,
    pub from_cache: bool,
    pub processing_time_ms: u64,
    pub raw_text: String,
    pub ocr_confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub restoration: RestorationSummary,
    pub layout: LayoutProfile,
    pub messages: Vec<StageMessage>,
}

enum StageOutcome {
    Completed(StageResult),
    TimedOut(Duration),
    Failed(FolioError),
}

/// Forwards state changes and messages to an optional listener while
/// keeping the ordered message log for the record.
struct Emitter {
    run_id: RunId,
    state: RunState,
    events: Option<mpsc::Sender<PipelineEvent>>,
    messages: Vec<StageMessage>,
}

impl Emitter {
    fn new(run_id: RunId, events: Option<mpsc::Sender<PipelineEvent>>) -> Self {
        Self {
            run_id,
            state: RunState::NotStarted,
            events,
            messages: Vec::new(),
        }
    }

    async fn send(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).await.is_err() {
                debug!(run_id = %self.run_id, "Event receiver dropped");
            }
        }
    }

    async fn transition(&mut self, next: RunState) {
        debug!(run_id = %self.run_id, from = ?self.state, to = ?next, "Run state change");
        self.state = next;
        self.send(PipelineEvent::State {
            run_id: self.run_id,
            state: next,
        })
        .await;
    }

    async fn message(&mut self, message: StageMessage) {
        self.messages.push(message.clone());
        self.send(PipelineEvent::Message(message)).await;
    }

    async fn fail(&mut self, err: &FolioError) {
        self.transition(RunState::Errored).await;
        self.send(PipelineEvent::Failed {
            run_id: self.run_id,
            error: err.to_string(),
        })
        .await;
    }
}

/// `"Text length changed by N% after transliteration"` when normalisation
/// moved the length by more than 30%.
pub fn detect_inconsistencies(raw: &str, normalized: Option<&str>) -> Vec<String> {
    let Some(normalized) = normalized else {
        return Vec::new();
    };
    let raw_len = raw.chars().count();
    let normalized_len = normalized.chars().count();
    if raw_len == 0 && normalized_len == 0 {
        return Vec::new();
    }
    let change = raw_len.abs_diff(normalized_len) as f64 / raw_len.max(1) as f64;
    if change > LENGTH_CHANGE_THRESHOLD {
        vec![format!(
            "Text length changed by {:.0}% after transliteration",
            change * 100.0
        )]
    } else {
        Vec::new()
    }
}

/// Condense the scanner's findings for reporting.
pub fn summarize_restoration(
    scan: &ScannerFindings,
    extra_issues: &[String],
    quality_score: f64,
) -> RestorationSummary {
    let profile = &scan.profile;
    let mut detected_issues = profile.quality_issues.clone();
    detected_issues.extend(profile.characteristics.iter().cloned());
    detected_issues.extend(extra_issues.iter().cloned());

    let applied: Vec<String> = scan
        .operations_applied
        .iter()
        .map(|op| op.to_lowercase())
        .collect();
    let mentions = |needle: &str| applied.iter().any(|op| op.contains(needle));

    RestorationSummary {
        document_type: profile.document_type,
        detected_issues,
        enhancements_applied: scan.operations_applied.clone(),
        quality_score,
        skew_corrected: mentions("skew"),
        shadows_removed: mentions("shadow") || mentions("lighting"),
        yellowing_fixed: mentions("yellow"),
        image_regions_count: scan.layout.image_regions.len(),
    }
}

/// Runs documents through the stages.
pub struct Coordinator {
    config: PipelineConfig,
    recognizer: Arc<dyn TextRecognizer>,
    language: Option<Arc<GuardedLanguageService>>,
    vision: Option<Arc<dyn VisionService>>,
    archive: Option<Arc<dyn ArchiveSink>>,
    cache: DedupCache,
}

impl Coordinator {
    pub fn new(config: PipelineConfig, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            config,
            recognizer,
            language: None,
            vision: None,
            archive: None,
            cache: DedupCache::new(),
        }
    }

    /// Attach a language service. Every call goes through the guard.
    pub fn with_language_service(mut self, service: Arc<dyn LanguageService>) -> Self {
        self.language = Some(Arc::new(GuardedLanguageService::new(
            service,
            self.config.language.clone(),
        )));
        self
    }

    /// Attach a vision service for targeted repair of badly degraded pages.
    pub fn with_vision_service(mut self, service: Arc<dyn VisionService>) -> Self {
        self.vision = Some(service);
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn ArchiveSink>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    fn vision(&self) -> Option<&dyn VisionService> {
        self.vision.as_deref().filter(|_| self.config.targeted_repair)
    }

    /// Today's language-service spend, if a service is attached.
    pub fn usage_stats(&self) -> Option<UsageStats> {
        self.language.as_ref().map(|l| l.usage().stats())
    }

    /// Run every stage over one document.
    pub async fn run(&self, image_bytes: &[u8]) -> Result<FinalRecord> {
        self.execute(image_bytes, None, None).await
    }

    /// Like [`run`](Self::run), reporting progress on `events` as it happens.
    pub async fn run_streaming(
        &self,
        image_bytes: &[u8],
        events: mpsc::Sender<PipelineEvent>,
    ) -> Result<FinalRecord> {
        self.execute(image_bytes, Some(events), None).await
    }

    /// Answer from the deduplication cache when this exact input has been
    /// seen before; otherwise run and cache the record.
    pub async fn run_cached(&self, image_bytes: &[u8]) -> Result<CachedRun> {
        let content_hash = DedupCache::hash(image_bytes);
        if !self.config.cache_enabled {
            let record = self.execute(image_bytes, None, Some(content_hash)).await?;
            return Ok(CachedRun {
                record: Arc::new(record),
                content_hash,
                from_cache: false,
            });
        }

        let (entry, from_cache) = self
            .cache
            .get_or_compute(content_hash, || {
                self.execute(image_bytes, None, Some(content_hash))
            })
            .await?;
        if from_cache {
            info!(hash = %content_hash, run_id = %entry.record.run_id, "Served from cache");
        }
        Ok(CachedRun {
            record: Arc::clone(&entry.record),
            content_hash,
            from_cache,
        })
    }

    /// Scanner stage only. A cached full record is reused when present;
    /// lite results are never cached.
    pub async fn run_lite(&self, image_bytes: &[u8]) -> Result<LiteRecord> {
        let started = Instant::now();
        let content_hash = DedupCache::hash(image_bytes);

        if self.config.cache_enabled {
            if let Some(entry) = self.cache.get(&content_hash) {
                if let Some(StageFindings::Scanner(scan)) =
                    entry.record.stage(StageKind::Scanner).map(|s| &s.findings)
                {
                    let messages = entry
                        .record
                        .messages
                        .iter()
                        .filter(|m| m.stage == StageKind::Scanner)
                        .cloned()
                        .collect();
                    return Ok(lite_record(
                        entry.record.run_id,
                        content_hash,
                        true,
                        started,
                        scan,
                        messages,
                    ));
                }
            }
        }

        let run_id = RunId::new();
        let span = info_span!("lite_run", run_id = %run_id);
        let output = scanner::run(
            image_bytes,
            self.recognizer.as_ref(),
            self.vision(),
            ScannerOptions::from_config(&self.config),
        )
        .instrument(span)
        .await
        .map_err(|err| err.escalate(StageKind::Scanner))?;

        Ok(lite_record(
            run_id,
            content_hash,
            false,
            started,
            &output.findings,
            output.messages,
        ))
    }

    fn spawn_stage<F>(&self, stage: StageKind, work: F) -> JoinHandle<StageOutcome>
    where
        F: Future<Output = Result<StageResult>> + Send + 'static,
    {
        let limit = self.config.stage_timeout(stage);
        tokio::spawn(async move {
            match tokio::time::timeout(limit, work).await {
                Ok(Ok(result)) => StageOutcome::Completed(result),
                Ok(Err(err)) => StageOutcome::Failed(err.escalate(stage)),
                Err(_) => StageOutcome::TimedOut(limit),
            }
        })
    }

    async fn execute(
        &self,
        image_bytes: &[u8],
        events: Option<mpsc::Sender<PipelineEvent>>,
        content_hash: Option<ContentHash>,
    ) -> Result<FinalRecord> {
        let run_id = RunId::new();
        let span = info_span!("run", run_id = %run_id, bytes = image_bytes.len());
        self.execute_inner(run_id, image_bytes, events, content_hash)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        run_id: RunId,
        image_bytes: &[u8],
        events: Option<mpsc::Sender<PipelineEvent>>,
        content_hash: Option<ContentHash>,
    ) -> Result<FinalRecord> {
        let started = Instant::now();
        let mut emitter = Emitter::new(run_id, events);
        let mut stages: Vec<StageResult> = Vec::with_capacity(5);
        let mut warnings: Vec<String> = Vec::new();

        // Scanner (mandatory).
        emitter.transition(RunState::ScannerRunning).await;
        let output = match scanner::run(
            image_bytes,
            self.recognizer.as_ref(),
            self.vision(),
            ScannerOptions::from_config(&self.config),
        )
        .await
        {
            Ok(output) => output,
            Err(err) => {
                let err = err.escalate(StageKind::Scanner);
                error!(error = %err, "Scanner stage failed, aborting run");
                emitter.fail(&err).await;
                return Err(err);
            }
        };
        for message in &output.messages {
            emitter.message(message.clone()).await;
        }
        let scan = Arc::new(output.findings);
        stages.push(StageResult::new(
            StageFindings::Scanner(ScannerFindings {
                enhanced_png: Vec::new(),
                ..(*scan).clone()
            }),
            scan.ocr_confidence,
            output.messages,
        ));

        // Parallel group.
        emitter.transition(RunState::ParallelGroupRunning).await;
        let tokens = self.config.language.max_output_tokens;
        let linguist_task = {
            let scan = Arc::clone(&scan);
            let language = self.language.clone().filter(|_| self.config.linguist_ai);
            let options = LinguistOptions {
                low_ocr_threshold: self.config.low_ocr_threshold,
                max_output_tokens: tokens,
            };
            self.spawn_stage(StageKind::Linguist, async move {
                let language = language.as_deref().map(|l| l as &dyn LanguageService);
                linguist::run(&scan, language, &options).await
            })
        };
        let historian_task = {
            let scan = Arc::clone(&scan);
            let language = self.language.clone().filter(|_| self.config.historian_ai);
            self.spawn_stage(StageKind::Historian, async move {
                let language = language.as_deref().map(|l| l as &dyn LanguageService);
                historian::run(&scan, language, tokens).await
            })
        };
        let repair_task = {
            let scan = Arc::clone(&scan);
            self.spawn_stage(StageKind::RepairAdvisor, async move {
                Ok(repair::assess(&scan))
            })
        };
        let (linguist_joined, historian_joined, repair_joined) =
            tokio::join!(linguist_task, historian_task, repair_task);

        // Barrier.
        emitter.transition(RunState::BarrierReached).await;
        let mut context = PipelineContext::new(Arc::clone(&scan));
        let mut parallel: Vec<StageResult> = Vec::with_capacity(3);
        for (stage, joined) in [
            (StageKind::Linguist, linguist_joined),
            (StageKind::Historian, historian_joined),
            (StageKind::RepairAdvisor, repair_joined),
        ] {
            match joined {
                Ok(StageOutcome::Completed(result)) => {
                    match context.fill(result.findings.clone()) {
                        Ok(()) => parallel.push(result),
                        Err(err) => {
                            warn!(%stage, error = %err, "Discarding duplicate stage result");
                            warnings.push(format!("{} result discarded: {}", stage, err));
                        }
                    }
                }
                Ok(StageOutcome::TimedOut(limit)) => {
                    warn!(%stage, timeout_secs = limit.as_secs(), "Stage timed out");
                    warnings.push(format!(
                        "{} timed out after {}s - findings omitted",
                        stage,
                        limit.as_secs()
                    ));
                }
                Ok(StageOutcome::Failed(err)) => {
                    warn!(%stage, error = %err, "Stage failed");
                    warnings.push(format!("{} failed - findings omitted: {}", stage, err));
                }
                Err(join_err) => {
                    warn!(%stage, error = %join_err, "Stage task aborted");
                    warnings.push(format!("{} failed - findings omitted: {}", stage, join_err));
                }
            }
        }

        let mut parallel_messages: Vec<StageMessage> = parallel
            .iter()
            .flat_map(|r| r.messages.iter().cloned())
            .collect();
        parallel_messages.sort_by_key(|m| m.at);
        for message in parallel_messages {
            emitter.message(message).await;
        }
        stages.extend(parallel);

        // Inconsistency detection.
        let normalized_text = context.linguist().map(|l| l.normalized_text.clone());
        let inconsistencies = detect_inconsistencies(&scan.raw_text, normalized_text.as_deref());
        if inconsistencies.is_empty() {
            emitter
                .message(
                    StageMessage::new(StageKind::Validator, NO_INCONSISTENCIES)
                        .with_confidence(85.0),
                )
                .await;
        } else {
            for inconsistency in &inconsistencies {
                warn!(%inconsistency, "Cross-stage inconsistency");
                emitter
                    .message(StageMessage::new(
                        StageKind::Validator,
                        format!("Inconsistency: {}", inconsistency),
                    ))
                    .await;
            }
        }

        // Final stage.
        emitter.transition(RunState::FinalStageRunning).await;
        let mut prior_warnings = warnings.clone();
        prior_warnings.extend(inconsistencies.iter().cloned());
        let reconstruction = self.language.clone().filter(|_| self.config.reconstruction);
        let validator_result = validator::run(
            &context,
            &prior_warnings,
            reconstruction.as_deref().map(|l| l as &dyn LanguageService),
            &ValidatorOptions {
                reconstruction_timeout: self.config.stage_timeout(StageKind::Validator),
                max_output_tokens: tokens,
            },
        )
        .await;
        for message in &validator_result.messages {
            emitter.message(message.clone()).await;
        }
        if let Err(err) = context.fill(validator_result.findings.clone()) {
            warn!(error = %err, "Validator findings already recorded");
        }
        stages.push(validator_result);

        // Completed.
        let validator_warnings = context
            .validator()
            .map(|v| v.warnings.clone())
            .unwrap_or_default();
        let mut all_warnings = validator_warnings.clone();
        all_warnings.extend(inconsistencies.iter().cloned());
        all_warnings.extend(warnings);

        let overall_confidence = aggregate_confidence(
            scan.ocr_confidence,
            context.verified_fact_count(),
            all_warnings.len(),
        );
        let (repair_recommendations, damage_hotspots) = context
            .repair()
            .map(|r| (r.recommendations.clone(), r.hotspots.clone()))
            .unwrap_or_default();

        let mut record = FinalRecord {
            run_id,
            content_hash: content_hash.map(|h| h.to_hex()),
            created_at: Utc::now(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            stages,
            messages: std::mem::take(&mut emitter.messages),
            overall_confidence,
            confidence_level: ConfidenceLevel::from_score(overall_confidence),
            inconsistencies,
            warnings: all_warnings,
            restoration: summarize_restoration(&scan, &validator_warnings, overall_confidence),
            layout: scan.layout.clone(),
            raw_text: scan.raw_text.clone(),
            normalized_text,
            reconstructed_text: context.validator().and_then(|v| v.reconstructed_text.clone()),
            repair_recommendations,
            damage_hotspots,
            archive_id: None,
        };

        if let Some(archive) = &self.archive {
            match archive.persist(&record).await {
                Ok(id) => {
                    info!(archive_id = %id, "Record archived");
                    record.archive_id = Some(id);
                }
                Err(err) => warn!(error = %err, "Archive write failed, continuing without archive id"),
            }
        }

        emitter.transition(RunState::Completed).await;
        info!(
            confidence = record.overall_confidence,
            warnings = record.warnings.len(),
            elapsed_ms = record.processing_time_ms,
            "Run complete"
        );
        Ok(record)
    }
}

fn lite_record(
    run_id: RunId,
    content_hash: ContentHash,
    from_cache: bool,
    started: Instant,
    scan: &ScannerFindings,
    messages: Vec<StageMessage>,
) -> LiteRecord {
    let score = if scan.ocr_confidence.is_finite() {
        scan.ocr_confidence.clamp(0.0, 100.0)
    } else {
        0.0
    };
    LiteRecord {
        run_id,
        content_hash: content_hash.to_hex(),
        from_cache,
        processing_time_ms: started.elapsed().as_millis() as u64,
        raw_text: scan.raw_text.clone(),
        ocr_confidence: scan.ocr_confidence,
        confidence_level: ConfidenceLevel::from_score(score),
        restoration: summarize_restoration(scan, &[], score),
        layout: scan.layout.clone(),
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{
        FailingArchive, FixedRecognizer, FixedVision, LETTER_1888, MemoryArchive, SlowLanguage,
        page_png,
    };

    fn coordinator(text: &str, ocr: f64) -> Coordinator {
        Coordinator::new(
            PipelineConfig::default(),
            Arc::new(FixedRecognizer::new(text, ocr)),
        )
    }

    async fn collect(mut rx: mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn states(events: &[PipelineEvent]) -> Vec<RunState> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::State { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// 45% growth is flagged, 10% is not.
    #[test]
    fn length_change_threshold() {
        let raw = "a".repeat(20);
        let grown = detect_inconsistencies(&raw, Some(&"a".repeat(29)));
        assert_eq!(grown, vec!["Text length changed by 45% after transliteration"]);
        assert!(detect_inconsistencies(&raw, Some(&"a".repeat(22))).is_empty());
        assert!(detect_inconsistencies(&raw, None).is_empty());
    }

    #[test]
    fn summary_flags_follow_operations() {
        let mut scan = crate::fixtures::scanner_findings("text", 80.0);
        scan.operations_applied = vec![
            "Skew corrected (2.1° via Hough)".into(),
            "Shadows removed (CLAHE)".into(),
        ];
        scan.profile.quality_issues = vec!["Document skew: 2.1°".into()];
        let summary = summarize_restoration(&scan, &["Low OCR confidence".to_string()], 64.0);
        assert!(summary.skew_corrected);
        assert!(summary.shadows_removed);
        assert!(!summary.yellowing_fixed);
        assert_eq!(
            summary.detected_issues,
            vec!["Document skew: 2.1°", "Low OCR confidence"]
        );
        assert_eq!(summary.quality_score, 64.0);
    }

    /// A clean page with a well-attested letter runs every stage.
    #[tokio::test]
    async fn clean_page_completes_all_stages() {
        let record = coordinator(LETTER_1888, 82.0).run(&page_png()).await.unwrap();

        let order: Vec<StageKind> = record.stages.iter().map(|s| s.stage()).collect();
        assert_eq!(order.len(), 5);
        assert_eq!(order[0], StageKind::Scanner);
        assert_eq!(order[4], StageKind::Validator);
        assert!(record.warnings.is_empty(), "{:?}", record.warnings);
        assert!(record.inconsistencies.is_empty());
        // 0.4 * 82 + 0.3 * 30 + 0.3 * 100
        assert!((record.overall_confidence - 71.8).abs() < 1e-9);
        assert_eq!(record.confidence_level, ConfidenceLevel::Medium);
        assert_eq!(record.restoration.enhancements_applied, vec!["minimal processing"]);
        assert!(!record.restoration.skew_corrected);
        assert_eq!(record.normalized_text.as_deref(), Some(LETTER_1888));
        assert!(record.reconstructed_text.is_none());
        assert!(record.archive_id.is_none());
        assert!(record.messages.iter().any(|m| m.text == NO_INCONSISTENCIES));
    }

    #[tokio::test]
    async fn malformed_input_ends_in_errored_state() {
        let (tx, rx) = mpsc::channel(64);
        let err = coordinator("unused", 82.0)
            .run_streaming(b"definitely not an image", tx)
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::MalformedInput(_)));

        let events = collect(rx).await;
        assert_eq!(states(&events), vec![RunState::ScannerRunning, RunState::Errored]);
        assert!(matches!(events.last(), Some(PipelineEvent::Failed { .. })));
    }

    /// Doke letters expand into digraphs, growing the text by half.
    #[tokio::test]
    async fn transliteration_growth_is_an_inconsistency() {
        let record = coordinator("ʃaʃaʃaʃaʃaʃaʃaʃaʃaʃa", 82.0)
            .run(&page_png())
            .await
            .unwrap();
        assert_eq!(
            record.inconsistencies,
            vec!["Text length changed by 50% after transliteration"]
        );
        assert!(record.warnings.contains(&record.inconsistencies[0]));
        assert!(!record.messages.iter().any(|m| m.text == NO_INCONSISTENCIES));
    }

    /// A parallel stage that overruns its budget is omitted, not fatal.
    #[tokio::test]
    async fn slow_stage_is_omitted_with_warning() {
        let config = PipelineConfig {
            historian_timeout_secs: 1,
            historian_ai: true,
            linguist_ai: false,
            reconstruction: false,
            ..PipelineConfig::default()
        };
        let coordinator = Coordinator::new(config, Arc::new(FixedRecognizer::new(LETTER_1888, 82.0)))
            .with_language_service(Arc::new(SlowLanguage(Duration::from_secs(30))));

        let record = coordinator.run(&page_png()).await.unwrap();
        assert!(record.stage(StageKind::Historian).is_none());
        assert!(record.stage(StageKind::Linguist).is_some());
        assert!(record.stage(StageKind::RepairAdvisor).is_some());
        assert_eq!(record.stages.len(), 4);
        assert!(
            record
                .warnings
                .contains(&"Historian timed out after 1s - findings omitted".to_string())
        );
        // No verified facts and one warning.
        assert!((record.overall_confidence - aggregate_confidence(82.0, 0, 1)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn overconfident_recognizer_stays_bounded() {
        let record = coordinator(LETTER_1888, 150.0).run(&page_png()).await.unwrap();
        assert!((0.0..=100.0).contains(&record.overall_confidence));
        assert!(record.stages.iter().all(|s| (0.0..=100.0).contains(&s.confidence)));
    }

    /// The second upload of the same bytes is answered from the cache.
    #[tokio::test]
    async fn repeated_upload_hits_cache() {
        let recognizer = Arc::new(FixedRecognizer::new(LETTER_1888, 82.0));
        let coordinator = Coordinator::new(PipelineConfig::default(), recognizer.clone());
        let page = page_png();

        let first = coordinator.run_cached(&page).await.unwrap();
        let second = coordinator.run_cached(&page).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.record.run_id, second.record.run_id);
        assert_eq!(
            first.record.content_hash.as_deref(),
            Some(first.content_hash.to_hex().as_str())
        );
        assert_eq!(recognizer.call_count(), 1);
        let stats = coordinator.cache().stats();
        assert_eq!((stats.size, stats.hits, stats.misses), (1, 1, 1));
    }

    #[tokio::test]
    async fn disabled_cache_always_runs() {
        let config = PipelineConfig {
            cache_enabled: false,
            ..PipelineConfig::default()
        };
        let recognizer = Arc::new(FixedRecognizer::new(LETTER_1888, 82.0));
        let coordinator = Coordinator::new(config, recognizer.clone());
        let page = page_png();

        let first = coordinator.run_cached(&page).await.unwrap();
        let second = coordinator.run_cached(&page).await.unwrap();
        assert!(!second.from_cache);
        assert_ne!(first.record.run_id, second.record.run_id);
        assert_eq!(recognizer.call_count(), 2);
        assert!(coordinator.cache().is_empty());
    }

    /// Lite runs reuse a cached full record but never populate the cache.
    #[tokio::test]
    async fn lite_run_reads_but_does_not_fill_cache() {
        let coordinator = coordinator(LETTER_1888, 82.0);
        let page = page_png();

        let lite = coordinator.run_lite(&page).await.unwrap();
        assert!(!lite.from_cache);
        assert_eq!(lite.raw_text, LETTER_1888);
        assert!(lite.messages.iter().all(|m| m.stage == StageKind::Scanner));
        assert!(coordinator.cache().is_empty());

        let full = coordinator.run_cached(&page).await.unwrap();
        let again = coordinator.run_lite(&page).await.unwrap();
        assert!(again.from_cache);
        assert_eq!(again.run_id, full.record.run_id);
    }

    /// A clean page never reaches the vision service.
    #[tokio::test]
    async fn clean_page_skips_damage_analysis() {
        let vision = Arc::new(FixedVision::water_stain());
        let record = coordinator(LETTER_1888, 82.0)
            .with_vision_service(vision.clone())
            .run(&page_png())
            .await
            .unwrap();
        assert_eq!(vision.call_count(), 0);
        assert_eq!(record.restoration.enhancements_applied, vec!["minimal processing"]);
    }

    #[tokio::test]
    async fn archive_id_is_recorded() {
        let archive = Arc::new(MemoryArchive::default());
        let record = coordinator(LETTER_1888, 82.0)
            .with_archive(archive.clone())
            .run(&page_png())
            .await
            .unwrap();
        assert_eq!(record.archive_id.as_deref(), Some("memory-1"));
        assert_eq!(archive.records.lock().unwrap().len(), 1);
    }

    /// A failing archive never fails the run.
    #[tokio::test]
    async fn archive_failure_is_tolerated() {
        let record = coordinator(LETTER_1888, 82.0)
            .with_archive(Arc::new(FailingArchive))
            .run(&page_png())
            .await
            .unwrap();
        assert!(record.archive_id.is_none());
        assert_eq!(record.stages.len(), 5);
    }

    /// Events arrive in lifecycle order and mirror the record's message log.
    #[tokio::test]
    async fn events_follow_the_lifecycle() {
        let (tx, rx) = mpsc::channel(512);
        let record = coordinator(LETTER_1888, 82.0)
            .run_streaming(&page_png(), tx)
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(
            states(&events),
            vec![
                RunState::ScannerRunning,
                RunState::ParallelGroupRunning,
                RunState::BarrierReached,
                RunState::FinalStageRunning,
                RunState::Completed,
            ]
        );
        let streamed: Vec<&StageMessage> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(streamed.len(), record.messages.len());
        assert_eq!(streamed[0].stage, StageKind::Scanner);
        assert_eq!(streamed.last().map(|m| m.stage), Some(StageKind::Validator));

        let scanner_done = streamed
            .iter()
            .rposition(|m| m.stage == StageKind::Scanner)
            .unwrap();
        let validator_start = streamed
            .iter()
            .position(|m| m.stage == StageKind::Validator)
            .unwrap();
        assert!(streamed[scanner_done + 1..validator_start]
            .iter()
            .all(|m| m.stage != StageKind::Scanner && m.stage != StageKind::Validator));
        assert!(RunState::Completed.is_terminal());
    }
}
