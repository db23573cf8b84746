use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use image::RgbaImage;
use tokio::sync::{broadcast, Mutex};

use super::phash::{hamming_distance, PerceptualHash, PerceptualHasher};
use super::pipeline::{Pipeline, PipelineConfig};
use super::state::{
    ClassificationResult, CycleReport, MaliciousDetails, Method, ScanCase, ScanEvent, ScanState,
    SkipReason, StageTimings, TickOutcome,
};
use crate::allowlist::{registrable_domain, DomainAllowList};
use crate::capture::Frame;
use crate::error::{ScanError, ScanResult};
use crate::host::Collaborators;
use crate::inference::{InferenceEngine, Label, SessionLoader};
use crate::metrics::{CycleMetrics, MetricsCollector};
use crate::ocr::{OcrWorkerPool, RecognizerFactory};
use crate::preprocess;
use crate::settings::ScanSettings;
use crate::tokenizer::{Tokenizer, TokenizerBridge};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "Orchestrator";

use crate::{log_debug, log_error, log_info, log_warn};

const EVENT_CAPACITY: usize = 64;

/// Long-lived, expensive pieces the orchestrator borrows for every cycle.
pub struct ScanComponents {
    pub ocr_pool: Arc<OcrWorkerPool>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub session_loader: Arc<dyn SessionLoader>,
}

impl ScanComponents {
    /// Starts the OCR pool with `settings.ocr_workers` workers.
    pub fn build<F: RecognizerFactory>(
        settings: &ScanSettings,
        recognizers: F,
        tokenizer: Arc<dyn Tokenizer>,
        session_loader: Arc<dyn SessionLoader>,
    ) -> ScanResult<Self> {
        Ok(Self {
            ocr_pool: Arc::new(OcrWorkerPool::start(settings.ocr_workers, recognizers)?),
            tokenizer,
            session_loader,
        })
    }
}

/// Sets the scanning flag for the lifetime of one cycle.
struct ScanGuard<'a>(&'a AtomicBool);

impl<'a> ScanGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the scan state and drives one allow-list → hash gate → pipeline
/// cycle per tick. Only one cycle runs at a time; overlapping ticks skip.
pub struct Orchestrator {
    settings: ScanSettings,
    hasher: PerceptualHasher,
    allow_list: DomainAllowList,
    collaborators: Collaborators,
    pipeline: Pipeline,
    state: Mutex<ScanState>,
    scanning: AtomicBool,
    paused: AtomicBool,
    events: broadcast::Sender<ScanEvent>,
    metrics: MetricsCollector,
}

impl Orchestrator {
    pub fn new(
        settings: ScanSettings,
        collaborators: Collaborators,
        components: ScanComponents,
    ) -> ScanResult<Self> {
        settings.validate()?;

        let engine = InferenceEngine::new(
            components.session_loader,
            settings.max_token_length,
            settings.attention_mask_dtype,
        );
        let pipeline = Pipeline::new(
            PipelineConfig {
                target_size: settings.image_target_size,
                scale_factor: settings.image_scale_factor,
                ocr_rows: settings.ocr_rows,
                ocr_cols: settings.ocr_cols,
                max_token_length: settings.max_token_length,
            },
            components.ocr_pool,
            TokenizerBridge::new(components.tokenizer),
            engine,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            hasher: PerceptualHasher::new(settings.grid_size),
            settings,
            allow_list: DomainAllowList::new(),
            collaborators,
            pipeline,
            state: Mutex::new(ScanState::default()),
            scanning: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            events,
            metrics: MetricsCollector::new(),
        })
    }

    /// Builds the orchestrator and loads the allow-list. An unreadable
    /// allow-list is logged and scanning starts with an empty one.
    pub async fn start(
        settings: ScanSettings,
        collaborators: Collaborators,
        components: ScanComponents,
    ) -> ScanResult<Arc<Self>> {
        let orchestrator = Arc::new(Self::new(settings, collaborators, components)?);
        if let Err(err) = orchestrator.reload_allow_list().await {
            log_warn!("starting without an allow-list: {err:#}");
        }
        log_info!(
            "orchestrator ready (grid {}, threshold {}, OCR {}x{}, max tokens {})",
            orchestrator.settings.grid_size,
            orchestrator.settings.hamming_threshold,
            orchestrator.settings.ocr_rows,
            orchestrator.settings.ocr_cols,
            orchestrator.settings.max_token_length
        );
        Ok(orchestrator)
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn allow_list(&self) -> &DomainAllowList {
        &self.allow_list
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Read-only copy of the scan state.
    pub async fn get_current_state(&self) -> ScanState {
        let mut snapshot = self.state.lock().await.clone();
        snapshot.scan_in_progress = self.scanning.load(Ordering::Acquire);
        snapshot.paused = self.is_paused();
        snapshot
    }

    /// Re-reads the allow-list source. On failure the current list stays.
    pub async fn reload_allow_list(&self) -> anyhow::Result<usize> {
        let raw = self
            .collaborators
            .allow_list
            .load_allow_list_source()
            .await
            .context("failed to load allow-list source")?;
        Ok(self.allow_list.load(&raw))
    }

    pub fn resume_scans(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            log_info!("scanning resumed");
        }
    }

    /// Marks the cached verdict benign on the user's word and resumes
    /// scanning. Returns the rewritten classification, if there was one.
    pub async fn override_benign(&self) -> Option<ClassificationResult> {
        let overridden = {
            let mut state = self.state.lock().await;
            let overridden = state.previous_classification.as_mut().map(|previous| {
                previous.label = Label::Benign;
                previous.method = Method::UserOverride;
                previous.clone()
            });
            if let Some(result) = &overridden {
                state.last_result = Some(result.clone());
            }
            overridden
        };
        match &overridden {
            Some(result) => log_info!(
                "user marked {} benign",
                result.domain.as_deref().unwrap_or("<unknown>")
            ),
            None => log_debug!("override requested with no cached classification"),
        }
        self.resume_scans();
        overridden
    }

    /// Runs one scan cycle.
    ///
    /// `Err` means the cycle aborted (capture, decode, tile or hash failure)
    /// and the cached hash and classification were left as they were.
    pub async fn on_tick(&self) -> ScanResult<TickOutcome> {
        if self.is_paused() {
            return Ok(self.skip(SkipReason::Paused).await);
        }
        let Some(_guard) = ScanGuard::acquire(&self.scanning) else {
            return Ok(self.skip(SkipReason::ScanInProgress).await);
        };

        let started_at = Utc::now();
        let start = Instant::now();
        match self.run_cycle(start).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let total_ms = elapsed_ms(start);
                match &err {
                    ScanError::LengthMismatch { .. } => {
                        log_error!("hash gate misconfigured: {err}")
                    }
                    _ => log_warn!("scan cycle aborted after {}ms: {err}", total_ms),
                }
                self.publish(ScanEvent::CycleFailed {
                    message: err.to_string(),
                });
                self.metrics
                    .record_cycle(CycleMetrics {
                        error: Some(err.to_string()),
                        timings: StageTimings {
                            total_ms,
                            ..Default::default()
                        },
                        ..CycleMetrics::new(started_at)
                    })
                    .await;
                Err(err)
            }
        }
    }

    async fn run_cycle(&self, start: Instant) -> ScanResult<TickOutcome> {
        let domain = self
            .collaborators
            .tab
            .resolve_active_domain()
            .await
            .as_deref()
            .and_then(registrable_domain);

        if let Some(domain) = domain.as_deref() {
            if self.allow_list.contains(domain) {
                return Ok(self.finish_whitelisted(domain.to_string(), start).await);
            }
        }

        let capture = self.collaborators.screen.capture_screen().await?;

        let hash_start = Instant::now();
        let hasher = self.hasher;
        let (frame, hash) = tokio::task::spawn_blocking(move || -> ScanResult<(Frame, PerceptualHash)> {
            let frame = capture.decode()?;
            let hash = hasher.hash(frame.image());
            Ok((frame, hash))
        })
        .await
        .map_err(|err| ScanError::ImageDecode(format!("hash worker join failed: {err}")))??;
        let hash_ms = elapsed_ms(hash_start);

        let (previous_hash, previous_classification) = {
            let state = self.state.lock().await;
            (state.previous_hash.clone(), state.previous_classification.clone())
        };

        let (case, distance) = match (previous_hash.as_ref(), previous_classification.as_ref()) {
            (Some(previous), Some(_)) => {
                let distance = hamming_distance(previous, &hash)?;
                let case = if distance >= self.settings.hamming_threshold {
                    ScanCase::HashChanged
                } else {
                    ScanCase::HashStable
                };
                (case, Some(distance))
            }
            _ => (ScanCase::NoPriorHash, None),
        };

        if !case.runs_pipeline() {
            if let Some(previous) = previous_classification {
                return Ok(self.finish_reused(previous, &hash, distance, hash_ms, start).await);
            }
        }

        self.finish_pipeline(frame, hash, case, distance, domain, hash_ms, start)
            .await
    }

    async fn finish_whitelisted(&self, domain: String, start: Instant) -> TickOutcome {
        let timings = StageTimings {
            total_ms: elapsed_ms(start),
            ..Default::default()
        };
        let result = ClassificationResult {
            label: Label::Benign,
            method: Method::Whitelist,
            domain: Some(domain),
            scanned_at: Utc::now(),
            timings,
        };
        let report = CycleReport {
            case: ScanCase::Whitelisted,
            distance: None,
            phash: None,
            ocr_text: None,
            timings,
            error: None,
        };

        self.record_last(&result, &report).await;
        self.emit_result(&result, &report).await;
        TickOutcome::Classified {
            case: ScanCase::Whitelisted,
            result,
        }
    }

    /// The previous result is returned untouched; only the report carries
    /// this cycle's distance and timings.
    async fn finish_reused(
        &self,
        previous: ClassificationResult,
        hash: &PerceptualHash,
        distance: Option<u32>,
        hash_ms: u64,
        start: Instant,
    ) -> TickOutcome {
        let timings = StageTimings {
            hash_ms: Some(hash_ms),
            total_ms: elapsed_ms(start),
            ..Default::default()
        };
        let report = CycleReport {
            case: ScanCase::HashStable,
            distance,
            phash: Some(hash.to_base64()),
            ocr_text: None,
            timings,
            error: None,
        };

        self.record_last(&previous, &report).await;
        self.emit_result(&previous, &report).await;
        TickOutcome::Classified {
            case: ScanCase::HashStable,
            result: previous,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_pipeline(
        &self,
        frame: Frame,
        hash: PerceptualHash,
        case: ScanCase,
        distance: Option<u32>,
        domain: Option<String>,
        hash_ms: u64,
        start: Instant,
    ) -> ScanResult<TickOutcome> {
        let output = self.pipeline.run(&frame).await?;

        let timings = StageTimings {
            hash_ms: Some(hash_ms),
            preprocess_ms: Some(output.preprocess_ms),
            ocr_ms: Some(output.ocr_ms),
            tokenize_ms: Some(output.tokenize_ms),
            inference_ms: Some(output.inference_ms),
            total_ms: elapsed_ms(start),
        };
        let result = ClassificationResult {
            label: output.label,
            method: Method::Model,
            domain,
            scanned_at: frame.captured_at(),
            timings,
        };
        let report = CycleReport {
            case,
            distance,
            phash: Some(hash.to_base64()),
            ocr_text: Some(output.ocr_text),
            timings,
            error: output.inference_error,
        };

        {
            let mut state = self.state.lock().await;
            // An `error` verdict is shown but never cached.
            if result.label != Label::Error {
                state.previous_hash = Some(hash);
                state.previous_classification = Some(result.clone());
            }
        }
        self.record_last(&result, &report).await;
        self.emit_result(&result, &report).await;

        if result.is_malicious() {
            self.raise_warning(&result, output.thumbnail).await;
        }

        Ok(TickOutcome::Classified { case, result })
    }

    async fn raise_warning(&self, result: &ClassificationResult, thumbnail: RgbaImage) {
        let thumbnail_png =
            match tokio::task::spawn_blocking(move || preprocess::encode_png(&thumbnail)).await {
                Ok(Ok(png)) => png,
                Ok(Err(err)) => {
                    log_warn!("warning shown without thumbnail: {err}");
                    Vec::new()
                }
                Err(err) => {
                    log_warn!("thumbnail worker join failed: {err}");
                    Vec::new()
                }
            };
        let details = MaliciousDetails {
            domain: result.domain.clone(),
            scanned_at: result.scanned_at,
            thumbnail_png,
        };

        if self.settings.pause_after_warning {
            self.paused.store(true, Ordering::Release);
            log_info!("scanning paused until the warning is acknowledged");
        }

        self.collaborators
            .notifier
            .notify_malicious_detected(details.clone());
        self.publish(ScanEvent::MaliciousDetected { details });
    }

    async fn record_last(&self, result: &ClassificationResult, report: &CycleReport) {
        let mut state = self.state.lock().await;
        state.last_result = Some(result.clone());
        state.last_case = Some(report.case);
        state.last_distance = report.distance;
        state.last_elapsed_ms = Some(report.timings.total_ms);
    }

    async fn emit_result(&self, result: &ClassificationResult, report: &CycleReport) {
        log_cycle_summary(result, report);

        if let Err(err) = self.collaborators.sink.persist_result(result, report).await {
            log_warn!("failed to persist scan result: {err:#}");
        }
        self.publish(ScanEvent::ResultUpdated {
            result: result.clone(),
            report: report.clone(),
        });
        self.metrics
            .record_cycle(CycleMetrics {
                case: Some(report.case),
                label: Some(result.label),
                error: report.error.clone(),
                distance: report.distance,
                timings: report.timings,
                ..CycleMetrics::new(Utc::now())
            })
            .await;
    }

    async fn skip(&self, reason: SkipReason) -> TickOutcome {
        log_debug!("tick skipped: {:?}", reason);
        self.publish(ScanEvent::CycleSkipped { reason });
        self.metrics
            .record_cycle(CycleMetrics {
                skipped: Some(reason),
                ..CycleMetrics::new(Utc::now())
            })
            .await;
        TickOutcome::Skipped(reason)
    }

    fn publish(&self, event: ScanEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn log_cycle_summary(result: &ClassificationResult, report: &CycleReport) {
    let ms = |value: Option<u64>| value.map_or_else(|| "-".to_string(), |v| format!("{v}ms"));
    log_info!(
        "case {} ({}) -> {} via {} on {} | distance: {}, hash: {}, preprocess: {}, ocr: {}, tokenize: {}, inference: {}, total: {}ms",
        report.case.number(),
        report.case.as_str(),
        result.label.as_str(),
        result.method.as_str(),
        result.domain.as_deref().unwrap_or("<unknown>"),
        report.distance.map_or_else(|| "-".to_string(), |d| d.to_string()),
        ms(report.timings.hash_ms),
        ms(report.timings.preprocess_ms),
        ms(report.timings.ocr_ms),
        ms(report.timings.tokenize_ms),
        ms(report.timings.inference_ms),
        report.timings.total_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_guard_is_exclusive_and_releases_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = ScanGuard::acquire(&flag).unwrap();
        assert!(flag.load(Ordering::Acquire));
        assert!(ScanGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(!flag.load(Ordering::Acquire));
        assert!(ScanGuard::acquire(&flag).is_some());
    }
}
