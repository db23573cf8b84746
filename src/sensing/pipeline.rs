use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;

use crate::capture::Frame;
use crate::error::{ScanError, ScanResult};
use crate::inference::{InferenceEngine, Label};
use crate::ocr::{self, OcrWorkerPool};
use crate::preprocess::{self, Preprocessed, TargetSize};
use crate::tokenizer::TokenizerBridge;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "Pipeline";

use crate::log_debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub target_size: TargetSize,
    pub scale_factor: f32,
    pub ocr_rows: u32,
    pub ocr_cols: u32,
    pub max_token_length: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub label: Label,
    pub inference_error: Option<String>,
    pub ocr_text: String,
    pub thumbnail: RgbaImage,
    pub preprocess_ms: u64,
    pub ocr_ms: u64,
    pub tokenize_ms: u64,
    pub inference_ms: u64,
}

/// Preprocessor ∥ OCR → tokenizer → inference over one decoded frame.
pub struct Pipeline {
    config: PipelineConfig,
    ocr_pool: Arc<OcrWorkerPool>,
    tokenizer: TokenizerBridge,
    engine: InferenceEngine,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        ocr_pool: Arc<OcrWorkerPool>,
        tokenizer: TokenizerBridge,
        engine: InferenceEngine,
    ) -> Self {
        Self {
            config,
            ocr_pool,
            tokenizer,
            engine,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Decode, preprocessing and tile failures abort the run. Inference
    /// failures do not; they come back as `Label::Error`.
    pub async fn run(&self, frame: &Frame) -> ScanResult<PipelineOutput> {
        let config = self.config;

        let preprocessing = {
            let frame = frame.clone();
            async move {
                let start = Instant::now();
                let processed = tokio::task::spawn_blocking(move || {
                    preprocess::process(&frame, config.target_size, config.scale_factor)
                })
                .await
                .map_err(|err| ScanError::ImageDecode(format!("preprocess worker join failed: {err}")))??;
                Ok::<_, ScanError>((processed, start.elapsed().as_millis() as u64))
            }
        };
        let recognize = ocr::recognize(frame, config.ocr_rows, config.ocr_cols, &self.ocr_pool);

        let (preprocessed, recognized) = tokio::join!(preprocessing, recognize);
        let (Preprocessed { tensor, thumbnail }, preprocess_ms) = preprocessed?;
        let recognized = recognized?;
        log_debug!(
            "preprocess {}ms, OCR {}ms ({} chars)",
            preprocess_ms,
            recognized.elapsed_ms,
            recognized.text.len()
        );

        let tokenize_start = Instant::now();
        let tokens = self.tokenizer.tokenize(&recognized.text, config.max_token_length);
        let tokenize_ms = tokenize_start.elapsed().as_millis() as u64;

        let outcome = self.engine.classify(tensor, tokens).await;

        Ok(PipelineOutput {
            label: outcome.label,
            inference_error: outcome.error,
            ocr_text: recognized.text,
            thumbnail,
            preprocess_ms,
            ocr_ms: recognized.elapsed_ms,
            tokenize_ms,
            inference_ms: outcome.elapsed_ms,
        })
    }
}
