//! Model scoring: builds the named input tensors, runs the cached session and
//! turns two output logits into a label.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{ScanError, ScanResult};
use crate::preprocess::ImageTensor;
use crate::tokenizer::TokenBuffer;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "Inference";

use crate::{log_error, log_info};

pub const IMAGE_INPUT: &str = "image";
pub const INPUT_IDS_INPUT: &str = "input_ids";
pub const ATTENTION_MASK_INPUT: &str = "attention_mask";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Benign,
    Malicious,
    Error,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Benign => "benign",
            Label::Malicious => "malicious",
            Label::Error => "error",
        }
    }
}

/// Element type the loaded model expects for `attention_mask`. The tokenizer
/// always produces integers; `Float32` casts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskDType {
    Float32,
    Int64,
}

impl Default for MaskDType {
    fn default() -> Self {
        MaskDType::Float32
    }
}

/// The three feeds the classifier is called with.
#[derive(Debug, Clone)]
pub struct ModelInputs {
    pub image: Tensor,
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
}

impl ModelInputs {
    pub fn named(&self) -> [(&'static str, &Tensor); 3] {
        [
            (IMAGE_INPUT, &self.image),
            (INPUT_IDS_INPUT, &self.input_ids),
            (ATTENTION_MASK_INPUT, &self.attention_mask),
        ]
    }
}

/// A loaded classifier. `run` returns the raw logits tensor (two values).
pub trait ScoringSession: Send + Sync {
    fn run(&self, inputs: &ModelInputs) -> Result<Tensor>;
}

/// Loads the classifier. Expensive; the engine calls it until it succeeds
/// once and never again afterwards.
pub trait SessionLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn ScoringSession>>;
}

impl<F> SessionLoader for F
where
    F: Fn() -> Result<Arc<dyn ScoringSession>> + Send + Sync,
{
    fn load(&self) -> Result<Arc<dyn ScoringSession>> {
        self()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutcome {
    pub label: Label,
    pub logits: Option<[f32; 2]>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

pub struct InferenceEngine {
    loader: Arc<dyn SessionLoader>,
    session: OnceCell<Arc<dyn ScoringSession>>,
    device: Device,
    max_length: usize,
    mask_dtype: MaskDType,
}

impl InferenceEngine {
    pub fn new(loader: Arc<dyn SessionLoader>, max_length: usize, mask_dtype: MaskDType) -> Self {
        Self {
            loader,
            session: OnceCell::new(),
            device: Device::Cpu,
            max_length,
            mask_dtype,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.initialized()
    }

    /// Never fails: any problem building tensors, loading or running the model
    /// comes back as `Label::Error`.
    pub async fn classify(&self, image: ImageTensor, tokens: TokenBuffer) -> InferenceOutcome {
        let start = Instant::now();
        match self.try_classify(image, tokens).await {
            Ok(logits) => {
                let label = decide(logits);
                let elapsed_ms = start.elapsed().as_millis() as u64;
                log_info!(
                    "logits [{:.4}, {:.4}] -> {} in {}ms",
                    logits[0],
                    logits[1],
                    label.as_str(),
                    elapsed_ms
                );
                InferenceOutcome {
                    label,
                    logits: Some(logits),
                    elapsed_ms,
                    error: None,
                }
            }
            Err(err) => {
                log_error!("classification failed: {err}");
                InferenceOutcome {
                    label: Label::Error,
                    logits: None,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn try_classify(&self, image: ImageTensor, tokens: TokenBuffer) -> ScanResult<[f32; 2]> {
        let inputs = build_inputs(image, tokens, self.max_length, self.mask_dtype, &self.device)?;
        let session = self.session().await?;

        let logits = tokio::task::spawn_blocking(move || session.run(&inputs))
            .await
            .map_err(|err| ScanError::Inference(format!("model worker join failed: {err}")))?
            .map_err(|err| ScanError::Inference(format!("{err:#}")))?;

        read_logits(&logits)
    }

    async fn session(&self) -> ScanResult<Arc<dyn ScoringSession>> {
        let session = self
            .session
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let load_start = Instant::now();
                let session = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|err| ScanError::Inference(format!("model loader join failed: {err}")))?
                    .map_err(|err| ScanError::Inference(format!("model load failed: {err:#}")))?;
                log_info!("scoring session ready in {}ms", load_start.elapsed().as_millis());
                Ok::<_, ScanError>(session)
            })
            .await?;
        Ok(Arc::clone(session))
    }
}

/// `malicious` only when the second logit is strictly larger; ties are benign.
pub fn decide(logits: [f32; 2]) -> Label {
    if logits[1] > logits[0] {
        Label::Malicious
    } else {
        Label::Benign
    }
}

pub fn build_inputs(
    image: ImageTensor,
    tokens: TokenBuffer,
    max_length: usize,
    mask_dtype: MaskDType,
    device: &Device,
) -> ScanResult<ModelInputs> {
    if tokens.input_ids.len() != max_length || tokens.attention_mask.len() != max_length {
        return Err(ScanError::Inference(format!(
            "token buffers must be {max_length} long, got {} ids and {} mask values",
            tokens.input_ids.len(),
            tokens.attention_mask.len()
        )));
    }

    let tensor_err = |err: candle_core::Error| ScanError::Inference(format!("tensor construction failed: {err}"));

    let (data, [batch, channels, width, height]) = image.into_parts();
    let image = Tensor::from_vec(data, (batch, channels, width, height), device).map_err(tensor_err)?;
    let input_ids = Tensor::from_vec(tokens.input_ids, (1, max_length), device).map_err(tensor_err)?;
    let mask = Tensor::from_vec(tokens.attention_mask, (1, max_length), device).map_err(tensor_err)?;
    let attention_mask = match mask_dtype {
        MaskDType::Float32 => mask.to_dtype(DType::F32).map_err(tensor_err)?,
        MaskDType::Int64 => mask,
    };

    Ok(ModelInputs {
        image,
        input_ids,
        attention_mask,
    })
}

fn read_logits(output: &Tensor) -> ScanResult<[f32; 2]> {
    let values = output
        .flatten_all()
        .and_then(|flat| flat.to_dtype(DType::F32))
        .and_then(|flat| flat.to_vec1::<f32>())
        .map_err(|err| ScanError::Inference(format!("unreadable model output: {err}")))?;
    match values.as_slice() {
        [benign, malicious] => Ok([*benign, *malicious]),
        _ => Err(ScanError::Inference(format!(
            "expected exactly two logits, got {}",
            values.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedLogits(Vec<f32>);

    impl ScoringSession for FixedLogits {
        fn run(&self, _inputs: &ModelInputs) -> Result<Tensor> {
            Ok(Tensor::from_vec(self.0.clone(), (1, self.0.len()), &Device::Cpu)?)
        }
    }

    /// Records the shape and dtype of every feed it is called with.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(&'static str, Vec<usize>, DType)>>,
    }

    impl ScoringSession for Recording {
        fn run(&self, inputs: &ModelInputs) -> Result<Tensor> {
            let mut seen = self.seen.lock().unwrap();
            for (name, tensor) in inputs.named() {
                seen.push((name, tensor.dims().to_vec(), tensor.dtype()));
            }
            Ok(Tensor::new(&[0.0f32, 1.0], &Device::Cpu)?)
        }
    }

    fn image(width: usize, height: usize) -> ImageTensor {
        let img = image::RgbaImage::new(width as u32, height as u32);
        let frame = crate::capture::Frame::new(image::DynamicImage::ImageRgba8(img), chrono::Utc::now());
        crate::preprocess::process(
            &frame,
            crate::preprocess::TargetSize::new(width as u32, height as u32),
            1.0,
        )
        .unwrap()
        .tensor
    }

    fn tokens(len: usize) -> TokenBuffer {
        TokenBuffer {
            input_ids: vec![101; len],
            attention_mask: vec![1; len],
        }
    }

    fn engine_with(session: Arc<dyn ScoringSession>, mask: MaskDType) -> InferenceEngine {
        let loader = move || -> Result<Arc<dyn ScoringSession>> { Ok(Arc::clone(&session)) };
        InferenceEngine::new(Arc::new(loader), 8, mask)
    }

    #[test]
    fn decision_rule_prefers_benign_on_ties() {
        assert_eq!(decide([0.2, 0.9]), Label::Malicious);
        assert_eq!(decide([0.9, 0.2]), Label::Benign);
        assert_eq!(decide([0.5, 0.5]), Label::Benign);
    }

    #[tokio::test]
    async fn classifies_from_session_logits() {
        let engine = engine_with(Arc::new(FixedLogits(vec![0.2, 0.9])), MaskDType::Float32);
        let outcome = engine.classify(image(4, 2), tokens(8)).await;
        assert_eq!(outcome.label, Label::Malicious);
        assert_eq!(outcome.logits, Some([0.2, 0.9]));
        assert!(outcome.error.is_none());

        let engine = engine_with(Arc::new(FixedLogits(vec![0.5, 0.5])), MaskDType::Float32);
        assert_eq!(engine.classify(image(4, 2), tokens(8)).await.label, Label::Benign);
    }

    #[tokio::test]
    async fn feeds_have_the_expected_shapes_and_types() {
        let recording = Arc::new(Recording::default());
        let engine = engine_with(recording.clone(), MaskDType::Float32);
        engine.classify(image(6, 4), tokens(8)).await;

        let seen = recording.seen.lock().unwrap();
        assert_eq!(seen[0], (IMAGE_INPUT, vec![1, 3, 6, 4], DType::F32));
        assert_eq!(seen[1], (INPUT_IDS_INPUT, vec![1, 8], DType::I64));
        assert_eq!(seen[2], (ATTENTION_MASK_INPUT, vec![1, 8], DType::F32));
    }

    #[tokio::test]
    async fn integer_mask_is_kept_when_configured() {
        let recording = Arc::new(Recording::default());
        let engine = engine_with(recording.clone(), MaskDType::Int64);
        engine.classify(image(2, 2), tokens(8)).await;
        assert_eq!(recording.seen.lock().unwrap()[2].2, DType::I64);
    }

    #[tokio::test]
    async fn session_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let loader = move || -> Result<Arc<dyn ScoringSession>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedLogits(vec![1.0, 0.0])))
        };
        let engine = InferenceEngine::new(Arc::new(loader), 8, MaskDType::Float32);
        assert!(!engine.is_loaded());
        for _ in 0..3 {
            assert_eq!(engine.classify(image(2, 2), tokens(8)).await.label, Label::Benign);
        }
        assert!(engine.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_become_error_label() {
        struct Broken;
        impl ScoringSession for Broken {
            fn run(&self, _inputs: &ModelInputs) -> Result<Tensor> {
                Err(anyhow!("execution provider crashed"))
            }
        }
        let engine = engine_with(Arc::new(Broken), MaskDType::Float32);
        let outcome = engine.classify(image(2, 2), tokens(8)).await;
        assert_eq!(outcome.label, Label::Error);
        assert!(outcome.error.unwrap().contains("execution provider crashed"));

        let engine = engine_with(Arc::new(FixedLogits(vec![0.3])), MaskDType::Float32);
        assert_eq!(engine.classify(image(2, 2), tokens(8)).await.label, Label::Error);

        let engine = engine_with(Arc::new(FixedLogits(vec![0.3, 0.1])), MaskDType::Float32);
        assert_eq!(engine.classify(image(2, 2), tokens(5)).await.label, Label::Error);
    }

    #[tokio::test]
    async fn extra_logits_are_rejected() {
        let engine = engine_with(Arc::new(FixedLogits(vec![0.1, 0.9, 0.4])), MaskDType::Float32);
        let outcome = engine.classify(image(2, 2), tokens(8)).await;
        assert_eq!(outcome.label, Label::Error);
        assert_eq!(outcome.logits, None);
        assert!(outcome.error.unwrap().contains("got 3"));
    }

    #[tokio::test]
    async fn failed_load_is_retried_next_call() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let loader = move || -> Result<Arc<dyn ScoringSession>> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow!("model file locked"))
            } else {
                Ok(Arc::new(FixedLogits(vec![0.0, 1.0])))
            }
        };
        let engine = InferenceEngine::new(Arc::new(loader), 8, MaskDType::Float32);
        assert_eq!(engine.classify(image(2, 2), tokens(8)).await.label, Label::Error);
        assert_eq!(engine.classify(image(2, 2), tokens(8)).await.label, Label::Malicious);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
