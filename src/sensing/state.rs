use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use super::phash::PerceptualHash;
use crate::inference::Label;

/// How a label was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Whitelist,
    Model,
    UserOverride,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Whitelist => "whitelist",
            Method::Model => "model",
            Method::UserOverride => "user_override",
        }
    }
}

/// Which branch of the hash gate a cycle took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanCase {
    /// Active domain is allow-listed; nothing is captured.
    Whitelisted,
    /// First capture since start; full pipeline.
    NoPriorHash,
    /// Distance reached the threshold; full pipeline.
    HashChanged,
    /// Distance below the threshold; previous classification reused.
    HashStable,
}

impl ScanCase {
    pub fn number(&self) -> u8 {
        match self {
            ScanCase::Whitelisted => 1,
            ScanCase::NoPriorHash => 2,
            ScanCase::HashChanged => 3,
            ScanCase::HashStable => 4,
        }
    }

    pub fn runs_pipeline(&self) -> bool {
        matches!(self, ScanCase::NoPriorHash | ScanCase::HashChanged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanCase::Whitelisted => "whitelisted",
            ScanCase::NoPriorHash => "no_prior_hash",
            ScanCase::HashChanged => "hash_changed",
            ScanCase::HashStable => "hash_stable",
        }
    }
}

/// Per-stage wall time in milliseconds. Stages that did not run are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    pub hash_ms: Option<u64>,
    pub preprocess_ms: Option<u64>,
    pub ocr_ms: Option<u64>,
    pub tokenize_ms: Option<u64>,
    pub inference_ms: Option<u64>,
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub label: Label,
    pub method: Method,
    pub domain: Option<String>,
    pub scanned_at: DateTime<Utc>,
    pub timings: StageTimings,
}

impl ClassificationResult {
    pub fn is_malicious(&self) -> bool {
        self.label == Label::Malicious
    }
}

/// What happened in one completed cycle, alongside the result it emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub case: ScanCase,
    pub distance: Option<u32>,
    pub phash: Option<String>,
    pub ocr_text: Option<String>,
    pub timings: StageTimings,
    pub error: Option<String>,
}

/// Payload for the warning dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaliciousDetails {
    pub domain: Option<String>,
    pub scanned_at: DateTime<Utc>,
    /// PNG of the canvas the model saw.
    pub thumbnail_png: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ScanInProgress,
    Paused,
}

/// Broadcast to subscribers after every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    ResultUpdated {
        result: ClassificationResult,
        report: CycleReport,
    },
    MaliciousDetected {
        details: MaliciousDetails,
    },
    CycleSkipped {
        reason: SkipReason,
    },
    CycleFailed {
        message: String,
    },
}

/// Return value of `Orchestrator::on_tick` when the cycle did not abort.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Classified {
        case: ScanCase,
        result: ClassificationResult,
    },
}

impl TickOutcome {
    pub fn case(&self) -> Option<ScanCase> {
        match self {
            TickOutcome::Classified { case, .. } => Some(*case),
            TickOutcome::Skipped(_) => None,
        }
    }

    pub fn result(&self) -> Option<&ClassificationResult> {
        match self {
            TickOutcome::Classified { result, .. } => Some(result),
            TickOutcome::Skipped(_) => None,
        }
    }
}

/// Orchestrator memory across cycles. `previous_*` only ever hold the last
/// successful model verdict; `last_result` is whatever was shown most recently,
/// including `error` results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanState {
    #[serde(serialize_with = "serialize_hash")]
    pub previous_hash: Option<PerceptualHash>,
    pub previous_classification: Option<ClassificationResult>,
    pub last_result: Option<ClassificationResult>,
    pub last_case: Option<ScanCase>,
    pub last_distance: Option<u32>,
    pub last_elapsed_ms: Option<u64>,
    pub scan_in_progress: bool,
    pub paused: bool,
}

fn serialize_hash<S: Serializer>(hash: &Option<PerceptualHash>, serializer: S) -> Result<S::Ok, S::Error> {
    match hash {
        Some(hash) => serializer.serialize_some(&hash.to_base64()),
        None => serializer.serialize_none(),
    }
}
