use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::Label;
use crate::sensing::{Method, ScanCase, StageTimings};

/// One row of `scan_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: String,
    pub scanned_at: DateTime<Utc>,
    pub domain: Option<String>,
    pub label: Label,
    pub method: Method,
    pub scan_case: ScanCase,
    pub distance: Option<u32>,
    pub phash: Option<String>,
    pub ocr_text: Option<String>,
    pub timings: StageTimings,
}
