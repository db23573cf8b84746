use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::Label;
use crate::sensing::{ScanCase, SkipReason, StageTimings};

/// One tick as seen by the metrics collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleMetrics {
    pub timestamp: DateTime<Utc>,
    pub case: Option<ScanCase>,
    pub label: Option<Label>,
    pub skipped: Option<SkipReason>,
    pub error: Option<String>,
    pub distance: Option<u32>,
    pub timings: StageTimings,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

impl CycleMetrics {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            case: None,
            label: None,
            skipped: None,
            error: None,
            distance: None,
            timings: StageTimings::default(),
            cpu_percent: 0.0,
            memory_mb: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_cycles: Vec<CycleMetrics>,
    pub cycle_count: u64,
    pub pipeline_count: u64,
    pub reuse_count: u64,
    pub whitelist_count: u64,
    pub error_count: u64,
    pub skip_count: u64,
}
