use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::error::{ScanError, ScanResult};
use crate::inference::MaskDType;
use crate::preprocess::TargetSize;

/// Every tunable of the scanner. Unknown keys are ignored and missing keys
/// take their defaults, so older settings files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanSettings {
    /// Hash grid side; the hash has `grid_size²` bits.
    pub grid_size: u32,
    /// Distances at or above this re-run the full pipeline.
    pub hamming_threshold: u32,
    pub scan_interval_ms: u64,
    pub ocr_rows: u32,
    pub ocr_cols: u32,
    pub ocr_workers: usize,
    /// Must match the sequence length the loaded model was exported with.
    pub max_token_length: usize,
    pub image_target_size: TargetSize,
    pub image_scale_factor: f32,
    pub attention_mask_dtype: MaskDType,
    pub pause_after_warning: bool,
    pub db_path: Option<PathBuf>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            grid_size: 8,
            hamming_threshold: 3,
            scan_interval_ms: 5_000,
            ocr_rows: 3,
            ocr_cols: 3,
            ocr_workers: 4,
            max_token_length: 128,
            image_target_size: TargetSize::default(),
            image_scale_factor: 0.5,
            attention_mask_dtype: MaskDType::Float32,
            pause_after_warning: false,
            db_path: None,
        }
    }
}

impl ScanSettings {
    pub fn validate(&self) -> ScanResult<()> {
        let invalid = |message: String| Err(ScanError::InvalidConfig(message));

        if self.grid_size == 0 {
            return invalid("gridSize must be at least 1".into());
        }
        if self.scan_interval_ms == 0 {
            return invalid("scanIntervalMs must be positive".into());
        }
        if self.ocr_rows == 0 || self.ocr_cols == 0 {
            return invalid(format!(
                "OCR grid must be at least 1x1, got {}x{}",
                self.ocr_rows, self.ocr_cols
            ));
        }
        if self.ocr_workers == 0 {
            return invalid("ocrWorkers must be at least 1".into());
        }
        if self.max_token_length < 2 {
            return invalid(format!(
                "maxTokenLength must leave room for [CLS] and [SEP], got {}",
                self.max_token_length
            ));
        }
        if self.image_target_size.width == 0 || self.image_target_size.height == 0 {
            return invalid("imageTargetSize must be non-zero".into());
        }
        if !self.image_scale_factor.is_finite() || self.image_scale_factor <= 0.0 {
            return invalid(format!(
                "imageScaleFactor must be positive, got {}",
                self.image_scale_factor
            ));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ScanSettings>,
}

impl SettingsStore {
    /// Reads `path` if it exists; otherwise starts from defaults without
    /// creating the file.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            read_settings(&path)?
        } else {
            ScanSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> ScanSettings {
        self.read().clone()
    }

    /// Validates, stores and writes `settings` to disk.
    pub fn update(&self, settings: ScanSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let data = read_settings(&self.path)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &ScanSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, ScanSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ScanSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_settings(path: &PathBuf) -> Result<ScanSettings> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let settings: ScanSettings = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}
