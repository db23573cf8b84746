use thiserror::Error;

/// Failures that abort a single scan cycle.
///
/// Everything except [`ScanError::Inference`] leaves the cached hash and
/// classification untouched; the next tick is the retry.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("screen capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("failed to decode captured image: {0}")]
    ImageDecode(String),

    #[error("OCR failed on tile ({row}, {col}): {reason}")]
    TileRecognition { row: u32, col: u32, reason: String },

    /// Hashes from different grid sizes were compared. Only reachable through
    /// a misconfiguration, so callers log it at error level.
    #[error("perceptual hash length mismatch: {left} bits vs {right} bits")]
    LengthMismatch { left: usize, right: usize },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("OCR worker pool unavailable: {0}")]
    WorkerPool(String),
}

impl ScanError {
    /// Tile coordinates for diagnostics, when the failure came from OCR.
    pub fn tile(&self) -> Option<(u32, u32)> {
        match self {
            ScanError::TileRecognition { row, col, .. } => Some((*row, *col)),
            _ => None,
        }
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_error_exposes_coordinates() {
        let err = ScanError::TileRecognition {
            row: 1,
            col: 2,
            reason: "engine crashed".into(),
        };
        assert_eq!(err.tile(), Some((1, 2)));
        assert_eq!(
            err.to_string(),
            "OCR failed on tile (1, 2): engine crashed"
        );
        assert_eq!(ScanError::Inference("x".into()).tile(), None);
    }
}
