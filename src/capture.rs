//! Captured screen images.
//!
//! A [`Capture`] is the encoded screenshot handed over by the host. It is
//! decoded exactly once per cycle into a [`Frame`], which the hash gate, the
//! preprocessor and the OCR scheduler all read from, so the hash decision is
//! always made on the same pixels the pipeline scores.

use std::io::Cursor;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat};

use crate::error::{ScanError, ScanResult};

/// Encoded screenshot plus the moment it was taken. Never mutated.
#[derive(Debug, Clone)]
pub struct Capture {
    bytes: Arc<Vec<u8>>,
    captured_at: DateTime<Utc>,
}

impl Capture {
    pub fn new(bytes: Vec<u8>, captured_at: DateTime<Utc>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            captured_at,
        }
    }

    /// Encodes an in-memory image as PNG, for hosts that grab raw pixels.
    pub fn from_image(image: &DynamicImage, captured_at: DateTime<Utc>) -> ScanResult<Self> {
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|err| ScanError::ImageDecode(format!("failed to encode capture: {err}")))?;
        Ok(Self::new(buffer.into_inner(), captured_at))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Decodes the screenshot. Format is sniffed from the bytes.
    pub fn decode(&self) -> ScanResult<Frame> {
        if self.bytes.is_empty() {
            return Err(ScanError::ImageDecode("capture is empty".into()));
        }
        let image = image::load_from_memory(&self.bytes)
            .map_err(|err| ScanError::ImageDecode(err.to_string()))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(ScanError::ImageDecode("capture has zero area".into()));
        }
        Ok(Frame {
            image: Arc::new(image),
            captured_at: self.captured_at,
        })
    }
}

/// Decoded capture shared read-only between concurrent stages.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<DynamicImage>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage, captured_at: DateTime<Utc>) -> Self {
        Self {
            image: Arc::new(image),
            captured_at,
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn decode_round_trips_dimensions() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 30, Rgba([9, 8, 7, 255])));
        let capture = Capture::from_image(&image, Utc::now()).unwrap();
        let frame = capture.decode().unwrap();
        assert_eq!((frame.width(), frame.height()), (40, 30));
        assert_eq!(frame.captured_at(), capture.captured_at());
    }

    #[test]
    fn garbage_bytes_fail_with_decode_error() {
        let capture = Capture::new(b"definitely not a png".to_vec(), Utc::now());
        assert!(matches!(capture.decode(), Err(ScanError::ImageDecode(_))));

        let empty = Capture::new(Vec::new(), Utc::now());
        assert!(matches!(empty.decode(), Err(ScanError::ImageDecode(_))));
    }
}
