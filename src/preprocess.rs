//! Screenshot → model image tensor.
//!
//! The transform must match what the classifier was trained on bit for bit:
//! fit the longest side, letterbox onto the target canvas, rescale, normalize
//! to `[0, 1]`, then lay channels out as `[3, W, H]` (width-major inside each
//! plane, which is *not* the conventional `[C, H, W]`).

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::error::{ScanError, ScanResult};

const RESIZE_FILTER: FilterType = FilterType::Triangle;
const LETTERBOX_FILL: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn longest_side(&self) -> u32 {
        self.width.max(self.height)
    }

    /// Final working resolution after applying `scale`.
    pub fn scaled(&self, scale: f32) -> (u32, u32) {
        let apply = |side: u32| ((side as f64 * scale as f64).round() as u32).max(1);
        (apply(self.width), apply(self.height))
    }
}

impl Default for TargetSize {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

/// Channel-first normalized image, dims `[1, 3, W, H]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    dims: [usize; 4],
}

impl ImageTensor {
    pub fn dims(&self) -> [usize; 4] {
        self.dims
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_parts(self) -> (Vec<f32>, [usize; 4]) {
        (self.data, self.dims)
    }

    /// Value of channel `ch` at source pixel (`row`, `col`).
    pub fn value_at(&self, ch: usize, row: usize, col: usize) -> f32 {
        let [_, _, width, height] = self.dims;
        self.data[ch * width * height + col * height + row]
    }
}

/// Output of [`process`]: the tensor for the model and the canvas it was
/// built from, kept for display.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub tensor: ImageTensor,
    pub thumbnail: RgbaImage,
}

impl Preprocessed {
    pub fn thumbnail_png(&self) -> ScanResult<Vec<u8>> {
        encode_png(&self.thumbnail)
    }
}

pub fn process(frame: &Frame, target: TargetSize, scale_factor: f32) -> ScanResult<Preprocessed> {
    if target.width == 0 || target.height == 0 {
        return Err(ScanError::InvalidConfig("target size must be non-zero".into()));
    }
    if !scale_factor.is_finite() || scale_factor <= 0.0 {
        return Err(ScanError::InvalidConfig(format!(
            "scale factor must be positive, got {scale_factor}"
        )));
    }

    let source = frame.image().to_rgba8();
    let fitted = fit_longest_side(source, target.longest_side());
    let canvas = letterbox(&fitted, target);

    let (final_width, final_height) = target.scaled(scale_factor);
    let working = if (final_width, final_height) == (target.width, target.height) {
        canvas
    } else {
        imageops::resize(&canvas, final_width, final_height, RESIZE_FILTER)
    };

    let tensor = to_channel_first(&working);
    Ok(Preprocessed {
        tensor,
        thumbnail: working,
    })
}

/// Downscales so the longest side equals `max_side`; smaller images pass through.
fn fit_longest_side(image: RgbaImage, max_side: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_side {
        return image;
    }

    let ratio = max_side as f64 / longest as f64;
    let (new_width, new_height) = if width >= height {
        (max_side, ((height as f64 * ratio).round() as u32).max(1))
    } else {
        (((width as f64 * ratio).round() as u32).max(1), max_side)
    };
    imageops::resize(&image, new_width, new_height, RESIZE_FILTER)
}

/// Centers `image` on a black canvas of exactly `target`. Offsets are
/// `floor((target - scaled) / 2)`; a negative offset crops.
fn letterbox(image: &RgbaImage, target: TargetSize) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(target.width, target.height, LETTERBOX_FILL);
    let (x, y) = letterbox_offsets(image.dimensions(), target);
    imageops::overlay(&mut canvas, image, x, y);
    canvas
}

fn letterbox_offsets((width, height): (u32, u32), target: TargetSize) -> (i64, i64) {
    let x = (target.width as i64 - width as i64).div_euclid(2);
    let y = (target.height as i64 - height as i64).div_euclid(2);
    (x, y)
}

/// Drops alpha, divides by 255 and writes pixel (`r`, `c`) channel `ch` to
/// `ch * W * H + c * H + r`.
fn to_channel_first(image: &RgbaImage) -> ImageTensor {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);
    let plane = width * height;
    let mut data = vec![0f32; 3 * plane];

    for (col, row, pixel) in image.enumerate_pixels() {
        let base = col as usize * height + row as usize;
        for ch in 0..3 {
            data[ch * plane + base] = pixel[ch] as f32 / 255.0;
        }
    }

    ImageTensor {
        data,
        dims: [1, 3, width, height],
    }
}

pub fn encode_png(image: &RgbaImage) -> ScanResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|err| ScanError::ImageDecode(format!("thumbnail encoding failed: {err}")))?;
    Ok(buffer.into_inner())
}
