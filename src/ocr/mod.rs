//! Tiled OCR: split a frame into a grid, recognize every tile on the worker
//! pool, stitch the text back together in row-major order.

mod pool;
mod tiling;

pub use pool::{OcrResult, OcrWorkerPool, RecognizerFactory, TextRecognizer};
pub use tiling::{covers_exactly, partition, Tile};

use std::time::Instant;

use image::{imageops, RgbaImage};
use tokio::sync::mpsc;

use crate::capture::Frame;
use crate::error::{ScanError, ScanResult};
use pool::OcrJob;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "Ocr";

use crate::log_debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrOutput {
    pub text: String,
    pub elapsed_ms: u64,
}

/// Recognizes `frame` as a `rows × cols` grid of independent jobs.
///
/// Waits for every tile. Any failed tile fails the whole call with the
/// lowest-ordered failing tile's coordinates; no partial text is returned.
pub async fn recognize(
    frame: &Frame,
    rows: u32,
    cols: u32,
    pool: &OcrWorkerPool,
) -> ScanResult<OcrOutput> {
    let start = Instant::now();
    let tiles = partition(frame.width(), frame.height(), rows, cols)?;
    debug_assert!(covers_exactly(&tiles, frame.width(), frame.height()));

    let crops = {
        let frame = frame.clone();
        let tiles = tiles.clone();
        tokio::task::spawn_blocking(move || crop_tiles(&frame, &tiles))
            .await
            .map_err(|err| ScanError::WorkerPool(format!("tile crop worker join failed: {err}")))?
    };

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<OcrResult>();
    let mut collected = Vec::with_capacity(tiles.len());
    let mut dispatched = Vec::with_capacity(tiles.len());

    for (tile, image) in crops {
        let Some(image) = image else {
            collected.push((tile, String::new()));
            continue;
        };
        pool.submit(OcrJob {
            tile,
            image,
            reply: reply_tx.clone(),
        })?;
        dispatched.push(tile);
    }
    drop(reply_tx);
    log_debug!("dispatched {} of {} tiles to {} workers", dispatched.len(), tiles.len(), pool.size());

    let mut failures: Vec<(Tile, String)> = Vec::new();
    while let Some(result) = reply_rx.recv().await {
        match result.text {
            Ok(text) => collected.push((result.tile, text)),
            Err(reason) => failures.push((result.tile, reason)),
        }
    }

    let answered = collected.len() + failures.len();
    if answered < tiles.len() {
        for tile in &dispatched {
            let seen = collected.iter().any(|(t, _)| t == tile) || failures.iter().any(|(t, _)| t == tile);
            if !seen {
                failures.push((*tile, "worker exited before replying".into()));
            }
        }
    }

    if let Some((tile, reason)) = failures.into_iter().min_by_key(|(t, _)| (t.row, t.col)) {
        return Err(ScanError::TileRecognition {
            row: tile.row,
            col: tile.col,
            reason,
        });
    }

    Ok(OcrOutput {
        text: assemble_text(collected),
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

/// Copies each non-empty tile out of the frame. Empty tiles map to `None`.
fn crop_tiles(frame: &Frame, tiles: &[Tile]) -> Vec<(Tile, Option<RgbaImage>)> {
    let pixels = frame.image().to_rgba8();
    tiles
        .iter()
        .map(|tile| {
            let image = (!tile.is_empty()).then(|| {
                imageops::crop_imm(&pixels, tile.left, tile.top, tile.width, tile.height).to_image()
            });
            (*tile, image)
        })
        .collect()
}

/// Orders tile texts by `(row, col)` and joins them with single spaces.
pub fn assemble_text(mut parts: Vec<(Tile, String)>) -> String {
    parts.sort_by_key(|(tile, _)| (tile.row, tile.col));
    parts
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join(" ")
}
