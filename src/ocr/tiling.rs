use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// One cell of a `rows × cols` partition over an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub row: u32,
    pub col: u32,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    fn intersects(&self, other: &Tile) -> bool {
        let x_overlap = self.left < other.left + other.width && other.left < self.left + self.width;
        let y_overlap = self.top < other.top + other.height && other.top < self.top + self.height;
        x_overlap && y_overlap
    }
}

/// Splits `width × height` into a row-major grid. Cells share the integer
/// quotient of each side; the last row and column absorb the remainder.
pub fn partition(width: u32, height: u32, rows: u32, cols: u32) -> ScanResult<Vec<Tile>> {
    if rows == 0 || cols == 0 {
        return Err(ScanError::InvalidConfig(format!(
            "OCR grid must have at least one row and column, got {rows}x{cols}"
        )));
    }

    let base_width = width / cols;
    let base_height = height / rows;
    let mut tiles = Vec::with_capacity((rows * cols) as usize);

    for row in 0..rows {
        let top = row * base_height;
        let tile_height = if row == rows - 1 { height - top } else { base_height };
        for col in 0..cols {
            let left = col * base_width;
            let tile_width = if col == cols - 1 { width - left } else { base_width };
            tiles.push(Tile {
                row,
                col,
                left,
                top,
                width: tile_width,
                height: tile_height,
            });
        }
    }

    Ok(tiles)
}

/// True when `tiles` cover `[0, width) × [0, height)` exactly once.
pub fn covers_exactly(tiles: &[Tile], width: u32, height: u32) -> bool {
    let in_bounds = tiles
        .iter()
        .all(|t| t.left + t.width <= width && t.top + t.height <= height);
    let area: u64 = tiles.iter().map(Tile::area).sum();
    let disjoint = tiles.iter().enumerate().all(|(i, a)| {
        tiles[i + 1..]
            .iter()
            .all(|b| a.is_empty() || b.is_empty() || !a.intersects(b))
    });
    in_bounds && disjoint && area == width as u64 * height as u64
}
