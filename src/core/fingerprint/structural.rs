//! Structural component: the shape of the picture at 8x8 resolution.

use super::grid::Grid;
use image::RgbImage;
use xxhash_rust::xxh3::xxh3_64;

/// Cells per side of the structural grid
pub const STRUCTURAL_GRID: u32 = 8;

/// Hash the quantized 8x8 thumbnail in row-major order
pub fn structural_hash(image: &RgbImage) -> u64 {
    let grid = Grid::from_image(image, STRUCTURAL_GRID);
    let bytes: Vec<u8> = grid.quantized().flatten().collect();
    xxh3_64(&bytes)
}
