//! Histogram component: which colours appear, and how much of the picture each covers.

use super::grid::{Grid, LEVELS_PER_CHANNEL};
use super::structural::STRUCTURAL_GRID;
use image::RgbImage;
use xxhash_rust::xxh3::xxh3_64;

/// Hash the sorted multiset of (bucket, cell count) pairs.
///
/// Buckets are counted over the same coarse grid the structural component
/// uses, so any re-encode that keeps the structural hash keeps this one too.
/// Unlike the structural hash it ignores where the colours sit.
pub fn histogram_hash(image: &RgbImage) -> u64 {
    let grid = Grid::from_image(image, STRUCTURAL_GRID);
    let levels = LEVELS_PER_CHANNEL as usize;
    let mut counts = vec![0u8; levels * levels * levels];

    for [r, g, b] in grid.quantized() {
        let bucket = (r as usize * levels + g as usize) * levels + b as usize;
        counts[bucket] += 1;
    }

    let mut entries: Vec<(u8, u8)> = counts
        .iter()
        .enumerate()
        .filter_map(|(bucket, &count)| (count > 0).then_some((count, bucket as u8)))
        .collect();

    // Most frequent first, bucket index breaks ties
    entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let bytes: Vec<u8> = entries.iter().flat_map(|(count, bucket)| [*bucket, *count]).collect();
    xxh3_64(&bytes)
}
