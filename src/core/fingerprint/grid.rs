//! Block-average downsampling and colour quantization.

use image::RgbImage;

/// Quantization levels per colour channel
pub const LEVELS_PER_CHANNEL: u8 = 4;

/// A downsampled image: one averaged RGB triple per cell, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    pub size: u32,
    pub cells: Vec<[u8; 3]>,
}

impl Grid {
    /// Average `image` into `size` x `size` cells.
    ///
    /// Cell boundaries are computed with integer arithmetic so the result
    /// depends only on pixel values, never on float rounding of a resampler.
    /// Images smaller than the grid reuse edge pixels.
    pub fn from_image(image: &RgbImage, size: u32) -> Self {
        let (width, height) = image.dimensions();
        let mut cells = Vec::with_capacity((size * size) as usize);

        for cy in 0..size {
            let (y0, y1) = span(cy, size, height);
            for cx in 0..size {
                let (x0, x1) = span(cx, size, width);
                let mut sum = [0u64; 3];
                for y in y0..y1 {
                    for x in x0..x1 {
                        let pixel = image.get_pixel(x, y);
                        for channel in 0..3 {
                            sum[channel] += pixel[channel] as u64;
                        }
                    }
                }
                let count = ((x1 - x0) * (y1 - y0)) as u64;
                cells.push([
                    ((sum[0] + count / 2) / count) as u8,
                    ((sum[1] + count / 2) / count) as u8,
                    ((sum[2] + count / 2) / count) as u8,
                ]);
            }
        }

        Self { size, cells }
    }

    /// Cells with each channel reduced to [`LEVELS_PER_CHANNEL`] levels
    pub fn quantized(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.cells
            .iter()
            .map(|cell| [quantize(cell[0]), quantize(cell[1]), quantize(cell[2])])
    }
}

/// Pixel range covered by cell `index`, never empty
fn span(index: u32, cells: u32, extent: u32) -> (u32, u32) {
    let start = (index as u64 * extent as u64 / cells as u64) as u32;
    let end = ((index as u64 + 1) * extent as u64 / cells as u64) as u32;
    let start = start.min(extent.saturating_sub(1));
    (start, end.max(start + 1).min(extent.max(1)))
}

/// Map 0-255 onto 0..LEVELS_PER_CHANNEL
pub fn quantize(value: u8) -> u8 {
    value / (256 / LEVELS_PER_CHANNEL as u16) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn solid_image_averages_to_its_colour() {
        let image = RgbImage::from_pixel(40, 30, Rgb([10, 120, 250]));
        let grid = Grid::from_image(&image, 8);

        assert_eq!(grid.cells.len(), 64);
        assert!(grid.cells.iter().all(|c| *c == [10, 120, 250]));
    }

    #[test]
    fn tiny_images_still_fill_the_grid() {
        let image = RgbImage::from_pixel(1, 1, Rgb([7, 7, 7]));
        let grid = Grid::from_image(&image, 8);

        assert_eq!(grid.cells.len(), 64);
        assert!(grid.cells.iter().all(|c| *c == [7, 7, 7]));
    }

    #[test]
    fn halves_land_in_their_own_cells() {
        let image = RgbImage::from_fn(16, 16, |x, _| {
            if x < 8 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let grid = Grid::from_image(&image, 2);

        assert_eq!(grid.cells, vec![[0; 3], [255; 3], [0; 3], [255; 3]]);
    }

    #[test]
    fn quantize_uses_four_levels() {
        assert_eq!(quantize(0), 0);
        assert_eq!(quantize(63), 0);
        assert_eq!(quantize(64), 1);
        assert_eq!(quantize(191), 2);
        assert_eq!(quantize(255), 3);
    }
}
