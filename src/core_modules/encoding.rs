// THEORY:
// Encoding turns a normalized strip into a binary template. Each filter of the
// bank is convolved with the strip (mean removed) and the sign of the response is
// kept: one bit per strip cell per filter. The strip's columns are angles, so the
// convolution wraps around horizontally; rows are radii, so it clamps vertically.
//
// The template stacks the per-filter bit planes vertically: filter `k` owns rows
// `k*height .. (k+1)*height`. Bits are stored as 255 (set) or 0 (clear) so the
// template is an ordinary grayscale image on disk.

use image::{GrayImage, Luma};
use nalgebra::DMatrix;

use crate::core_modules::resources::FilterBank;
use crate::errors::{PipelineError, Result};

pub const BIT_SET: u8 = 255;
pub const BIT_CLEAR: u8 = 0;

/// Builds the iris code of `strip`, `strip.width() x strip.height() * filters.len()`.
pub fn encode(strip: &GrayImage, filters: &FilterBank) -> Result<GrayImage> {
    if filters.is_empty() {
        return Err(PipelineError::Encoding("the filter bank is empty".into()));
    }
    let (width, height) = strip.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::Encoding("the normalized image is empty".into()));
    }

    let count = (width * height) as f32;
    let mean = strip.pixels().map(|p| p.0[0] as f32).sum::<f32>() / count;
    let centered = DMatrix::from_fn(height as usize, width as usize, |row, col| {
        strip.get_pixel(col as u32, row as u32).0[0] as f32 - mean
    });

    let mut code = GrayImage::new(width, height * filters.len() as u32);
    for (k, filter) in filters.iter().enumerate() {
        let offset = k as u32 * height;
        for row in 0..height as usize {
            for col in 0..width as usize {
                let bit = if respond(&centered, filter, row, col) > 0.0 {
                    BIT_SET
                } else {
                    BIT_CLEAR
                };
                code.put_pixel(col as u32, offset + row as u32, Luma([bit]));
            }
        }
    }
    Ok(code)
}

/// Filter response anchored at the filter's center cell.
fn respond(strip: &DMatrix<f32>, filter: &DMatrix<f32>, row: usize, col: usize) -> f32 {
    let (rows, cols) = (strip.nrows() as i64, strip.ncols() as i64);
    let anchor_row = (filter.nrows() / 2) as i64;
    let anchor_col = (filter.ncols() / 2) as i64;

    let mut sum = 0.0;
    for i in 0..filter.nrows() {
        let r = (row as i64 + i as i64 - anchor_row).clamp(0, rows - 1) as usize;
        for j in 0..filter.ncols() {
            let c = (col as i64 + j as i64 - anchor_col).rem_euclid(cols) as usize;
            sum += filter[(i, j)] * strip[(r, c)];
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal_derivative() -> FilterBank {
        FilterBank::new(vec![DMatrix::from_row_slice(1, 3, &[-1.0, 0.0, 1.0])])
    }

    #[test]
    fn code_stacks_one_plane_per_filter() {
        let strip = GrayImage::from_fn(16, 4, |x, y| Luma([(x * 10 + y) as u8]));
        let bank = FilterBank::new(vec![
            DMatrix::from_row_slice(1, 3, &[-1.0, 0.0, 1.0]),
            DMatrix::from_row_slice(3, 1, &[-1.0, 0.0, 1.0]),
        ]);
        let code = encode(&strip, &bank).unwrap();
        assert_eq!(code.dimensions(), (16, 8));
        assert!(code.pixels().all(|p| p.0[0] == BIT_SET || p.0[0] == BIT_CLEAR));
    }

    #[test]
    fn horizontal_derivative_wraps_around_the_angle() {
        // A ramp along the columns: rising everywhere except at the seam.
        let strip = GrayImage::from_fn(8, 2, |x, _| Luma([(x * 20) as u8]));
        let code = encode(&strip, &horizontal_derivative()).unwrap();

        for col in 1..7 {
            assert_eq!(code.get_pixel(col, 0).0[0], BIT_SET, "column {col}");
        }
        // Column 7 sees column 0 on its right, column 0 sees column 7 on its left.
        assert_eq!(code.get_pixel(7, 0).0[0], BIT_CLEAR);
        assert_eq!(code.get_pixel(0, 1).0[0], BIT_CLEAR);
    }

    #[test]
    fn empty_filter_bank_is_an_encoding_error() {
        let strip = GrayImage::new(4, 4);
        let err = encode(&strip, &FilterBank::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Encoding(_)));
    }
}
