// THEORY:
// Matching compares two iris codes bit by bit, counting only the bits that both
// eyes trust. A bit is trusted when the normalized mask of each eye marks its
// strip cell valid and the application mask keeps that cell. The application
// mask and the normalized masks are `width x height` (one strip); the codes are
// `n` strips stacked vertically, so every plane reuses the same masks.
//
// Head tilt rotates the iris, which shifts the strip's columns. The score is the
// smallest fractional Hamming distance over circular shifts of up to
// `MAX_SHIFT` columns in each direction.

use image::GrayImage;

use crate::core_modules::resources::{ApplicationMask, INVALID};
use crate::errors::{PipelineError, Result};

/// Largest column shift tried in each direction.
pub const MAX_SHIFT: i64 = 8;

/// One side of a comparison.
#[derive(Debug, Clone, Copy)]
pub struct Template<'a> {
    pub code: &'a GrayImage,
    /// Normalized mask; `None` means every cell is valid.
    pub mask: Option<&'a GrayImage>,
}

/// Fractional Hamming distance in `[0, 1]` between two templates.
pub fn distance(
    first: Template<'_>,
    second: Template<'_>,
    application_mask: Option<&ApplicationMask>,
) -> Result<f32> {
    let (width, code_height) = first.code.dimensions();
    if second.code.dimensions() != (width, code_height) {
        return Err(PipelineError::Matching(format!(
            "iris codes differ in size: {}x{} vs {}x{}",
            width,
            code_height,
            second.code.width(),
            second.code.height()
        )));
    }

    let strip_height = first
        .mask
        .or(second.mask)
        .map(GrayImage::height)
        .or(application_mask.map(ApplicationMask::height))
        .unwrap_or(code_height);
    if strip_height == 0 || width == 0 || code_height % strip_height != 0 {
        return Err(PipelineError::Matching(format!(
            "iris code height {code_height} is not a multiple of the strip height {strip_height}"
        )));
    }
    for mask in [first.mask, second.mask].into_iter().flatten() {
        if mask.dimensions() != (width, strip_height) {
            return Err(PipelineError::Matching(format!(
                "normalized mask is {}x{}, expected {width}x{strip_height}",
                mask.width(),
                mask.height()
            )));
        }
    }
    if let Some(app) = application_mask {
        if (app.width(), app.height()) != (width, strip_height) {
            return Err(PipelineError::Matching(format!(
                "application mask is {}x{}, expected {width}x{strip_height}",
                app.width(),
                app.height()
            )));
        }
    }

    let trusted = |mask: Option<&GrayImage>, col: u32, row: u32| {
        mask.is_none_or(|m| m.get_pixel(col, row).0[0] != INVALID)
    };

    let mut best: Option<f32> = None;
    for shift in -MAX_SHIFT..=MAX_SHIFT {
        let mut compared = 0u64;
        let mut differing = 0u64;
        for row in 0..code_height {
            let strip_row = row % strip_height;
            for col in 0..width {
                let shifted = (col as i64 + shift).rem_euclid(width as i64) as u32;
                let valid = trusted(first.mask, col, strip_row)
                    && trusted(second.mask, shifted, strip_row)
                    && application_mask.is_none_or(|app| app.is_valid(strip_row, col));
                if !valid {
                    continue;
                }
                compared += 1;
                let a = first.code.get_pixel(col, row).0[0] > 127;
                let b = second.code.get_pixel(shifted, row).0[0] > 127;
                if a != b {
                    differing += 1;
                }
            }
        }
        if compared > 0 {
            let score = differing as f32 / compared as f32;
            if best.is_none_or(|current| score < current) {
                best = Some(score);
            }
        }
    }

    best.ok_or_else(|| PipelineError::Matching("no valid bits in common".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    fn striped_code(width: u32, height: u32, period: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            Luma([if (x / period + y) % 2 == 0 { 255 } else { 0 }])
        })
    }

    fn bare(code: &GrayImage) -> Template<'_> {
        Template { code, mask: None }
    }

    #[test]
    fn identical_codes_score_zero() {
        let code = striped_code(32, 8, 3);
        let score = distance(bare(&code), bare(&code), None).unwrap();
        assert_relative_eq!(score, 0.0);
    }

    #[test]
    fn rotation_within_the_shift_range_is_absorbed() {
        let code = striped_code(32, 8, 5);
        let rotated = GrayImage::from_fn(32, 8, |x, y| *code.get_pixel((x + 3) % 32, y));
        let score = distance(bare(&code), bare(&rotated), None).unwrap();
        assert_relative_eq!(score, 0.0);
    }

    #[test]
    fn inverted_codes_score_one() {
        // Constant rows, so no shift helps.
        let code = GrayImage::from_fn(16, 4, |_, y| Luma([if y % 2 == 0 { 255 } else { 0 }]));
        let inverted = GrayImage::from_fn(16, 4, |x, y| Luma([255 - code.get_pixel(x, y).0[0]]));
        let score = distance(bare(&code), bare(&inverted), None).unwrap();
        assert_relative_eq!(score, 1.0);
    }

    #[test]
    fn only_trusted_bits_are_counted() {
        // Codes agree on the left half and disagree on the right half.
        let first = GrayImage::from_pixel(32, 2, Luma([255]));
        let second = GrayImage::from_fn(32, 2, |x, _| Luma([if x < 16 { 255 } else { 0 }]));
        let left_only = GrayImage::from_fn(32, 2, |x, _| Luma([if x < 8 { 255 } else { 0 }]));

        let score = distance(
            Template { code: &first, mask: Some(&left_only) },
            bare(&second),
            None,
        )
        .unwrap();
        assert_relative_eq!(score, 0.0);
    }

    #[test]
    fn application_mask_applies_to_every_plane() {
        let first = GrayImage::from_pixel(16, 4, Luma([255]));
        // Two planes of height 2; row 1 of each plane disagrees everywhere.
        let second = GrayImage::from_fn(16, 4, |_, y| Luma([if y % 2 == 1 { 0 } else { 255 }]));
        let mut app = ApplicationMask::full(16, 2);
        assert_eq!(app.valid_count(), 32);

        let score = distance(bare(&first), bare(&second), Some(&app)).unwrap();
        assert_relative_eq!(score, 0.5);

        app = ApplicationMask::from_points(16, 2, &[(0, 0), (0, 5)]);
        let score = distance(bare(&first), bare(&second), Some(&app)).unwrap();
        assert_relative_eq!(score, 0.0);
    }

    #[test]
    fn no_common_bits_is_a_matching_error() {
        let code = GrayImage::from_pixel(8, 2, Luma([255]));
        let nothing = GrayImage::from_pixel(8, 2, Luma([INVALID]));
        let err = distance(
            Template { code: &code, mask: Some(&nothing) },
            bare(&code),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no valid bits"));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let a = GrayImage::new(8, 2);
        let b = GrayImage::new(8, 4);
        assert!(distance(bare(&a), bare(&b), None).is_err());
    }
}
