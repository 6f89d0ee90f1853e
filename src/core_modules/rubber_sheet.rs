// THEORY:
// Normalization maps the iris annulus onto a fixed `width x height` strip
// (Daugman's rubber sheet). Column `c` is the angle `2*pi*c/width`, row `r` walks
// linearly from the pupil border (top) to the iris border (bottom) along that
// angle. Because both borders are sampled at the same angle, a pupil that is not
// concentric with the iris is handled for free.
//
// The image is sampled bilinearly; the mask with the nearest pixel, so a strip
// cell is valid only when the eye pixel it came from was valid. Cells that fall
// outside the eye image are invalid.

use image::{GrayImage, Luma};

use crate::core_modules::eye::Boundaries;
use crate::core_modules::resources::{INVALID, VALID};

/// Unrolls `image` (and `mask`, when present) between the two boundaries.
pub fn normalize(
    image: &GrayImage,
    mask: Option<&GrayImage>,
    boundaries: &Boundaries,
    width: u32,
    height: u32,
) -> (GrayImage, GrayImage) {
    let mut strip = GrayImage::new(width, height);
    let mut strip_mask = GrayImage::new(width, height);

    for col in 0..width {
        let angle = col as f64 / width as f64 * std::f64::consts::TAU;
        let (px, py) = boundaries.pupil.point_at(angle);
        let (ix, iy) = boundaries.iris.point_at(angle);

        for row in 0..height {
            let t = (row as f64 + 0.5) / height as f64;
            let x = px + t * (ix - px);
            let y = py + t * (iy - py);

            let value = bilinear(image, x, y);
            strip.put_pixel(col, row, Luma([value.unwrap_or(0)]));

            let valid = value.is_some()
                && mask.is_none_or(|m| nearest(m, x, y).is_some_and(|v| v != INVALID));
            strip_mask.put_pixel(col, row, Luma([if valid { VALID } else { INVALID }]));
        }
    }

    (strip, strip_mask)
}

fn nearest(image: &GrayImage, x: f64, y: f64) -> Option<u8> {
    let (x, y) = (x.round(), y.round());
    if x < 0.0 || y < 0.0 || x >= image.width() as f64 || y >= image.height() as f64 {
        return None;
    }
    Some(image.get_pixel(x as u32, y as u32).0[0])
}

fn bilinear(image: &GrayImage, x: f64, y: f64) -> Option<u8> {
    let (w, h) = (image.width() as f64, image.height() as f64);
    if x < 0.0 || y < 0.0 || x > w - 1.0 || y > h - 1.0 {
        return None;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let x1 = (x0 + 1.0).min(w - 1.0);
    let y1 = (y0 + 1.0).min(h - 1.0);

    let at = |px: f64, py: f64| image.get_pixel(px as u32, py as u32).0[0] as f64;
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    Some((top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::circle::{BoundaryCircle, Point};

    fn boundaries(cx: i32, cy: i32, pupil: i32, iris: i32) -> Boundaries {
        Boundaries {
            pupil: BoundaryCircle::new(Point::new(cx, cy), pupil).unwrap(),
            iris: BoundaryCircle::new(Point::new(cx, cy), iris).unwrap(),
        }
    }

    #[test]
    fn radial_gradient_becomes_a_vertical_gradient() {
        // Intensity grows with the distance from (50, 50).
        let image = GrayImage::from_fn(101, 101, |x, y| {
            let dx = x as f64 - 50.0;
            let dy = y as f64 - 50.0;
            Luma([((dx * dx + dy * dy).sqrt() * 4.0).min(255.0) as u8])
        });
        let (strip, mask) = normalize(&image, None, &boundaries(50, 50, 10, 40), 32, 8);

        assert_eq!(strip.dimensions(), (32, 8));
        for col in 0..32 {
            for row in 1..8 {
                assert!(strip.get_pixel(col, row).0[0] >= strip.get_pixel(col, row - 1).0[0]);
            }
        }
        assert!(mask.pixels().all(|p| p.0[0] == VALID));
    }

    #[test]
    fn mask_and_image_borders_invalidate_cells() {
        let image = GrayImage::from_pixel(60, 60, Luma([100]));
        // Right half of the eye is masked out.
        let eye_mask =
            GrayImage::from_fn(60, 60, |x, _| Luma([if x > 30 { INVALID } else { VALID }]));
        let (_, mask) = normalize(&image, Some(&eye_mask), &boundaries(30, 30, 5, 20), 16, 4);

        // Column 0 points right (x > 30), column 8 points left.
        assert_eq!(mask.get_pixel(0, 2).0[0], INVALID);
        assert_eq!(mask.get_pixel(8, 2).0[0], VALID);

        // An iris reaching past the image edge yields invalid outer rows.
        let (_, mask) = normalize(&image, None, &boundaries(5, 30, 3, 20), 16, 4);
        assert_eq!(mask.get_pixel(8, 3).0[0], INVALID);
        assert_eq!(mask.get_pixel(0, 0).0[0], VALID);
    }
}
