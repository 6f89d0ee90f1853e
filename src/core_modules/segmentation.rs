// THEORY:
// Segmentation locates the two boundaries of the iris annulus and turns them into
// a noise mask. It is a two-pass search, each pass finished by the algebraic
// circle fit:
//
// 1.  **Pupil**: the pupil is the darkest large structure of an eye image. Every
//     pixel within a small margin of the darkest gray level is a candidate; the
//     largest 4-connected candidate region is grown from its seeds and its border
//     pixels are the samples for the fit.
// 2.  **Iris**: rays are cast from the pupil center across the admissible iris
//     radii. Along each ray the iris/sclera border is the strongest dark-to-bright
//     step. Rays pointing into the upper eyelid are not cast.
// 3.  **Mask**: pixels inside the iris circle and outside the pupil circle are
//     valid, everything else is not.
//
// Pixel (x, y) covers the unit square starting at (x, y); samples handed to the
// fit are pixel centers.

use image::{GrayImage, Luma};

use crate::core_modules::circle::{BoundaryCircle, Point};
use crate::core_modules::eye::{Boundaries, SegmentationBounds};
use crate::core_modules::resources::{INVALID, VALID};
use crate::errors::{PipelineError, Result};

/// Gray levels above the darkest pixel that still count as pupil.
const PUPIL_DARKNESS_MARGIN: u8 = 35;
const IRIS_RAYS: usize = 90;
/// Rays whose direction has `sin(angle)` below the negated value point into the
/// upper eyelid.
const UPPER_EYELID_SIN: f64 = 0.7;
/// Smallest accepted two-sample step along a ray, in gray levels.
const MIN_EDGE_CONTRAST: i32 = 20;
/// Gap kept between the pupil border and the start of the iris search.
const PUPIL_CLEARANCE: i32 = 3;

/// Finds both boundaries and the matching noise mask.
pub fn segment(image: &GrayImage, bounds: &SegmentationBounds) -> Result<(Boundaries, GrayImage)> {
    let pupil = find_pupil(image, bounds)?;
    let iris = find_iris(image, &pupil, bounds)?;
    let boundaries = Boundaries { pupil, iris };
    let mask = build_mask(image.width(), image.height(), &boundaries);
    Ok((boundaries, mask))
}

pub fn find_pupil(image: &GrayImage, bounds: &SegmentationBounds) -> Result<BoundaryCircle> {
    let (width, height) = image.dimensions();
    let darkest = image
        .pixels()
        .map(|p| p.0[0])
        .min()
        .ok_or_else(|| PipelineError::Segmentation("empty image".into()))?;
    let threshold = darkest.saturating_add(PUPIL_DARKNESS_MARGIN);

    let is_dark = |x: i32, y: i32| {
        x >= 0
            && y >= 0
            && (x as u32) < width
            && (y as u32) < height
            && image.get_pixel(x as u32, y as u32).0[0] <= threshold
    };

    let mut visited = vec![false; (width * height) as usize];
    let mut largest: Vec<Point> = Vec::new();
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let index = (y as u32 * width + x as u32) as usize;
            if visited[index] || !is_dark(x, y) {
                continue;
            }
            let region = grow_region(Point::new(x, y), &is_dark, &mut visited, width);
            if region.len() > largest.len() {
                largest = region;
            }
        }
    }

    // Region border: a dark pixel with at least one bright (or off-image) neighbour.
    let border: Vec<[f64; 2]> = largest
        .iter()
        .filter(|p| {
            [(0, 1), (0, -1), (1, 0), (-1, 0)]
                .iter()
                .any(|(dx, dy)| !is_dark(p.x + dx, p.y + dy))
        })
        .map(|p| [p.x as f64 + 0.5, p.y as f64 + 0.5])
        .collect();

    let pupil = BoundaryCircle::from_points(&border)?;
    check_diameter("pupil", &pupil, bounds.min_pupil_diameter, bounds.max_pupil_diameter)?;
    tracing::debug!(
        "pupil at ({}, {}) r={} from {} border pixels",
        pupil.center().x,
        pupil.center().y,
        pupil.radius(),
        border.len()
    );
    Ok(pupil)
}

/// Iterative region growing over 4-neighbours.
fn grow_region(
    seed: Point,
    is_dark: &impl Fn(i32, i32) -> bool,
    visited: &mut [bool],
    width: u32,
) -> Vec<Point> {
    let mut region = Vec::new();
    let mut stack = vec![seed];
    visited[(seed.y as u32 * width + seed.x as u32) as usize] = true;

    while let Some(current) = stack.pop() {
        region.push(current);
        for (dx, dy) in [(0, 1), (0, -1), (1, 0), (-1, 0)] {
            let (nx, ny) = (current.x + dx, current.y + dy);
            if !is_dark(nx, ny) {
                continue;
            }
            let index = (ny as u32 * width + nx as u32) as usize;
            if !visited[index] {
                visited[index] = true;
                stack.push(Point::new(nx, ny));
            }
        }
    }
    region
}

pub fn find_iris(
    image: &GrayImage,
    pupil: &BoundaryCircle,
    bounds: &SegmentationBounds,
) -> Result<BoundaryCircle> {
    let center = pupil.center();
    let r_min = (pupil.radius() + PUPIL_CLEARANCE).max(bounds.min_iris_diameter / 2);
    let r_max = bounds.max_iris_diameter / 2;
    if r_min + 2 > r_max {
        return Err(PipelineError::Segmentation(format!(
            "no room for an iris between radius {r_min} and {r_max}"
        )));
    }

    let sample = |r: i32, cos: f64, sin: f64| -> Option<i32> {
        let x = (center.x as f64 + r as f64 * cos).round();
        let y = (center.y as f64 + r as f64 * sin).round();
        if x < 0.0 || y < 0.0 || x >= image.width() as f64 || y >= image.height() as f64 {
            return None;
        }
        Some(image.get_pixel(x as u32, y as u32).0[0] as i32)
    };

    let mut edges = Vec::with_capacity(IRIS_RAYS);
    for ray in 0..IRIS_RAYS {
        let angle = ray as f64 / IRIS_RAYS as f64 * std::f64::consts::TAU;
        let (sin, cos) = angle.sin_cos();
        if sin < -UPPER_EYELID_SIN {
            continue;
        }

        // profile[i] is the gray level at radius `r_min - 2 + i`.
        let profile: Vec<i32> = (r_min - 2..=r_max + 1)
            .map_while(|r| sample(r, cos, sin))
            .collect();

        let mut best: Option<(i32, i32)> = None;
        for i in 2..profile.len().saturating_sub(1) {
            let step = profile[i] + profile[i + 1] - profile[i - 1] - profile[i - 2];
            if best.is_none_or(|(_, strongest)| step > strongest) {
                best = Some((r_min - 2 + i as i32, step));
            }
        }

        if let Some((radius, step)) = best {
            if step >= MIN_EDGE_CONTRAST {
                edges.push([
                    center.x as f64 + radius as f64 * cos + 0.5,
                    center.y as f64 + radius as f64 * sin + 0.5,
                ]);
            }
        }
    }

    if edges.len() < 3 {
        return Err(PipelineError::Segmentation(format!(
            "iris border found on {} rays only",
            edges.len()
        )));
    }
    let iris = BoundaryCircle::from_points(&edges)?;
    check_diameter("iris", &iris, bounds.min_iris_diameter, bounds.max_iris_diameter)?;
    tracing::debug!(
        "iris at ({}, {}) r={} from {} rays",
        iris.center().x,
        iris.center().y,
        iris.radius(),
        edges.len()
    );
    Ok(iris)
}

fn check_diameter(name: &str, circle: &BoundaryCircle, min: i32, max: i32) -> Result<()> {
    let diameter = circle.diameter();
    if diameter < min || diameter > max {
        return Err(PipelineError::Segmentation(format!(
            "{name} diameter {diameter} outside {min}..{max}"
        )));
    }
    Ok(())
}

/// Valid between the two circles, invalid elsewhere.
pub fn build_mask(width: u32, height: u32, boundaries: &Boundaries) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as i32, y as i32);
        if boundaries.iris.contains(x, y) && !boundaries.pupil.contains(x, y) {
            Luma([VALID])
        } else {
            Luma([INVALID])
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    pub(crate) const PUPIL_RADIUS: i64 = 18;
    pub(crate) const IRIS_RADIUS: i64 = 50;

    /// Concentric disks: dark pupil, mid-gray iris, bright sclera.
    pub(crate) fn synthetic_eye(cx: i64, cy: i64) -> GrayImage {
        GrayImage::from_fn(200, 160, |x, y| {
            let dx = x as i64 - cx;
            let dy = y as i64 - cy;
            let d2 = dx * dx + dy * dy;
            if d2 <= PUPIL_RADIUS * PUPIL_RADIUS {
                Luma([20])
            } else if d2 <= IRIS_RADIUS * IRIS_RADIUS {
                Luma([120])
            } else {
                Luma([220])
            }
        })
    }

    pub(crate) fn eye_bounds() -> SegmentationBounds {
        SegmentationBounds {
            min_pupil_diameter: 20,
            max_pupil_diameter: 60,
            min_iris_diameter: 80,
            max_iris_diameter: 140,
        }
    }

    fn assert_near(actual: i32, expected: i64, tolerance: i64) {
        assert!(
            (actual as i64 - expected).abs() <= tolerance,
            "{actual} is not within {tolerance} of {expected}"
        );
    }

    #[test]
    fn finds_both_boundaries_of_a_synthetic_eye() {
        let image = synthetic_eye(100, 80);
        let (boundaries, mask) = segment(&image, &eye_bounds()).unwrap();

        assert_near(boundaries.pupil.center().x, 100, 1);
        assert_near(boundaries.pupil.center().y, 80, 1);
        assert_near(boundaries.pupil.radius(), PUPIL_RADIUS, 1);

        assert_near(boundaries.iris.center().x, 100, 2);
        assert_near(boundaries.iris.center().y, 80, 2);
        assert_near(boundaries.iris.radius(), IRIS_RADIUS, 2);

        assert_eq!(mask.dimensions(), image.dimensions());
        assert_eq!(mask.get_pixel(100, 80).0[0], INVALID);
        assert_eq!(mask.get_pixel(135, 80).0[0], VALID);
        assert_eq!(mask.get_pixel(0, 0).0[0], INVALID);
    }

    #[test]
    fn pupil_outside_the_diameter_range_is_rejected() {
        let image = synthetic_eye(100, 80);
        let bounds = SegmentationBounds {
            min_pupil_diameter: 60,
            max_pupil_diameter: 90,
            ..eye_bounds()
        };
        let err = segment(&image, &bounds).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Computation);
        assert!(err.to_string().contains("pupil diameter"));
    }

    #[test]
    fn iris_search_needs_contrast() {
        // A pupil on a flat background: no dark-to-bright step beyond it.
        let image = GrayImage::from_fn(200, 160, |x, y| {
            let dx = x as i64 - 100;
            let dy = y as i64 - 80;
            if dx * dx + dy * dy <= PUPIL_RADIUS * PUPIL_RADIUS {
                Luma([20])
            } else {
                Luma([120])
            }
        });
        let err = segment(&image, &eye_bounds()).unwrap_err();
        assert!(matches!(err, PipelineError::Segmentation(_)));
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(find_pupil(&GrayImage::new(0, 0), &eye_bounds()).is_err());
    }
}
