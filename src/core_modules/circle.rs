// THEORY:
// The `circle` module is the geometric model behind segmentation. Both the pupil
// and the iris are approximated by a `BoundaryCircle`: an integer center and a
// non-negative integer radius, exactly the precision at which the boundaries are
// stored in parameter files and drawn on overlays.
//
// The only non-trivial operation is `fit`, an algebraic least-squares circle fit
// over noisy boundary samples (R. Bullock, 2006). The fit is evaluated in
// centroid-relative coordinates (u, v) = (x - mx, y - my): the third-order moment
// sums stay small there, and the closed form below only holds in that frame.

use crate::errors::{PipelineError, Result};

/// Relative size under which the fit's determinant is treated as zero.
const DEGENERATE_DETERMINANT: f64 = 1e-10;

/// An integer pixel position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A circular boundary (pupil or iris) in image coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundaryCircle {
    center: Point,
    radius: i32,
}

impl BoundaryCircle {
    pub fn new(center: Point, radius: i32) -> Result<Self> {
        let mut circle = Self::default();
        circle.set_circle(center, radius)?;
        Ok(circle)
    }

    /// Fits a new circle to boundary samples. See [`BoundaryCircle::fit`].
    pub fn from_points(points: &[[f64; 2]]) -> Result<Self> {
        let mut circle = Self::default();
        circle.fit(points)?;
        Ok(circle)
    }

    pub fn center(&self) -> Point {
        self.center
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    pub fn diameter(&self) -> i32 {
        self.radius * 2
    }

    pub fn set_center(&mut self, center: Point) {
        self.center = center;
    }

    pub fn set_radius(&mut self, radius: i32) -> Result<()> {
        if radius < 0 {
            return Err(PipelineError::NegativeRadius(radius as i64));
        }
        self.radius = radius;
        Ok(())
    }

    pub fn set_circle(&mut self, center: Point, radius: i32) -> Result<()> {
        self.set_center(center);
        self.set_radius(radius)
    }

    pub fn set_circle_xy(&mut self, x: i32, y: i32, radius: i32) -> Result<()> {
        self.set_circle(Point::new(x, y), radius)
    }

    /// True if the pixel lies inside or on the circle.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let dx = (x - self.center.x) as i64;
        let dy = (y - self.center.y) as i64;
        let r = self.radius as i64;
        dx * dx + dy * dy <= r * r
    }

    /// Point of the boundary at `angle` (radians, image axes: x right, y down).
    pub fn point_at(&self, angle: f64) -> (f64, f64) {
        (
            self.center.x as f64 + self.radius as f64 * angle.cos(),
            self.center.y as f64 + self.radius as f64 * angle.sin(),
        )
    }

    /// Replaces this circle with the algebraic best fit through `points`.
    ///
    /// Needs at least three non-collinear points. On a degenerate set the circle
    /// is left untouched and `DegenerateFit` is returned. The fitted center and
    /// radius are truncated toward zero.
    pub fn fit(&mut self, points: &[[f64; 2]]) -> Result<()> {
        let n = points.len();
        if n < 3 {
            return Err(PipelineError::DegenerateFit { points: n });
        }
        let count = n as f64;

        let (sum_x, sum_y) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), &[x, y]| (sx + x, sy + y));
        let mx = sum_x / count;
        let my = sum_y / count;

        let mut suu = 0.0;
        let mut svv = 0.0;
        let mut suv = 0.0;
        let mut suuu = 0.0;
        let mut svvv = 0.0;
        let mut suuv = 0.0;
        let mut suvv = 0.0;
        for &[x, y] in points {
            let u = x - mx;
            let v = y - my;
            suu += u * u;
            svv += v * v;
            suv += u * v;
            suuu += u * u * u;
            svvv += v * v * v;
            suuv += u * u * v;
            suvv += u * v * v;
        }

        let det = suv * suv - suu * svv;
        if !det.is_finite() || det.abs() <= DEGENERATE_DETERMINANT * (suu * svv).abs() {
            return Err(PipelineError::DegenerateFit { points: n });
        }

        let uc = 0.5 * (suv * (svvv + suuv) - svv * (suuu + suvv)) / det;
        let vc = 0.5 * (suv * (suuu + suvv) - suu * (svvv + suuv)) / det;
        let radius = (uc * uc + vc * vc + (suu + svv) / count).sqrt();
        let cx = uc + mx;
        let cy = vc + my;

        if !(cx.is_finite() && cy.is_finite() && radius.is_finite()) {
            return Err(PipelineError::DegenerateFit { points: n });
        }

        // Validate before touching the center so a failure leaves `self` intact.
        let radius = radius as i32;
        if radius < 0 {
            return Err(PipelineError::NegativeRadius(radius as i64));
        }
        self.set_center(Point::new(cx as i32, cy as i32));
        self.set_radius(radius)
    }
}
