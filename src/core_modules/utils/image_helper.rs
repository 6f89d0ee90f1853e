use std::path::Path;

use image::{GrayImage, Rgb, RgbImage};

use crate::core_modules::circle::BoundaryCircle;
use crate::errors::{PipelineError, Result};

fn codec_error(path: &Path, source: image::ImageError) -> PipelineError {
    PipelineError::Image {
        path: path.to_path_buf(),
        source,
    }
}

/// Decodes any supported format into 8-bit grayscale.
pub fn load_gray(path: &Path) -> Result<GrayImage> {
    let decoded = image::open(path).map_err(|source| codec_error(path, source))?;
    Ok(decoded.to_luma8())
}

/// The encoder is picked from the file extension.
pub fn save_gray(path: &Path, buffer: &GrayImage) -> Result<()> {
    buffer.save(path).map_err(|source| codec_error(path, source))
}

pub fn save_rgb(path: &Path, buffer: &RgbImage) -> Result<()> {
    buffer.save(path).map_err(|source| codec_error(path, source))
}

/// Grayscale to RGB, for drawing overlays.
pub fn to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

/// Traces the outline of `circle`, clipping whatever falls outside the canvas.
pub fn draw_circle(canvas: &mut RgbImage, circle: &BoundaryCircle, color: Rgb<u8>) {
    // Enough samples to leave no gaps between neighbouring outline pixels.
    let steps = ((circle.radius().max(1) as f64) * std::f64::consts::TAU).ceil() as usize * 2;
    for step in 0..steps {
        let angle = step as f64 / steps as f64 * std::f64::consts::TAU;
        let (x, y) = circle.point_at(angle);
        let (x, y) = (x.round(), y.round());
        if x >= 0.0 && y >= 0.0 && x < canvas.width() as f64 && y < canvas.height() as f64 {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    }
}
