// THEORY:
// `IrisEye` is the stock `EyeRecord`: it holds every artifact of one image as an
// owned buffer and delegates the pixel work to the stage modules
// (`segmentation`, `rubber_sheet`, `encoding`, `hamming`). Images, masks and
// codes go through the `image` crate; boundary parameters are a two-line text
// file, `x y radius` for the pupil and then for the iris.

use std::path::Path;

use image::{GrayImage, Luma, Rgb};

use crate::core_modules::circle::{BoundaryCircle, Point};
use crate::core_modules::encoding;
use crate::core_modules::eye::{Artifact, Boundaries, EyeRecord, SegmentationBounds};
use crate::core_modules::hamming::{self, Template};
use crate::core_modules::resources::{self, ApplicationMask, FilterBank, Tokens, VALID};
use crate::core_modules::rubber_sheet;
use crate::core_modules::segmentation;
use crate::core_modules::utils::image_helper;
use crate::errors::{PipelineError, Result};

const PUPIL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const IRIS_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

#[derive(Debug, Clone, Default)]
pub struct IrisEye {
    original: Option<GrayImage>,
    boundaries: Option<Boundaries>,
    mask: Option<GrayImage>,
    normalized: Option<GrayImage>,
    normalized_mask: Option<GrayImage>,
    code: Option<GrayImage>,
}

fn require<'a, T>(value: &'a Option<T>, stage: &'static str, artifact: Artifact) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or(PipelineError::MissingArtifact { stage, artifact })
}

fn read_circle(tokens: &mut Tokens<'_>) -> Result<BoundaryCircle> {
    let x: i32 = tokens.next("center x")?;
    let y: i32 = tokens.next("center y")?;
    let radius: i32 = tokens.next("radius")?;
    BoundaryCircle::new(Point::new(x, y), radius)
}

impl IrisEye {
    pub fn boundaries(&self) -> Option<&Boundaries> {
        self.boundaries.as_ref()
    }

    pub fn iris_code(&self) -> Option<&GrayImage> {
        self.code.as_ref()
    }
}

fn save_buffer(buffer: &Option<GrayImage>, artifact: Artifact, path: &Path) -> Result<()> {
    image_helper::save_gray(path, require(buffer, "save", artifact)?)
}

impl EyeRecord for IrisEye {
    fn has(&self, artifact: Artifact) -> bool {
        match artifact {
            Artifact::OriginalImage => self.original.is_some(),
            Artifact::SegmentedImage => self.original.is_some() && self.boundaries.is_some(),
            Artifact::Parameters => self.boundaries.is_some(),
            Artifact::Mask => self.mask.is_some(),
            Artifact::NormalizedImage => self.normalized.is_some(),
            Artifact::NormalizedMask => self.normalized_mask.is_some(),
            Artifact::IrisCode => self.code.is_some(),
        }
    }

    fn load_original_image(&mut self, path: &Path) -> Result<()> {
        self.original = Some(image_helper::load_gray(path)?);
        Ok(())
    }

    fn segment(&mut self, bounds: &SegmentationBounds) -> Result<Boundaries> {
        let original = require(&self.original, "segmentation", Artifact::OriginalImage)?;
        let (boundaries, mask) = segmentation::segment(original, bounds)?;
        self.boundaries = Some(boundaries);
        self.mask = Some(mask);
        Ok(boundaries)
    }

    fn init_mask(&mut self) -> Result<()> {
        let original = require(&self.original, "mask initialisation", Artifact::OriginalImage)?;
        self.mask = Some(GrayImage::from_pixel(original.width(), original.height(), Luma([VALID])));
        Ok(())
    }

    fn save_segmented_image(&self, path: &Path) -> Result<()> {
        let original = require(&self.original, "save", Artifact::OriginalImage)?;
        let boundaries = require(&self.boundaries, "save", Artifact::Parameters)?;
        let mut overlay = image_helper::to_rgb(original);
        image_helper::draw_circle(&mut overlay, &boundaries.pupil, PUPIL_COLOR);
        image_helper::draw_circle(&mut overlay, &boundaries.iris, IRIS_COLOR);
        image_helper::save_rgb(path, &overlay)
    }

    fn load_parameters(&mut self, path: &Path) -> Result<()> {
        let text = resources::read_text(path)?;
        let mut tokens = Tokens::new(&text, path, "parameters");
        let pupil = read_circle(&mut tokens)?;
        let iris = read_circle(&mut tokens)?;
        self.boundaries = Some(Boundaries { pupil, iris });
        Ok(())
    }

    fn save_parameters(&self, path: &Path) -> Result<()> {
        let b = require(&self.boundaries, "save", Artifact::Parameters)?;
        let text = format!(
            "{} {} {}\n{} {} {}\n",
            b.pupil.center().x,
            b.pupil.center().y,
            b.pupil.radius(),
            b.iris.center().x,
            b.iris.center().y,
            b.iris.radius()
        );
        std::fs::write(path, text).map_err(|source| PipelineError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load_mask(&mut self, path: &Path) -> Result<()> {
        self.mask = Some(image_helper::load_gray(path)?);
        Ok(())
    }

    fn save_mask(&self, path: &Path) -> Result<()> {
        save_buffer(&self.mask, Artifact::Mask, path)
    }

    fn normalize(&mut self, width: u32, height: u32) -> Result<()> {
        let original = require(&self.original, "normalization", Artifact::OriginalImage)?;
        let boundaries = require(&self.boundaries, "normalization", Artifact::Parameters)?;
        let (strip, strip_mask) =
            rubber_sheet::normalize(original, self.mask.as_ref(), boundaries, width, height);
        self.normalized = Some(strip);
        self.normalized_mask = Some(strip_mask);
        Ok(())
    }

    fn load_normalized_image(&mut self, path: &Path) -> Result<()> {
        self.normalized = Some(image_helper::load_gray(path)?);
        Ok(())
    }

    fn save_normalized_image(&self, path: &Path) -> Result<()> {
        save_buffer(&self.normalized, Artifact::NormalizedImage, path)
    }

    fn load_normalized_mask(&mut self, path: &Path) -> Result<()> {
        self.normalized_mask = Some(image_helper::load_gray(path)?);
        Ok(())
    }

    fn save_normalized_mask(&self, path: &Path) -> Result<()> {
        save_buffer(&self.normalized_mask, Artifact::NormalizedMask, path)
    }

    fn encode(&mut self, filters: &FilterBank) -> Result<()> {
        let strip = require(&self.normalized, "encoding", Artifact::NormalizedImage)?;
        self.code = Some(encoding::encode(strip, filters)?);
        Ok(())
    }

    fn load_iris_code(&mut self, path: &Path) -> Result<()> {
        self.code = Some(image_helper::load_gray(path)?);
        Ok(())
    }

    fn save_iris_code(&self, path: &Path) -> Result<()> {
        save_buffer(&self.code, Artifact::IrisCode, path)
    }

    fn match_with(&self, other: &Self, application_mask: Option<&ApplicationMask>) -> Result<f32> {
        let first = Template {
            code: require(&self.code, "matching", Artifact::IrisCode)?,
            mask: self.normalized_mask.as_ref(),
        };
        let second = Template {
            code: require(&other.code, "matching", Artifact::IrisCode)?,
            mask: other.normalized_mask.as_ref(),
        };
        hamming::distance(first, second, application_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::segmentation::tests::{eye_bounds, synthetic_eye};
    use crate::errors::ErrorKind;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use tempfile::TempDir;

    /// The synthetic eye with six alternating sectors painted on the iris.
    fn textured_eye() -> GrayImage {
        let mut image = synthetic_eye(100, 80);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            if pixel.0[0] == 120 {
                let angle = (y as f64 - 80.0).atan2(x as f64 - 100.0) + std::f64::consts::PI;
                let sector = (angle / std::f64::consts::TAU * 6.0) as u32;
                pixel.0[0] = if sector % 2 == 0 { 100 } else { 140 };
            }
        }
        image
    }

    fn filters() -> FilterBank {
        FilterBank::new(vec![
            DMatrix::from_row_slice(1, 3, &[-1.0, 0.0, 1.0]),
            DMatrix::from_row_slice(3, 3, &[0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0]),
        ])
    }

    #[test]
    fn full_chain_on_a_synthetic_eye() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("eye.bmp");
        image_helper::save_gray(&original, &textured_eye()).unwrap();

        let mut eye = IrisEye::default();
        eye.load_original_image(&original).unwrap();
        let boundaries = eye.segment(&eye_bounds()).unwrap();
        assert!(eye.has(Artifact::Mask));
        assert!(eye.has(Artifact::SegmentedImage));
        assert!(boundaries.iris.radius() > boundaries.pupil.radius());

        eye.normalize(64, 8).unwrap();
        eye.encode(&filters()).unwrap();
        assert_eq!(eye.iris_code().unwrap().dimensions(), (64, 16));

        let score = eye.match_with(&eye, None).unwrap();
        assert_relative_eq!(score, 0.0);

        let segmented = dir.path().join("eye_segm.bmp");
        eye.save_segmented_image(&segmented).unwrap();
        assert!(segmented.exists());
    }

    #[test]
    fn parameters_survive_a_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eye_para.txt");
        let mut eye = IrisEye::default();
        eye.boundaries = Some(Boundaries {
            pupil: BoundaryCircle::new(Point::new(101, 79), 18).unwrap(),
            iris: BoundaryCircle::new(Point::new(99, 80), 51).unwrap(),
        });
        eye.save_parameters(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "101 79 18\n99 80 51\n");

        let mut reloaded = IrisEye::default();
        reloaded.load_parameters(&path).unwrap();
        assert_eq!(reloaded.boundaries(), eye.boundaries());
    }

    #[test]
    fn negative_radius_in_a_parameter_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad_para.txt");
        std::fs::write(&path, "10 10 -4\n10 10 40\n").unwrap();
        let err = IrisEye::default().load_parameters(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn computations_name_their_missing_input() {
        let mut eye = IrisEye::default();
        let err = eye.normalize(64, 8).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingArtifact { artifact: Artifact::OriginalImage, .. }
        ));
        let err = eye.encode(&filters()).unwrap_err();
        assert!(err.to_string().contains("normalized image"));
        assert!(eye.save_iris_code(Path::new("never.bmp")).is_err());
        assert!(eye.match_with(&IrisEye::default(), None).is_err());
    }

    #[test]
    fn init_mask_marks_every_pixel_valid() {
        let mut eye = IrisEye::default();
        eye.original = Some(GrayImage::new(10, 6));
        eye.init_mask().unwrap();
        let mask = eye.mask.as_ref().unwrap();
        assert_eq!(mask.dimensions(), (10, 6));
        assert!(mask.pixels().all(|p| p.0[0] == VALID));
    }
}
