// THEORY:
// `EyeRecord` is the seam between the orchestrator and the per-image algorithms.
// The orchestrator only decides *which* artifact to compute, load, save or skip;
// everything that touches pixels lives behind this trait. One record exists per
// processed image and is dropped as soon as that image (or its matching pair) is
// done, so implementations are free to hold large buffers.
//
// `load_*` and `save_*` fail with an IO-kind error naming the path. `segment`,
// `normalize`, `encode` and `match_with` are computations over artifacts that are
// already present; they fail with `MissingArtifact` when an input is absent.

use std::fmt;
use std::path::Path;

use crate::core_modules::circle::BoundaryCircle;
use crate::core_modules::resources::{ApplicationMask, FilterBank};
use crate::errors::Result;

/// A per-image data product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    OriginalImage,
    SegmentedImage,
    Parameters,
    Mask,
    NormalizedImage,
    NormalizedMask,
    IrisCode,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Artifact::OriginalImage => "original image",
            Artifact::SegmentedImage => "segmented image",
            Artifact::Parameters => "parameters",
            Artifact::Mask => "mask",
            Artifact::NormalizedImage => "normalized image",
            Artifact::NormalizedMask => "normalized mask",
            Artifact::IrisCode => "iris code",
        };
        f.write_str(name)
    }
}

/// Admissible diameters, in pixels, for the two boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentationBounds {
    pub min_pupil_diameter: i32,
    pub max_pupil_diameter: i32,
    pub min_iris_diameter: i32,
    pub max_iris_diameter: i32,
}

/// The boundary parameters produced by segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundaries {
    pub pupil: BoundaryCircle,
    pub iris: BoundaryCircle,
}

/// Per-image artifact holder driven by the pipeline.
pub trait EyeRecord {
    /// Whether the artifact is currently held (computed or loaded).
    fn has(&self, artifact: Artifact) -> bool;

    fn load_original_image(&mut self, path: &Path) -> Result<()>;

    /// Locates pupil and iris and builds the noise mask.
    fn segment(&mut self, bounds: &SegmentationBounds) -> Result<Boundaries>;

    /// Resets the mask to "every pixel valid".
    fn init_mask(&mut self) -> Result<()>;

    fn save_segmented_image(&self, path: &Path) -> Result<()>;

    fn load_parameters(&mut self, path: &Path) -> Result<()>;
    fn save_parameters(&self, path: &Path) -> Result<()>;

    fn load_mask(&mut self, path: &Path) -> Result<()>;
    fn save_mask(&self, path: &Path) -> Result<()>;

    /// Unrolls the iris annulus (and the mask) into a `width x height` strip.
    fn normalize(&mut self, width: u32, height: u32) -> Result<()>;

    fn load_normalized_image(&mut self, path: &Path) -> Result<()>;
    fn save_normalized_image(&self, path: &Path) -> Result<()>;

    fn load_normalized_mask(&mut self, path: &Path) -> Result<()>;
    fn save_normalized_mask(&self, path: &Path) -> Result<()>;

    fn encode(&mut self, filters: &FilterBank) -> Result<()>;

    fn load_iris_code(&mut self, path: &Path) -> Result<()>;
    fn save_iris_code(&self, path: &Path) -> Result<()>;

    /// Dissimilarity between the two templates: 0 is identical, 1 fully different.
    fn match_with(&self, other: &Self, application_mask: Option<&ApplicationMask>) -> Result<f32>;
}
