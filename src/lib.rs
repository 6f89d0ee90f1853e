// THEORY:
// This file is the entry point of the `iris_vision` library crate. The public API
// is the batch drivers (`VisionPipeline`, `ParallelPipeline`), the
// `Configuration` that steers them and the `EyeRecord` seam behind which the
// per-image algorithms live. `IrisEye` is the stock implementation of that seam;
// the stage modules it is built from stay reachable under `core_modules` for
// callers that want a single step (a circle fit, an unrolled strip, a score).

pub mod config;
pub mod core_modules;
pub mod errors;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::Configuration;
pub use core_modules::circle::{BoundaryCircle, Point};
pub use core_modules::eye::{Artifact, Boundaries, EyeRecord, SegmentationBounds};
pub use core_modules::iris_eye::IrisEye;
pub use errors::{ErrorKind, PipelineError, Severity};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{BatchSummary, MatchScore, VisionPipeline};
