// THEORY:
// The `pipeline` module is the top-level driver of the engine. It owns no pixels;
// it walks the image list, decides per artifact whether to compute it, load it or
// leave it absent, and isolates every failure to the image (or pair) it belongs
// to.
//
// Key architectural principles:
// 1.  **Fixed stage order**: each image goes through the same `Stage` sequence.
//     A stage either does its work or is a no-op; there is no branching back.
// 2.  **Resolution rule**: an enabled stage computes its artifacts. Otherwise an
//     artifact with a configured input directory is loaded. Otherwise it is
//     absent, and a later save of it is skipped with a warning.
// 3.  **Work units**: without matching, one unit per image. With matching, the
//     list is cut into consecutive pairs, the last odd image standing alone. A
//     unit is self-contained, which is what lets `ParallelPipeline` run units on
//     any worker and still reproduce this module's output.
// 4.  **Severity decides**: an `Item` error loses the current image or pair and
//     the batch moves on; a `Fatal` error ends the run. Once the score report is
//     open, a failed write only loses that line.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::core_modules::eye::{Artifact, EyeRecord};
use crate::core_modules::iris_eye::IrisEye;
use crate::errors::{PipelineError, Result};

/// Artifacts written by the final stage, in order.
const SAVED_ARTIFACTS: [Artifact; 5] = [
    Artifact::Parameters,
    Artifact::Mask,
    Artifact::NormalizedImage,
    Artifact::NormalizedMask,
    Artifact::IrisCode,
];

/// The per-image stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadOriginal,
    Segment,
    LoadOrSkipParameters,
    LoadOrSkipMask,
    Normalize,
    LoadOrSkipNormalized,
    Encode,
    LoadOrSkipCode,
    SaveAllConfigured,
}

impl Stage {
    pub const ORDER: [Stage; 9] = [
        Stage::LoadOriginal,
        Stage::Segment,
        Stage::LoadOrSkipParameters,
        Stage::LoadOrSkipMask,
        Stage::Normalize,
        Stage::LoadOrSkipNormalized,
        Stage::Encode,
        Stage::LoadOrSkipCode,
        Stage::SaveAllConfigured,
    ];
}

/// Where an artifact comes from in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Compute,
    Load(PathBuf),
    Absent,
}

/// One independent slice of the batch. `index` is the position of the (first)
/// image in the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    Single { index: usize, name: String },
    Pair { index: usize, first: String, second: String },
}

/// Splits the image list into work units.
pub fn plan(images: &[String], matching: bool) -> Vec<WorkUnit> {
    if !matching {
        return images
            .iter()
            .enumerate()
            .map(|(index, name)| WorkUnit::Single { index, name: name.clone() })
            .collect();
    }
    images
        .chunks(2)
        .enumerate()
        .map(|(chunk, pair)| {
            let index = chunk * 2;
            match pair {
                [first, second] => WorkUnit::Pair {
                    index,
                    first: first.clone(),
                    second: second.clone(),
                },
                _ => WorkUnit::Single { index, name: pair[0].clone() },
            }
        })
        .collect()
}

/// One line of the score report.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchScore {
    pub first: String,
    pub second: String,
    pub score: f32,
}

impl fmt::Display for MatchScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.first, self.second, significant(self.score))
    }
}

/// Six significant digits with trailing zeros dropped (`0.351562`, `0.5`, `0`),
/// switching to an exponent below 1e-4.
fn significant(value: f32) -> String {
    const DIGITS: i32 = 6;
    if value == 0.0 || !value.is_finite() {
        return value.to_string();
    }
    let value = f64::from(value);
    let scientific = format!("{:.*e}", (DIGITS - 1) as usize, value);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if !(-4..DIGITS).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{sign}{:02}", trim_zeros(mantissa), exponent.abs());
    }
    let decimals = (DIGITS - 1 - exponent) as usize;
    trim_zeros(&format!("{value:.decimals$}")).to_owned()
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// A non-fatal failure attached to the image (or pair) it happened on.
#[derive(Debug)]
pub struct Failure {
    pub item: String,
    pub error: PipelineError,
}

/// Result of one work unit.
#[derive(Debug, Default)]
pub struct UnitOutcome {
    pub processed: usize,
    pub failures: Vec<Failure>,
    pub score: Option<MatchScore>,
}

/// What a whole run did.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub images: usize,
    pub processed: usize,
    pub failures: Vec<Failure>,
    /// Scores in list order.
    pub scores: Vec<MatchScore>,
}

impl BatchSummary {
    pub fn new(images: usize) -> Self {
        Self {
            images,
            ..Self::default()
        }
    }

    pub fn absorb(&mut self, outcome: UnitOutcome) {
        self.processed += outcome.processed;
        self.failures.extend(outcome.failures);
        self.scores.extend(outcome.score);
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Absorbs one unit and appends its score to the report, if one is open. A
    /// line that cannot be written is recorded as a failure of its pair.
    pub fn absorb_reported(&mut self, outcome: UnitOutcome, report: Option<&mut ScoreReport>) {
        if let (Some(report), Some(score)) = (report, outcome.score.as_ref()) {
            if let Err(error) = report.append(score) {
                self.record(format!("{} {}", score.first, score.second), error);
            }
        }
        self.absorb(outcome);
    }

    /// Flushes the report. A flush failure is recorded against the report file.
    pub fn close_report(&mut self, report: Option<ScoreReport>) {
        let Some(report) = report else {
            return;
        };
        let item = report.path.display().to_string();
        if let Err(error) = report.finish() {
            self.record(item, error);
        }
    }

    fn record(&mut self, item: String, error: PipelineError) {
        warn!("{item}: {error}");
        self.failures.push(Failure { item, error });
    }
}

/// The score file, opened once per run.
pub struct ScoreReport {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ScoreReport {
    /// Opens the report when matching is enabled and a path is configured.
    pub fn create(config: &Configuration) -> Result<Option<Self>> {
        let Some(path) = config.score_file.as_ref().filter(|_| config.stages.matching) else {
            return Ok(None);
        };
        let file = File::create(path).map_err(|source| PipelineError::ScoreReport {
            path: path.clone(),
            source,
        })?;
        Ok(Some(Self {
            path: path.clone(),
            writer: BufWriter::new(file),
        }))
    }

    pub fn append(&mut self, score: &MatchScore) -> Result<()> {
        writeln!(self.writer, "{score}").map_err(|source| self.failure(source))
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush().map_err(|source| self.failure(source))
    }

    fn failure(&self, source: std::io::Error) -> PipelineError {
        PipelineError::ScoreWrite {
            path: self.path.clone(),
            source,
        }
    }
}

/// The sequential batch driver.
pub struct VisionPipeline<E = IrisEye> {
    config: Arc<Configuration>,
    _eye: PhantomData<fn() -> E>,
}

impl<E: EyeRecord + Default> VisionPipeline<E> {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self {
            config,
            _eye: PhantomData,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn plan(&self) -> Vec<WorkUnit> {
        plan(self.config.image_list(), self.config.stages.matching)
    }

    /// Applies the resolution rule to one artifact.
    pub fn resolve(&self, artifact: Artifact) -> Resolution {
        let stages = &self.config.stages;
        let computed = match artifact {
            Artifact::OriginalImage => false,
            Artifact::SegmentedImage | Artifact::Parameters | Artifact::Mask => stages.segmentation,
            Artifact::NormalizedImage | Artifact::NormalizedMask => stages.normalization,
            Artifact::IrisCode => stages.encoding,
        };
        if computed {
            return Resolution::Compute;
        }
        match self.config.input_dir(artifact) {
            Some(dir) => Resolution::Load(dir.to_path_buf()),
            None => Resolution::Absent,
        }
    }

    /// `dir/<stem><suffix>`, where `<stem>` is `name` without directory and
    /// extension.
    pub fn artifact_path(&self, dir: &Path, name: &str, artifact: Artifact) -> PathBuf {
        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        dir.join(format!("{stem}{}", self.config.suffix(artifact)))
    }

    /// Runs every stage on one image and returns its artifacts.
    pub fn process_eye(&self, name: &str) -> Result<E> {
        let mut eye = E::default();
        for stage in Stage::ORDER {
            self.run_stage(stage, name, &mut eye)?;
        }
        Ok(eye)
    }

    fn run_stage(&self, stage: Stage, name: &str, eye: &mut E) -> Result<()> {
        let config = &*self.config;
        let stages = &config.stages;
        match stage {
            Stage::LoadOriginal => {
                if !(stages.segmentation || stages.normalization) {
                    return Ok(());
                }
                let dir = config.input_dir(Artifact::OriginalImage).ok_or(
                    PipelineError::MissingOriginalImages {
                        action: if stages.segmentation { "segment" } else { "normalize" },
                    },
                )?;
                eye.load_original_image(&dir.join(name))
            }
            Stage::Segment => {
                if !stages.segmentation {
                    return Ok(());
                }
                let boundaries = eye.segment(&config.bounds)?;
                debug!(
                    "{name}: pupil ({}, {}) r={}, iris ({}, {}) r={}",
                    boundaries.pupil.center().x,
                    boundaries.pupil.center().y,
                    boundaries.pupil.radius(),
                    boundaries.iris.center().x,
                    boundaries.iris.center().y,
                    boundaries.iris.radius()
                );
                if let Some(dir) = config.output_dir(Artifact::SegmentedImage) {
                    let path = self.artifact_path(dir, name, Artifact::SegmentedImage);
                    eye.save_segmented_image(&path)?;
                }
                if !config.use_mask {
                    eye.init_mask()?;
                }
                Ok(())
            }
            Stage::LoadOrSkipParameters => {
                self.load_if_configured(eye, name, &[Artifact::Parameters])
            }
            Stage::LoadOrSkipMask => self.load_if_configured(eye, name, &[Artifact::Mask]),
            Stage::Normalize => {
                if !stages.normalization {
                    return Ok(());
                }
                let (width, height) = config.normalized_size();
                eye.normalize(width, height)
            }
            Stage::LoadOrSkipNormalized => self.load_if_configured(
                eye,
                name,
                &[Artifact::NormalizedImage, Artifact::NormalizedMask],
            ),
            Stage::Encode => {
                if !stages.encoding {
                    return Ok(());
                }
                eye.encode(config.filter_bank())
            }
            Stage::LoadOrSkipCode => self.load_if_configured(eye, name, &[Artifact::IrisCode]),
            Stage::SaveAllConfigured => {
                for artifact in SAVED_ARTIFACTS {
                    let Some(dir) = config.output_dir(artifact) else {
                        continue;
                    };
                    if self.resolve(artifact) == Resolution::Absent || !eye.has(artifact) {
                        warn!("{name}: cannot save {artifact}, it was neither computed nor loaded");
                        continue;
                    }
                    save_artifact(eye, artifact, &self.artifact_path(dir, name, artifact))?;
                }
                Ok(())
            }
        }
    }

    fn load_if_configured(&self, eye: &mut E, name: &str, artifacts: &[Artifact]) -> Result<()> {
        for &artifact in artifacts {
            if let Resolution::Load(dir) = self.resolve(artifact) {
                let path = self.artifact_path(&dir, name, artifact);
                debug!("{name}: loading {artifact} from {}", path.display());
                load_artifact(eye, artifact, &path)?;
            }
        }
        Ok(())
    }

    /// Processes one work unit. Only a fatal error is returned; everything else
    /// is recorded in the outcome.
    pub fn process_unit(&self, unit: &WorkUnit) -> Result<UnitOutcome> {
        let mut outcome = UnitOutcome::default();
        match unit {
            WorkUnit::Single { index, name } => {
                self.process_and_record(*index, name, &mut outcome)?;
            }
            WorkUnit::Pair { index, first, second } => {
                let eye_a = self.process_and_record(*index, first, &mut outcome)?;
                let eye_b = self.process_and_record(index + 1, second, &mut outcome)?;
                let (Some(eye_a), Some(eye_b)) = (eye_a, eye_b) else {
                    warn!("{first} / {second}: not matched, one of the images failed");
                    return Ok(outcome);
                };
                match eye_a.match_with(&eye_b, self.config.application_mask()) {
                    Ok(score) => {
                        info!("{first} / {second}: score {score}");
                        outcome.score = Some(MatchScore {
                            first: first.clone(),
                            second: second.clone(),
                            score,
                        });
                    }
                    Err(error) if error.is_fatal() => return Err(error),
                    Err(error) => {
                        warn!("{first} / {second}: {error}");
                        outcome.failures.push(Failure {
                            item: format!("{first} {second}"),
                            error,
                        });
                    }
                }
            }
        }
        Ok(outcome)
    }

    fn process_and_record(
        &self,
        index: usize,
        name: &str,
        outcome: &mut UnitOutcome,
    ) -> Result<Option<E>> {
        info!("{} / {} : {name}", index + 1, self.config.image_list().len());
        match self.process_eye(name) {
            Ok(eye) => {
                outcome.processed += 1;
                Ok(Some(eye))
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                warn!("{name}: {error}");
                outcome.failures.push(Failure {
                    item: name.to_owned(),
                    error,
                });
                Ok(None)
            }
        }
    }

    /// Processes the whole image list in order.
    pub fn run(&self) -> Result<BatchSummary> {
        let mut report = ScoreReport::create(&self.config)?;
        let mut summary = BatchSummary::new(self.config.image_list().len());

        for unit in self.plan() {
            let outcome = self.process_unit(&unit)?;
            summary.absorb_reported(outcome, report.as_mut());
        }
        summary.close_report(report);
        info!(
            "{} of {} images processed, {} failures, {} scores",
            summary.processed,
            summary.images,
            summary.failed(),
            summary.scores.len()
        );
        Ok(summary)
    }
}

fn load_artifact<E: EyeRecord>(eye: &mut E, artifact: Artifact, path: &Path) -> Result<()> {
    match artifact {
        Artifact::OriginalImage => eye.load_original_image(path),
        Artifact::Parameters => eye.load_parameters(path),
        Artifact::Mask => eye.load_mask(path),
        Artifact::NormalizedImage => eye.load_normalized_image(path),
        Artifact::NormalizedMask => eye.load_normalized_mask(path),
        Artifact::IrisCode => eye.load_iris_code(path),
        Artifact::SegmentedImage => Err(PipelineError::InvalidConfig(
            "segmented images are an output only".into(),
        )),
    }
}

fn save_artifact<E: EyeRecord>(eye: &E, artifact: Artifact, path: &Path) -> Result<()> {
    match artifact {
        Artifact::SegmentedImage => eye.save_segmented_image(path),
        Artifact::Parameters => eye.save_parameters(path),
        Artifact::Mask => eye.save_mask(path),
        Artifact::NormalizedImage => eye.save_normalized_image(path),
        Artifact::NormalizedMask => eye.save_normalized_mask(path),
        Artifact::IrisCode => eye.save_iris_code(path),
        Artifact::OriginalImage => Err(PipelineError::InvalidConfig(
            "original images are an input only".into(),
        )),
    }
}
