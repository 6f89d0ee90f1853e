// THEORY:
// `Configuration` is the single source of truth for a run. It is built once from a
// line-oriented `key = value` file, then shared read-only by every stage (and, in
// the parallel pipeline, by every worker).
//
// The option names are fixed strings. Instead of pointing names at struct fields,
// a static `SCHEMA` table maps each name to an enumerated `ConfigKey`; one `match`
// in `apply` turns the key into the typed slot it writes. Adding an option means
// adding a table row and a slot, nothing else.
//
// Path values whose role is "load" or "save" are resolved against the directory
// holding the configuration file, so a configuration can travel with its data.
// Resource files (filter bank, application points) are taken as written.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use crate::core_modules::eye::{Artifact, SegmentationBounds};
use crate::core_modules::resources::{self, ApplicationMask, FilterBank};
use crate::errors::{PipelineError, Result};

/// File read when `load` is given a directory.
pub const CONFIG_FILE_NAME: &str = "process.ini";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Segmentation,
    Normalization,
    Encoding,
    Matching,
    UseMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Param {
    MinPupilDiameter,
    MaxPupilDiameter,
    MinIrisDiameter,
    MaxIrisDiameter,
    NormalizedWidth,
    NormalizedHeight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigKey {
    Flag(Flag),
    Int(Param),
    ImageList,
    InputDir(Artifact),
    OutputDir(Artifact),
    ScoreFile,
    FilterBank,
    ApplicationPoints,
    Suffix(Artifact),
}

/// How a text value becomes a stored string or path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathRole {
    /// Load/save locations, joined with the configuration directory.
    Relative,
    /// Resource files, used as written.
    AsGiven,
    /// File-name suffixes.
    Suffix,
}

impl ConfigKey {
    fn role(self) -> Option<PathRole> {
        match self {
            ConfigKey::Flag(_) | ConfigKey::Int(_) => None,
            ConfigKey::ImageList
            | ConfigKey::InputDir(_)
            | ConfigKey::OutputDir(_)
            | ConfigKey::ScoreFile => Some(PathRole::Relative),
            ConfigKey::FilterBank | ConfigKey::ApplicationPoints => Some(PathRole::AsGiven),
            ConfigKey::Suffix(_) => Some(PathRole::Suffix),
        }
    }
}

const SCHEMA: &[(&str, ConfigKey)] = &[
    ("Process segmentation", ConfigKey::Flag(Flag::Segmentation)),
    ("Process normalization", ConfigKey::Flag(Flag::Normalization)),
    ("Process encoding", ConfigKey::Flag(Flag::Encoding)),
    ("Process matching", ConfigKey::Flag(Flag::Matching)),
    ("Use the mask provided by osiris", ConfigKey::Flag(Flag::UseMask)),
    ("Load List of images", ConfigKey::ImageList),
    ("Load original images", ConfigKey::InputDir(Artifact::OriginalImage)),
    ("Load parameters", ConfigKey::InputDir(Artifact::Parameters)),
    ("Load masks", ConfigKey::InputDir(Artifact::Mask)),
    ("Load normalized images", ConfigKey::InputDir(Artifact::NormalizedImage)),
    ("Load normalized masks", ConfigKey::InputDir(Artifact::NormalizedMask)),
    ("Load iris codes", ConfigKey::InputDir(Artifact::IrisCode)),
    ("Save segmented images", ConfigKey::OutputDir(Artifact::SegmentedImage)),
    ("Save contours parameters", ConfigKey::OutputDir(Artifact::Parameters)),
    ("Save masks of iris", ConfigKey::OutputDir(Artifact::Mask)),
    ("Save normalized images", ConfigKey::OutputDir(Artifact::NormalizedImage)),
    ("Save normalized masks", ConfigKey::OutputDir(Artifact::NormalizedMask)),
    ("Save iris codes", ConfigKey::OutputDir(Artifact::IrisCode)),
    ("Save matching scores", ConfigKey::ScoreFile),
    ("Minimum diameter for pupil", ConfigKey::Int(Param::MinPupilDiameter)),
    ("Maximum diameter for pupil", ConfigKey::Int(Param::MaxPupilDiameter)),
    ("Minimum diameter for iris", ConfigKey::Int(Param::MinIrisDiameter)),
    ("Maximum diameter for iris", ConfigKey::Int(Param::MaxIrisDiameter)),
    ("Width of normalized image", ConfigKey::Int(Param::NormalizedWidth)),
    ("Height of normalized image", ConfigKey::Int(Param::NormalizedHeight)),
    ("Load Gabor filters", ConfigKey::FilterBank),
    ("Load Application points", ConfigKey::ApplicationPoints),
    ("Suffix for segmented images", ConfigKey::Suffix(Artifact::SegmentedImage)),
    ("Suffix for parameters", ConfigKey::Suffix(Artifact::Parameters)),
    ("Suffix for masks of iris", ConfigKey::Suffix(Artifact::Mask)),
    ("Suffix for normalized images", ConfigKey::Suffix(Artifact::NormalizedImage)),
    ("Suffix for normalized masks", ConfigKey::Suffix(Artifact::NormalizedMask)),
    ("Suffix for iris codes", ConfigKey::Suffix(Artifact::IrisCode)),
];

fn lookup(key: &str) -> Option<ConfigKey> {
    SCHEMA.iter().find(|(name, _)| *name == key).map(|(_, slot)| *slot)
}

/// Which processing stages run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stages {
    pub segmentation: bool,
    pub normalization: bool,
    pub encoding: bool,
    pub matching: bool,
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub stages: Stages,
    /// Keep the noise mask computed by segmentation; when off the mask is reset
    /// to full validity.
    pub use_mask: bool,
    pub bounds: SegmentationBounds,
    pub normalized_width: i32,
    pub normalized_height: i32,
    pub image_list_path: Option<PathBuf>,
    pub filter_bank_path: Option<PathBuf>,
    pub application_points_path: Option<PathBuf>,
    pub score_file: Option<PathBuf>,
    input_dirs: HashMap<Artifact, PathBuf>,
    output_dirs: HashMap<Artifact, PathBuf>,
    suffixes: HashMap<Artifact, String>,
    base_dir: PathBuf,
    image_list: Vec<String>,
    filter_bank: FilterBank,
    application_mask: Option<ApplicationMask>,
    unknown_keys: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        let suffixes = [
            (Artifact::SegmentedImage, "_segm.bmp"),
            (Artifact::Parameters, "_para.txt"),
            (Artifact::Mask, "_mask.bmp"),
            (Artifact::NormalizedImage, "_imno.bmp"),
            (Artifact::NormalizedMask, "_mano.bmp"),
            (Artifact::IrisCode, "_code.bmp"),
        ]
        .into_iter()
        .map(|(artifact, suffix)| (artifact, suffix.to_owned()))
        .collect();

        Self {
            stages: Stages::default(),
            use_mask: true,
            bounds: SegmentationBounds {
                min_pupil_diameter: 21,
                max_pupil_diameter: 91,
                min_iris_diameter: 99,
                max_iris_diameter: 399,
            },
            normalized_width: 512,
            normalized_height: 64,
            image_list_path: None,
            filter_bank_path: Some(PathBuf::from("./filters.txt")),
            application_points_path: Some(PathBuf::from("./points.txt")),
            score_file: None,
            input_dirs: HashMap::new(),
            output_dirs: HashMap::new(),
            suffixes,
            base_dir: PathBuf::new(),
            image_list: Vec::new(),
            filter_bank: FilterBank::default(),
            application_mask: None,
            unknown_keys: Vec::new(),
        }
    }
}

impl Configuration {
    /// Reads a configuration file (or `process.ini` inside a directory) and the
    /// resources it enables.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        config.load(path)?;
        Ok(config)
    }

    pub fn reset_to_defaults(&mut self) {
        *self = Self::default();
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(PipelineError::EmptyConfigPath);
        }
        let file = if path.is_dir() {
            path.join(CONFIG_FILE_NAME)
        } else {
            path.to_path_buf()
        };

        let text = std::fs::read_to_string(&file).map_err(|source| PipelineError::ConfigSource {
            path: file.clone(),
            source,
        })?;
        self.base_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        tracing::debug!("reading configuration from {}", file.display());

        self.parse_options(&text)?;
        self.validate()?;

        self.load_image_list()?;
        if self.stages.encoding && self.filter_bank_path.is_some() {
            self.load_filter_bank()?;
        }
        if self.stages.matching && self.application_points_path.is_some() {
            self.load_application_mask()?;
        }
        Ok(())
    }

    /// Applies every `key = value` line of `text`. Unknown keys are recorded and
    /// skipped; a value that does not fit its slot is an error.
    pub fn parse_options(&mut self, text: &str) -> Result<()> {
        for (index, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                continue;
            }

            match lookup(key) {
                Some(slot) => self.apply(slot, key, value, index + 1)?,
                None => {
                    tracing::warn!("unknown option in configuration file: {}", line.trim());
                    self.unknown_keys.push(key.to_owned());
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, slot: ConfigKey, key: &str, value: &str, line: usize) -> Result<()> {
        let invalid = || PipelineError::InvalidOption {
            key: key.to_owned(),
            value: value.to_owned(),
            line,
        };

        match slot {
            ConfigKey::Flag(flag) => {
                let parsed = parse_bool(value).ok_or_else(invalid)?;
                *self.flag_mut(flag) = parsed;
            }
            ConfigKey::Int(param) => {
                let parsed = value.parse::<i32>().map_err(|_| invalid())?;
                *self.param_mut(param) = parsed;
            }
            ConfigKey::ImageList => self.image_list_path = Some(self.resolve(slot, value)),
            ConfigKey::InputDir(artifact) => {
                let dir = self.resolve(slot, value);
                self.input_dirs.insert(artifact, dir);
            }
            ConfigKey::OutputDir(artifact) => {
                let dir = self.resolve(slot, value);
                self.output_dirs.insert(artifact, dir);
            }
            ConfigKey::ScoreFile => self.score_file = Some(self.resolve(slot, value)),
            ConfigKey::FilterBank => self.filter_bank_path = Some(self.resolve(slot, value)),
            ConfigKey::ApplicationPoints => {
                self.application_points_path = Some(self.resolve(slot, value));
            }
            ConfigKey::Suffix(artifact) => {
                self.suffixes.insert(artifact, normalize_separators(value));
            }
        }
        Ok(())
    }

    fn resolve(&self, slot: ConfigKey, value: &str) -> PathBuf {
        let text = normalize_separators(value);
        match slot.role() {
            Some(PathRole::Relative) => self.base_dir.join(text),
            _ => PathBuf::from(text),
        }
    }

    fn flag_mut(&mut self, flag: Flag) -> &mut bool {
        match flag {
            Flag::Segmentation => &mut self.stages.segmentation,
            Flag::Normalization => &mut self.stages.normalization,
            Flag::Encoding => &mut self.stages.encoding,
            Flag::Matching => &mut self.stages.matching,
            Flag::UseMask => &mut self.use_mask,
        }
    }

    fn param_mut(&mut self, param: Param) -> &mut i32 {
        match param {
            Param::MinPupilDiameter => &mut self.bounds.min_pupil_diameter,
            Param::MaxPupilDiameter => &mut self.bounds.max_pupil_diameter,
            Param::MinIrisDiameter => &mut self.bounds.min_iris_diameter,
            Param::MaxIrisDiameter => &mut self.bounds.max_iris_diameter,
            Param::NormalizedWidth => &mut self.normalized_width,
            Param::NormalizedHeight => &mut self.normalized_height,
        }
    }

    /// Checks the numeric parameters for consistency.
    pub fn validate(&self) -> Result<()> {
        let b = &self.bounds;
        let ranges = [
            ("pupil", b.min_pupil_diameter, b.max_pupil_diameter),
            ("iris", b.min_iris_diameter, b.max_iris_diameter),
        ];
        for (name, min, max) in ranges {
            if min <= 0 || min > max {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} diameter range {min}..{max} is empty or not positive"
                )));
            }
        }
        if self.normalized_width <= 0 || self.normalized_height <= 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "normalized image size {}x{} must be positive",
                self.normalized_width, self.normalized_height
            )));
        }
        Ok(())
    }

    pub fn load_image_list(&mut self) -> Result<()> {
        let path = self.image_list_path.as_ref().ok_or_else(|| {
            PipelineError::InvalidConfig(
                "no list of images configured (`Load List of images`)".into(),
            )
        })?;
        self.image_list = resources::load_image_list(path)?;
        tracing::debug!("{} images listed in {}", self.image_list.len(), path.display());
        Ok(())
    }

    pub fn load_filter_bank(&mut self) -> Result<()> {
        let path = self.filter_bank_path.as_ref().ok_or_else(|| {
            PipelineError::InvalidConfig("no filter bank configured (`Load Gabor filters`)".into())
        })?;
        self.filter_bank = FilterBank::load(path)?;
        Ok(())
    }

    pub fn load_application_mask(&mut self) -> Result<()> {
        let path = self.application_points_path.as_ref().ok_or_else(|| {
            PipelineError::InvalidConfig(
                "no application points configured (`Load Application points`)".into(),
            )
        })?;
        let (width, height) = self.normalized_size();
        self.application_mask = Some(ApplicationMask::load(path, width, height)?);
        Ok(())
    }

    pub fn image_list(&self) -> &[String] {
        &self.image_list
    }

    pub fn filter_bank(&self) -> &FilterBank {
        &self.filter_bank
    }

    pub fn application_mask(&self) -> Option<&ApplicationMask> {
        self.application_mask.as_ref()
    }

    pub fn unknown_keys(&self) -> &[String] {
        &self.unknown_keys
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn normalized_size(&self) -> (u32, u32) {
        (
            self.normalized_width.max(0) as u32,
            self.normalized_height.max(0) as u32,
        )
    }

    pub fn input_dir(&self, artifact: Artifact) -> Option<&Path> {
        self.input_dirs.get(&artifact).map(PathBuf::as_path)
    }

    pub fn output_dir(&self, artifact: Artifact) -> Option<&Path> {
        self.output_dirs.get(&artifact).map(PathBuf::as_path)
    }

    pub fn suffix(&self, artifact: Artifact) -> &str {
        self.suffixes.get(&artifact).map(String::as_str).unwrap_or("")
    }

    /// Human-readable summary of the active configuration.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let s = &self.stages;

        let mut process: Vec<&str> = Vec::new();
        for (enabled, name) in [
            (s.segmentation, "segmentation"),
            (s.normalization, "normalization"),
            (s.encoding, "encoding"),
            (s.matching, "matching"),
        ] {
            if enabled {
                process.push(name);
            }
        }
        let _ = write!(out, "- Process: {}", process.join(" | "));
        if !self.use_mask {
            let _ = write!(out, " (masks from segmentation are not used)");
        }
        let _ = writeln!(out);

        let list = self
            .image_list_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let _ = writeln!(out, "- List of images {list} contains {} images", self.image_list.len());

        for artifact in [
            Artifact::OriginalImage,
            Artifact::Parameters,
            Artifact::Mask,
            Artifact::NormalizedImage,
            Artifact::NormalizedMask,
            Artifact::IrisCode,
        ] {
            if let Some(dir) = self.input_dir(artifact) {
                let _ = writeln!(out, "- {artifact} will be loaded from: {}", dir.display());
            }
        }

        let saved = [
            (Artifact::SegmentedImage, s.segmentation),
            (Artifact::Parameters, s.segmentation),
            (Artifact::Mask, s.segmentation),
            (Artifact::NormalizedImage, s.normalization),
            (Artifact::NormalizedMask, s.normalization),
            (Artifact::IrisCode, s.encoding),
        ];
        for (artifact, stage_on) in saved {
            if let (true, Some(dir)) = (stage_on, self.output_dir(artifact)) {
                let _ = writeln!(
                    out,
                    "- {artifact} will be saved as: {}",
                    dir.join(format!("XXX{}", self.suffix(artifact))).display()
                );
            }
        }
        if let (true, Some(file)) = (s.matching, self.score_file.as_ref()) {
            let _ = writeln!(out, "- Matching scores will be saved in: {}", file.display());
        }

        if s.segmentation {
            let b = &self.bounds;
            let _ = writeln!(
                out,
                "- Pupil diameter ranges from {} to {}",
                b.min_pupil_diameter, b.max_pupil_diameter
            );
            let _ = writeln!(
                out,
                "- Iris diameter ranges from {} to {}",
                b.min_iris_diameter, b.max_iris_diameter
            );
        }
        if s.normalization || s.encoding || s.matching {
            let _ = writeln!(
                out,
                "- Size of normalized iris is {} x {}",
                self.normalized_width, self.normalized_height
            );
        }
        if s.encoding && !self.filter_bank.is_empty() {
            let shapes: Vec<String> = self
                .filter_bank
                .shapes()
                .iter()
                .map(|(r, c)| format!("{r}x{c}"))
                .collect();
            let _ = writeln!(
                out,
                "- {} Gabor filters: {}",
                self.filter_bank.len(),
                shapes.join(" ")
            );
        }
        if let (true, Some(mask)) = (s.matching, self.application_mask.as_ref()) {
            let _ = writeln!(out, "- {} application points", mask.valid_count());
        }
        out
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn normalize_separators(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '/' || c == '\\' { MAIN_SEPARATOR } else { c })
        .collect()
}
