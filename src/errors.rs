// THEORY:
// Every failure in the engine flows through a single `PipelineError`. The batch
// driver does not decide what to do from *where* an error was caught; it asks the
// error itself. `severity()` separates the two channels the pipeline needs:
//
// - `Fatal`: nothing useful can happen any more (no configuration, no score file).
// - `Item`: one image or one pair is lost, the batch moves on. A score line that
//   cannot be written into an open report counts as a lost pair.
//
// `kind()` is the coarse classification used in diagnostics and tests.

use std::path::PathBuf;
use thiserror::Error;

use crate::core_modules::eye::Artifact;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An invalid geometric parameter (e.g. a negative radius).
    Validation,
    /// Malformed or missing configuration, or an unsatisfiable stage precondition.
    Config,
    /// A file could not be read or written.
    Io,
    /// A numeric procedure could not produce a usable result.
    Computation,
}

/// How far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts the whole run.
    Fatal,
    /// Loses the current image or pair only.
    Item,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("circle with negative radius: {0}")]
    NegativeRadius(i64),

    #[error("degenerate circle fit over {points} points")]
    DegenerateFit { points: usize },

    #[error("configuration path is empty")]
    EmptyConfigPath,

    #[error("cannot read configuration file {}", path.display())]
    ConfigSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value `{value}` for option `{key}` at line {line}")]
    InvalidOption { key: String, value: String, line: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot {action} without loading original images")]
    MissingOriginalImages { action: &'static str },

    #[error("{stage} requires the {artifact}, which was neither computed nor loaded")]
    MissingArtifact { stage: &'static str, artifact: Artifact },

    #[error("cannot read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {what} in {}: {detail}", path.display())]
    Malformed {
        what: &'static str,
        path: PathBuf,
        detail: String,
    },

    #[error("image codec failed for {}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot create matching score file {}", path.display())]
    ScoreReport {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write matching scores to {}", path.display())]
    ScoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("segmentation failed: {0}")]
    Segmentation(String),

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("cannot match iris codes: {0}")]
    Matching(String),

    #[error("worker pool failure: {0}")]
    Worker(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NegativeRadius(_) => ErrorKind::Validation,
            PipelineError::EmptyConfigPath
            | PipelineError::ConfigSource { .. }
            | PipelineError::InvalidOption { .. }
            | PipelineError::InvalidConfig(_)
            | PipelineError::MissingOriginalImages { .. }
            | PipelineError::MissingArtifact { .. }
            | PipelineError::Malformed { .. } => ErrorKind::Config,
            PipelineError::Read { .. }
            | PipelineError::Write { .. }
            | PipelineError::Image { .. }
            | PipelineError::ScoreReport { .. }
            | PipelineError::ScoreWrite { .. } => ErrorKind::Io,
            PipelineError::DegenerateFit { .. }
            | PipelineError::Segmentation(_)
            | PipelineError::Encoding(_)
            | PipelineError::Matching(_)
            | PipelineError::Worker(_) => ErrorKind::Computation,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            PipelineError::EmptyConfigPath
            | PipelineError::ConfigSource { .. }
            | PipelineError::ScoreReport { .. } => Severity::Fatal,
            _ => Severity::Item,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_image_failures_are_item_severity() {
        let err = PipelineError::MissingOriginalImages { action: "segment" };
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.severity(), Severity::Item);

        let err = PipelineError::Read {
            path: PathBuf::from("eye_1.bmp"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!err.is_fatal());
    }

    #[test]
    fn only_creating_the_score_report_aborts_the_run() {
        let err = PipelineError::ScoreReport {
            path: PathBuf::from("/nowhere/scores.txt"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("/nowhere/scores.txt"));

        let err = PipelineError::ScoreWrite {
            path: PathBuf::from("/dev/full"),
            source: std::io::Error::from(std::io::ErrorKind::Other),
        };
        assert_eq!(err.severity(), Severity::Item);
    }

    #[test]
    fn messages_name_the_offending_parameter() {
        assert_eq!(
            PipelineError::NegativeRadius(-3).to_string(),
            "circle with negative radius: -3"
        );
        let err = PipelineError::InvalidOption {
            key: "Process matching".into(),
            value: "maybe".into(),
            line: 4,
        };
        assert!(err.to_string().contains("Process matching"));
        assert!(err.to_string().contains("maybe"));
    }
}
