//! Error taxonomy for sweep progress and review aggregation.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, BoolbackError>;

#[derive(Debug, thiserror::Error)]
pub enum BoolbackError {
    /// Malformed sweep specification or expression list; the caller must fix the input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A sweep produced a combination that cannot be resolved into an experiment identity.
    #[error("invalid sweep combination at index {index}: {message}")]
    InvalidCombination { index: usize, message: String },

    #[error("malformed artifact {}: {message}", path.display())]
    ArtifactMalformed { path: PathBuf, message: String },

    /// Score `per_sample` data disagrees with the outputs it claims to score.
    #[error("score mismatch for experiment {experiment} variant {variant} at index {index}: {message}")]
    ScoreMismatch {
        experiment: String,
        variant: String,
        index: usize,
        message: String,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Another writer held the store lock for longer than the caller is willing to wait.
    #[error("store busy: {} is locked by another writer", path.display())]
    StoreBusy { path: PathBuf },

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BoolbackError {
    pub fn code(&self) -> &'static str {
        match self {
            BoolbackError::Configuration(_) => "configuration_error",
            BoolbackError::InvalidCombination { .. } => "invalid_combination",
            BoolbackError::ArtifactMalformed { .. } => "artifact_malformed",
            BoolbackError::ScoreMismatch { .. } => "score_mismatch",
            BoolbackError::Validation(_) => "validation_error",
            BoolbackError::NotFound(_) => "not_found",
            BoolbackError::StoreBusy { .. } => "store_busy",
            BoolbackError::Io { .. } => "io_error",
        }
    }

    /// HTTP-style status hint for callers that forward errors over a wire.
    pub fn status_code(&self) -> u16 {
        match self {
            BoolbackError::Configuration(_) | BoolbackError::Validation(_) => 400,
            BoolbackError::InvalidCombination { .. } => 422,
            BoolbackError::NotFound(_) => 404,
            BoolbackError::ScoreMismatch { .. } => 409,
            BoolbackError::StoreBusy { .. } => 503,
            BoolbackError::ArtifactMalformed { .. } | BoolbackError::Io { .. } => 500,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        BoolbackError::ArtifactMalformed {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BoolbackError::Io {
            path: path.into(),
            source,
        }
    }
}
