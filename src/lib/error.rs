use std::path::PathBuf;

use chrono::NaiveDate;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

pub type RosResult<T> = Result<T, RosError>;

#[derive(Debug, Error)]
pub enum RosError {
    /// archive or network failure, retry may help
    #[error("source {dataset} unavailable: {reason}")]
    SourceUnavailable { dataset: String, reason: String },

    /// the requested date is newer than the archive latency floor
    #[error("{dataset} for {date} is not yet available (archive latency is {latency_days} days)")]
    DataNotYetAvailable {
        dataset: String,
        date: NaiveDate,
        latency_days: i64,
    },

    #[error("boundary CRS {found} cannot be used on a {expected} grid")]
    CrsMismatch { found: String, expected: String },

    #[error("{requested} hours requested but only {available} available")]
    InsufficientHistory { requested: u32, available: u32 },

    #[error("model features missing from the computed columns: {}", missing.join(", "))]
    FeatureMismatch { missing: Vec<String> },

    #[error("model file {} not found", .0.display())]
    ModelNotFound(PathBuf),

    #[error("grid mismatch: {0}")]
    GridMismatch(String),

    #[error("cache table {} is locked by another writer", .0.display())]
    CacheLocked(PathBuf),

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid content in {path}: {reason}")]
    Format { path: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RosError {
    pub fn format(path: impl Into<String>, reason: impl ToString) -> Self {
        RosError::Format {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// stable identifier of the error family
    pub fn kind(&self) -> &'static str {
        match self {
            RosError::SourceUnavailable { .. } => "SourceUnavailable",
            RosError::DataNotYetAvailable { .. } => "DataNotYetAvailable",
            RosError::CrsMismatch { .. } => "CRSMismatch",
            RosError::InsufficientHistory { .. } => "InsufficientHistory",
            RosError::FeatureMismatch { .. } => "FeatureMismatch",
            RosError::ModelNotFound(_) => "ModelNotFound",
            RosError::GridMismatch(_) => "GridMismatch",
            RosError::CacheLocked(_) => "CacheLocked",
            RosError::Cancelled => "Cancelled",
            RosError::Format { .. } => "Format",
            RosError::Config(_) => "Config",
            RosError::Io(_) => "Io",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RosError::SourceUnavailable { .. } | RosError::CacheLocked(_)
        )
    }
}

/// Structured form of an error as exposed to callers: a kind and a human message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
}

impl From<&RosError> for ErrorReport {
    fn from(err: &RosError) -> Self {
        let message = match err {
            // io errors carry OS details the caller has no use for
            RosError::Io(_) => "storage error while accessing the feature cache".to_owned(),
            other => other.to_string(),
        };
        ErrorReport {
            kind: err.kind().to_owned(),
            message,
        }
    }
}
