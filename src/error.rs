use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FimError>;

/// Failures that abort the operation requesting them.
///
/// Per-file hashing problems never show up here; they are recorded as
/// `unreadable` entries of the cycle's [`crate::diff::DiffResult`].
#[derive(Debug, Error)]
pub enum FimError {
    #[error("no baseline found at {0}")]
    BaselineNotFound(PathBuf),

    #[error("baseline already exists at {0} (use rebaseline to replace it)")]
    BaselineExists(PathBuf),

    #[error("baseline I/O failed for {path}: {source}")]
    BaselineIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("baseline at {path} is malformed: {reason}")]
    BaselineFormat { path: PathBuf, reason: String },

    #[error("baseline database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("nothing to monitor: {0}")]
    NoTargets(String),

    #[error("invalid exclude pattern: {0}")]
    Exclude(#[from] globset::Error),

    #[error("scan worker failed: {0}")]
    Worker(String),
}

impl FimError {
    /// `true` for conditions the caller may recover from (e.g. by creating a baseline).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FimError::BaselineNotFound(_))
    }
}
