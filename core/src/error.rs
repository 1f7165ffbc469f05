use std::path::PathBuf;

use crate::sandbox::SandboxError;

pub type Result<T> = std::result::Result<T, GradeError>;

/// Failures that abort grading for reasons the student did not cause.
///
/// Compile errors, style violations and failing tests are not errors of this
/// kind: they end up in the [`Outcome`](crate::outcome::Outcome).
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("Bad test data: {0}")]
    BadTestData(String),

    #[error("Bad config parameter '{key}': {reason}")]
    BadConfig { key: String, reason: String },

    #[error("Invalid project file {0:?}: {1}")]
    ProjectFile(PathBuf, #[source] toml::de::Error),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Io(#[from] fsutil::Error),
}

impl GradeError {
    pub fn bad_config(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::BadConfig {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
