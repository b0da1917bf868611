//! Error taxonomy for the orchestrator.
//!
//! Every failure an invocation can produce surfaces as a [`BuildError`]. The
//! top-level driver only needs [`BuildError::failure_count`] to decide the
//! process exit status; everything else is for the operator.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The command exited unsuccessfully. Its build record has been dropped.
    #[error("command failed ({status}): {command}")]
    Execution { command: String, status: String },

    /// The command exited 0 but none of its path tokens got newer.
    #[error("no files were modified by the command: {command}")]
    NothingModified { command: String },

    /// The surrounding task group was cancelled.
    #[error("invocation cancelled")]
    Cancelled,

    /// A dependency file contained an entry that could not be resolved.
    #[error("unexpected depfile entry `{entry}` in {}", path.display())]
    DepfileFormat { path: PathBuf, entry: String },

    /// An identical invocation was already submitted and it did not succeed.
    #[error("identical invocation failed elsewhere: {command}")]
    PeerFailed { command: String },

    #[error("jobserver pipe {}: {source}", path.display())]
    Jobserver {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to {operation} '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("worker panicked: {0}")]
    Panicked(String),

    /// Failures collected from the tasks of one group.
    #[error("{} invocation(s) failed", .0.len())]
    Group(Vec<BuildError>),
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildError::Cancelled)
    }

    /// Number of real failures this error stands for. Nested groups are
    /// flattened and cancellations do not count.
    pub fn failure_count(&self) -> usize {
        match self {
            BuildError::Cancelled => 0,
            BuildError::Group(errors) => errors.iter().map(BuildError::failure_count).sum(),
            _ => 1,
        }
    }

    /// Leaf failures in submission order, with groups flattened.
    pub fn leaves(&self) -> Vec<&BuildError> {
        match self {
            BuildError::Group(errors) => errors.iter().flat_map(BuildError::leaves).collect(),
            BuildError::Cancelled => Vec::new(),
            other => vec![other],
        }
    }
}
