use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced while building problems or configuration from external
/// input. Solver failures are never errors: dead ends and exhausted budgets
/// are reported through [`crate::solvers::SolveStatus`].
#[derive(Debug, Error)]
pub enum MdpError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed grid map at line {line}: {reason}")]
    MalformedMap { line: usize, reason: String },
    #[error("malformed problem description: {0}")]
    MalformedProblem(String),
    #[error("unknown state {0:?}")]
    UnknownState(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl MdpError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MdpError::Io {
            path: path.into(),
            source,
        }
    }
}
