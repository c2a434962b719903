//! Error types for stagehand.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stagehand operations.
pub type Result<T> = std::result::Result<T, StagehandError>;

/// Main error type for stagehand.
#[derive(Error, Debug)]
pub enum StagehandError {
    // Configuration errors
    #[error("missing required configuration key: {key}")]
    MissingConfig { key: String },

    #[error("configuration key '{key}' has the wrong shape: {reason}")]
    BadConfigShape { key: String, reason: String },

    #[error("invalid configuration file {path:?}: {reason}")]
    InvalidConfigFile { path: PathBuf, reason: String },

    #[error("stage '{stage}' references unknown stage '{reference}'")]
    UnknownStage { stage: String, reference: String },

    #[error("dependency cycle involving {}", .members.join(", "))]
    DependencyCycle { members: Vec<String> },

    #[error("template expansion did not converge after {passes} passes: {value:?}")]
    ExpansionDiverged { passes: usize, value: String },

    #[error("template reference '[% {reference} %]' does not resolve to a scalar")]
    BadExpansionReference { reference: String },

    // Call contract errors
    #[error("{callee}: unknown parameter '{name}'")]
    UnknownParameter { callee: String, name: String },

    #[error("{callee}: parameter '{name}' is exclusive")]
    ExclusiveParameter { callee: String, name: String },

    #[error("{callee}: parameter '{name}' expects {expected}, got {got}")]
    BadParameterType { callee: String, name: String, expected: &'static str, got: &'static str },

    #[error("{callee}: required parameter '{name}' is missing")]
    MissingParameter { callee: String, name: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    // Subprocess errors
    #[error("failed to spawn {name}: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} died with signal {signal}")]
    DiedWithSignal { name: String, signal: i32 },

    #[error("{name} exited with status {status}")]
    CommandFailed { name: String, status: i32 },

    #[error("program not found in secure search path: {name}")]
    ProgramNotFound { name: String },

    #[error("{name} produced unparseable output: {reason}")]
    UnparseableOutput { name: String, reason: String },

    // Artifact errors
    #[error("stage '{stage}' has no input archive: {path:?}")]
    ArchiveMissing { stage: String, path: PathBuf },

    // Namespace errors
    #[error("environment variable {var} is not set; not inside the build namespace")]
    MountEnvMissing { var: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stage callback failed: {0}")]
    Callback(String),
}

impl StagehandError {
    /// Create an `Io` error for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
