//! Error kinds raised while evaluating the busbar problem.
//!
//! Every variant is fatal for the evaluation that raised it. Nothing in this
//! crate retries; callers stop instead of folding a bad point into a sweep.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for problem operations
pub type ProblemResult<T> = Result<T, ProblemError>;

#[derive(Error, Debug)]
pub enum ProblemError {
    /// The external executable could not be started at all
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit status from the mesher or the solver
    #[error("{tool} exited with status {status}: {output}")]
    ExternalTool {
        tool: String,
        status: i32,
        output: String,
    },

    /// Mesher exited cleanly but reported a warning or skipped an entity
    #[error("mesher reported an unreliable mesh: {line}")]
    MeshWarning { line: String },

    /// Mesher output lacks the `<nodes> nodes <elements> elements` summary
    #[error("mesher output has no '<nodes> nodes <elements> elements' summary")]
    MeshParse,

    /// Solver output does not acknowledge an injected parameter
    #[error("solver did not acknowledge parameter {name} (expected '{expected}')")]
    ParameterAck { name: String, expected: String },

    #[error("result file not found: {}", path.display())]
    MissingResultFile { path: PathBuf },

    #[error("malformed result file {}: {reason}", path.display())]
    MalformedResult { path: PathBuf, reason: String },

    /// Construction-time precondition of a problem description
    #[error("invalid problem: {0}")]
    InvalidProblem(String),

    #[error("expected {expected} parameter values, got {found}")]
    Dimension { expected: usize, found: usize },

    #[error("result field '{field}' has no entry at index {index} (length {len})")]
    MissingValue {
        field: &'static str,
        index: usize,
        len: usize,
    },

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("objective is NaN at {point:?}")]
    NonFiniteObjective { point: Vec<f64> },

    #[error("sensitivity cache {} holds {found} points, expected {expected}", path.display())]
    CacheSizeMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    /// A default mesh-density value is not what the geometry declares
    #[error("{name} = {expected} is not declared in {} (found {found:?})", path.display())]
    UndeclaredDefault {
        path: PathBuf,
        name: String,
        expected: f64,
        found: Option<f64>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProblemError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedResult {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
