//! Error types for statebrain-autodiff

use thiserror::Error;

/// Result type for tape operations
pub type Result<T> = std::result::Result<T, AutodiffError>;

/// Failures surfaced to callers of the tape.
///
/// Mismatched operands inside a recorded operation are programmer errors and
/// panic instead; only the seams a caller feeds at runtime report here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutodiffError {
    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Unknown node: {0}")]
    UnknownNode(usize),

    #[error("Tape was recorded without tangents")]
    MissingTangents,
}
