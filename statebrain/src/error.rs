//! Error types for statebrain

use statebrain_autodiff::AutodiffError;
use thiserror::Error;

/// Result type for statebrain operations
pub type Result<T> = std::result::Result<T, StatebrainError>;

/// statebrain error types
#[derive(Error, Debug)]
pub enum StatebrainError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unknown model type: {0}")]
    UnknownModelType(String),

    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Symbol {symbol} out of range for alphabet of {alphabet_size}")]
    SymbolOutOfRange { symbol: usize, alphabet_size: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Autodiff error: {0}")]
    Autodiff(#[from] AutodiffError),
}

impl From<serde_json::Error> for StatebrainError {
    fn from(err: serde_json::Error) -> Self {
        StatebrainError::Decode(err.to_string())
    }
}

impl StatebrainError {
    pub(crate) fn shape(what: &'static str, expected: usize, actual: usize) -> Self {
        StatebrainError::ShapeMismatch {
            what,
            expected,
            actual,
        }
    }
}
