//! Error types shared across the CBS crates

use thiserror::Error;

/// Result type alias for shared CBS operations
pub type Result<T> = std::result::Result<T, CbsError>;

/// Errors raised by table-shaped data handling that is not tied to the
/// ingest pipeline.
#[derive(Error, Debug)]
pub enum CbsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Column not found: {0}")]
    MissingColumn(String),

    #[error("Row has {actual} values but the table has {expected} columns")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CbsError {
    /// Build a missing-column error for `name`
    pub fn missing_column(name: impl Into<String>) -> Self {
        Self::MissingColumn(name.into())
    }
}
