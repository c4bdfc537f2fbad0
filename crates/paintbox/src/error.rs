//! Error types for the calculation engine
//!
//! Per-cell problems never surface here; they become error values on the
//! cell. These are the structural failures that abort a whole operation.

use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Store-level failure (bad address, duplicate sheet, bad name)
    #[error(transparent)]
    Core(#[from] paintbox_core::Error),

    #[error(transparent)]
    Formula(#[from] paintbox_formula::FormulaError),

    /// The analysis document is structurally invalid
    #[error("Invalid analysis document: {0}")]
    InvalidDocument(String),

    /// The document refers to a sheet it never declares
    #[error("Unknown sheet in analysis document: {0}")]
    UnknownSheet(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidDocument(message.into())
    }
}
