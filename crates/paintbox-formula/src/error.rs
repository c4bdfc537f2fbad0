//! Formula error types

use paintbox_core::CellError;
use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Errors that can occur during formula parsing or evaluation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    /// Malformed formula text
    #[error("Parse error at position {position}: {message}")]
    Parse { message: String, position: usize },

    /// Formula evaluation error
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Unknown function
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Wrong number of arguments
    #[error("Wrong number of arguments for {function}: expected {expected}, got {actual}")]
    ArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },

    /// Circular reference
    #[error("Circular reference detected")]
    CircularReference,

    /// Reference to invalid cell
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
}

impl FormulaError {
    pub(crate) fn parse(message: impl Into<String>, position: usize) -> Self {
        FormulaError::Parse {
            message: message.into(),
            position,
        }
    }

    /// The Excel error code a cell shows for this failure
    pub fn cell_error(&self) -> CellError {
        match self {
            FormulaError::Parse { .. } | FormulaError::UnknownFunction(_) => CellError::Name,
            FormulaError::Evaluation(_)
            | FormulaError::Argument(_)
            | FormulaError::ArgumentCount { .. } => CellError::Value,
            FormulaError::CircularReference | FormulaError::InvalidReference(_) => CellError::Ref,
        }
    }
}
