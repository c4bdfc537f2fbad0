//! Errors raised by the cell store and address parsing

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Text that does not read as an A1 address or range
    #[error("invalid cell address: {0}")]
    InvalidAddress(String),

    /// A well-formed address past XFD1048576
    #[error("'{0}' is outside the sheet grid")]
    OutOfBounds(String),

    /// A range whose two ends sit on different sheets
    #[error("range '{0}' spans two sheets")]
    SheetSpanningRange(String),

    #[error("no sheet named '{0}'")]
    SheetNotFound(String),

    #[error("invalid sheet name: {0}")]
    InvalidSheetName(String),

    #[error("a sheet named '{0}' already exists")]
    DuplicateSheet(String),

    #[error("invalid defined name: {0}")]
    InvalidName(String),
}
