//! Stored cells, their identifiers and calculation state

use super::value::{CellError, CellValue, ValueType};
use ahash::AHashSet;
use std::fmt;

/// Index of a sheet in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SheetId(pub u32);

/// Index of a cell in the store's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub u32);

impl CellId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Location of a cell: sheet plus 0-based row and column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub sheet: SheetId,
    pub row: u32,
    pub col: u16,
}

impl CellKey {
    pub fn new(sheet: SheetId, row: u32, col: u16) -> Self {
        Self { sheet, row, col }
    }
}

/// Calculation state of a cell
///
/// ```text
/// Clean --(content or precedent changed)--> Dirty
/// Dirty --(evaluation starts)--> Calculating
/// Calculating --(success)--> Clean
/// Calculating --(error value)--> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CellState {
    #[default]
    Clean,
    Dirty,
    Calculating,
    Error,
}

impl CellState {
    /// Whether the cell holds a settled result (Clean or Error)
    pub fn is_settled(self) -> bool {
        matches!(self, CellState::Clean | CellState::Error)
    }
}

/// Error taxonomy for cell results
///
/// Every kind except [`ErrorKind::CircularReference`] corresponds one to one
/// with an Excel error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Malformed formula or unknown name (`#NAME?`)
    Parse,
    /// Reference to a missing sheet or outside a table (`#REF!`, `#NULL!`)
    Reference,
    /// Operand of the wrong type (`#VALUE!`)
    Type,
    /// Division by zero (`#DIV/0!`)
    Division,
    /// Lookup found nothing (`#N/A`)
    LookupMiss,
    /// Numeric domain error (`#NUM!`)
    NumericDomain,
    /// Cycle that did not converge, reported as `#REF!`
    CircularReference,
}

impl ErrorKind {
    /// Classify an Excel error code
    pub fn from_cell_error(error: CellError) -> Self {
        match error {
            CellError::Name => ErrorKind::Parse,
            CellError::Ref | CellError::Null => ErrorKind::Reference,
            CellError::Value => ErrorKind::Type,
            CellError::Div0 => ErrorKind::Division,
            CellError::Na => ErrorKind::LookupMiss,
            CellError::Num => ErrorKind::NumericDomain,
        }
    }

    /// The error code shown in the cell
    pub fn cell_error(self) -> CellError {
        match self {
            ErrorKind::Parse => CellError::Name,
            ErrorKind::Reference | ErrorKind::CircularReference => CellError::Ref,
            ErrorKind::Type => CellError::Value,
            ErrorKind::Division => CellError::Div0,
            ErrorKind::LookupMiss => CellError::Na,
            ErrorKind::NumericDomain => CellError::Num,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Parse => "ParseError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Division => "DivisionByZero",
            ErrorKind::LookupMiss => "LookupMiss",
            ErrorKind::NumericDomain => "NumericDomain",
            ErrorKind::CircularReference => "CircularReferenceError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw content of a cell as entered
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellContent {
    /// Never set; exists only because a formula references it
    #[default]
    Empty,
    /// Literal value
    Value(CellValue),
    /// Formula text including the leading `=`
    Formula(String),
}

impl CellContent {
    pub fn is_formula(&self) -> bool {
        matches!(self, CellContent::Formula(_))
    }

    pub fn formula_text(&self) -> Option<&str> {
        match self {
            CellContent::Formula(text) => Some(text),
            _ => None,
        }
    }
}

/// A cell in the store
#[derive(Debug, Clone)]
pub struct Cell {
    pub(crate) key: CellKey,
    pub(crate) content: CellContent,
    pub(crate) value: CellValue,
    pub(crate) state: CellState,
    pub(crate) error: Option<ErrorKind>,
    pub(crate) precedents: AHashSet<CellId>,
    pub(crate) dependents: AHashSet<CellId>,
}

impl Cell {
    pub(crate) fn new(key: CellKey) -> Self {
        Self {
            key,
            content: CellContent::Empty,
            value: CellValue::Empty,
            state: CellState::Clean,
            error: None,
            precedents: AHashSet::new(),
            dependents: AHashSet::new(),
        }
    }

    pub fn key(&self) -> CellKey {
        self.key
    }

    pub fn content(&self) -> &CellContent {
        &self.content
    }

    /// Formula text, if this is a formula cell
    pub fn formula(&self) -> Option<&str> {
        self.content.formula_text()
    }

    pub fn is_formula(&self) -> bool {
        self.content.is_formula()
    }

    /// Last resolved value
    pub fn value(&self) -> &CellValue {
        &self.value
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    /// Error kind when the value is an error
    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    /// Cells this cell's formula reads
    pub fn precedents(&self) -> &AHashSet<CellId> {
        &self.precedents
    }

    /// Cells whose formulas read this cell
    pub fn dependents(&self) -> &AHashSet<CellId> {
        &self.dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        for error in [
            CellError::Div0,
            CellError::Value,
            CellError::Ref,
            CellError::Name,
            CellError::Num,
            CellError::Na,
        ] {
            assert_eq!(ErrorKind::from_cell_error(error).cell_error(), error);
        }
        assert_eq!(ErrorKind::from_cell_error(CellError::Null), ErrorKind::Reference);
        assert_eq!(ErrorKind::CircularReference.cell_error(), CellError::Ref);
    }

    #[test]
    fn test_settled_states() {
        assert!(CellState::Clean.is_settled());
        assert!(CellState::Error.is_settled());
        assert!(!CellState::Dirty.is_settled());
        assert!(!CellState::Calculating.is_settled());
    }
}
