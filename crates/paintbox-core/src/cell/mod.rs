//! Cell-related types and utilities
//!
//! This module contains:
//! - [`CellValue`] - The resolved value of a cell
//! - [`CellAddress`] - A cell's location (e.g., "A1")
//! - [`CellRange`] / [`QualifiedRange`] - Ranges, optionally sheet-qualified
//! - [`Cell`] - A stored cell with content, state and dependency edges

mod address;
mod state;
mod value;

pub use address::{
    quote_sheet_name, split_sheet_prefix, CellAddress, CellRange, QualifiedRange, RangeCells,
};
pub use state::{Cell, CellContent, CellId, CellKey, CellState, ErrorKind, SheetId};
pub use value::{CellError, CellValue, SharedString, StringPool, ValueType};
