//! # paintbox-core
//!
//! Core data structures for the paintbox calculation engine.
//!
//! This crate provides the cell store every other layer builds on:
//! - [`CellValue`] and [`CellError`] - resolved values and Excel error codes
//! - [`CellAddress`] and [`CellRange`] - A1-style addressing, including
//!   sheet-qualified forms such as `'Labor Rates'!$B$2`
//! - [`CellStore`] - an arena of [`Cell`]s grouped into [`Sheet`]s, with
//!   dependency edges and dirty propagation
//! - [`NamedRange`] - workbook- and sheet-scoped defined names
//!
//! ## Example
//!
//! ```rust
//! use paintbox_core::{CellContent, CellStore, CellValue};
//!
//! let mut store = CellStore::new();
//! let sheet = store.create_sheet("Estimate").unwrap();
//!
//! let key = store.key(sheet, "B2").unwrap();
//! store.set_content(key, CellContent::Value(CellValue::Number(42.0)));
//!
//! assert_eq!(store.value(key), CellValue::Number(42.0));
//! ```

pub mod cell;
pub mod error;
pub mod named_range;
pub mod sheet;
pub mod store;

// Re-exports for convenience
pub use cell::{
    Cell, CellAddress, CellContent, CellError, CellId, CellKey, CellRange, CellState, ErrorKind,
    QualifiedRange, SharedString, SheetId, StringPool, ValueType,
};
pub use error::{Error, Result};
pub use named_range::{NameScope, NameTarget, NamedRange, NamedRangeCollection};
pub use sheet::Sheet;
pub use store::CellStore;

pub use cell::CellValue;

/// Maximum number of rows in a worksheet (Excel limit)
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns in a worksheet (Excel limit)
pub const MAX_COLS: u16 = 16_384;

/// Maximum length of a sheet name
pub const MAX_SHEET_NAME_LEN: usize = 31;
