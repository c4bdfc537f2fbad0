//! Sheets: named, ordered collections of cells

use crate::cell::{CellAddress, CellId, SheetId};
use crate::error::{Error, Result};
use crate::MAX_SHEET_NAME_LEN;
use std::collections::BTreeMap;

/// A sheet in the store
///
/// Cells are kept in row-major order so iteration matches the way a
/// workbook reads top to bottom.
#[derive(Debug, Clone)]
pub struct Sheet {
    id: SheetId,
    name: String,
    cells: BTreeMap<(u32, u16), CellId>,
}

impl Sheet {
    pub(crate) fn new(id: SheetId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            cells: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> SheetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of cells held by this sheet, including empty placeholders
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn get(&self, row: u32, col: u16) -> Option<CellId> {
        self.cells.get(&(row, col)).copied()
    }

    pub(crate) fn insert(&mut self, row: u32, col: u16, id: CellId) {
        self.cells.insert((row, col), id);
    }

    /// Cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (CellAddress, CellId)> + '_ {
        self.cells
            .iter()
            .map(|(&(row, col), &id)| (CellAddress::new(row, col), id))
    }

    /// Last used row and column (0-based), if the sheet has cells
    pub fn dimensions(&self) -> Option<(u32, u16)> {
        let max_row = self.cells.keys().map(|&(r, _)| r).max()?;
        let max_col = self.cells.keys().map(|&(_, c)| c).max()?;
        Some((max_row, max_col))
    }
}

/// Validate a sheet name the way Excel does
pub(crate) fn validate_sheet_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidSheetName("Sheet name cannot be empty".into()));
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return Err(Error::InvalidSheetName(format!(
            "Sheet name too long (max {} characters)",
            MAX_SHEET_NAME_LEN
        )));
    }

    const INVALID_CHARS: &[char] = &[':', '\\', '/', '?', '*', '[', ']'];
    for c in INVALID_CHARS {
        if name.contains(*c) {
            return Err(Error::InvalidSheetName(format!(
                "Sheet name cannot contain '{}'",
                c
            )));
        }
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(Error::InvalidSheetName(
            "Sheet name cannot begin or end with an apostrophe".into(),
        ));
    }

    Ok(())
}
