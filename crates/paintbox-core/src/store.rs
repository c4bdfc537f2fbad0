//! The cell store: an arena of cells grouped into sheets

use crate::cell::{
    quote_sheet_name, Cell, CellAddress, CellContent, CellId, CellKey, CellState, CellValue,
    ErrorKind, QualifiedRange, SharedString, SheetId, StringPool,
};
use crate::error::{Error, Result};
use crate::named_range::{NamedRange, NamedRangeCollection};
use crate::sheet::{validate_sheet_name, Sheet};
use ahash::{AHashMap, AHashSet};
use std::collections::VecDeque;

/// Owns every sheet, cell and named range of a workbook.
///
/// Cells live in a single arena and are addressed by [`CellId`]. Edges are
/// kept on both ends: a formula cell lists its precedents, and every
/// precedent lists the formula among its dependents.
#[derive(Debug, Default)]
pub struct CellStore {
    sheets: Vec<Sheet>,
    /// Lowercased sheet name -> id
    sheet_lookup: AHashMap<String, SheetId>,
    cells: Vec<Cell>,
    names: NamedRangeCollection,
    strings: StringPool,
}

impl CellStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Sheets ====================

    /// Create a sheet; names are unique ignoring case
    pub fn create_sheet(&mut self, name: &str) -> Result<SheetId> {
        validate_sheet_name(name)?;
        let lower = name.to_lowercase();
        if self.sheet_lookup.contains_key(&lower) {
            return Err(Error::DuplicateSheet(name.to_string()));
        }

        let id = SheetId(self.sheets.len() as u32);
        self.sheets.push(Sheet::new(id, name));
        self.sheet_lookup.insert(lower, id);
        log::debug!("created sheet {:?} as {:?}", name, id);
        Ok(id)
    }

    /// Look up a sheet by name (case-insensitive)
    pub fn sheet_id(&self, name: &str) -> Option<SheetId> {
        self.sheet_lookup.get(&name.to_lowercase()).copied()
    }

    pub fn sheet(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets.get(id.0 as usize)
    }

    pub fn sheet_name(&self, id: SheetId) -> Option<&str> {
        self.sheet(id).map(Sheet::name)
    }

    pub fn sheets(&self) -> impl Iterator<Item = &Sheet> {
        self.sheets.iter()
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    // ==================== Addressing ====================

    /// Resolve an address on `sheet`
    ///
    /// The address may carry its own sheet prefix, which then wins.
    pub fn key(&self, sheet: SheetId, address: &str) -> Result<CellKey> {
        self.resolve(address, Some(sheet))
    }

    /// Resolve `Sheet!A1` (or a bare `A1` against `default_sheet`) to a key
    pub fn resolve(&self, reference: &str, default_sheet: Option<SheetId>) -> Result<CellKey> {
        let parsed = QualifiedRange::parse(reference)?;
        if !parsed.is_single_cell() {
            return Err(Error::InvalidAddress(format!(
                "'{}' is a range, expected a single cell",
                reference
            )));
        }

        let sheet = match &parsed.sheet {
            Some(name) => self
                .sheet_id(name)
                .ok_or_else(|| Error::SheetNotFound(name.clone()))?,
            None => default_sheet.ok_or_else(|| {
                Error::InvalidAddress(format!("'{}' needs a sheet name", reference))
            })?,
        };
        if self.sheet(sheet).is_none() {
            return Err(Error::SheetNotFound(format!("{:?}", sheet)));
        }

        let addr = parsed.range.start;
        Ok(CellKey::new(sheet, addr.row, addr.col))
    }

    /// Display form of a key, e.g. `'Labor Rates'!B2`
    pub fn label(&self, key: CellKey) -> String {
        let addr = CellAddress::new(key.row, key.col);
        match self.sheet_name(key.sheet) {
            Some(name) => format!("{}!{}", quote_sheet_name(name), addr),
            None => addr.to_string(),
        }
    }

    // ==================== Cells ====================

    pub fn cell_id(&self, key: CellKey) -> Option<CellId> {
        self.sheet(key.sheet)?.get(key.row, key.col)
    }

    /// Get a cell by id
    ///
    /// Ids are only handed out by this store, so indexing cannot miss.
    pub fn cell(&self, id: CellId) -> &Cell {
        &self.cells[id.index()]
    }

    /// The stored cell at `key`, or `None` for a cell that was never touched
    pub fn get(&self, key: CellKey) -> Option<&Cell> {
        self.cell_id(key).map(|id| self.cell(id))
    }

    /// Resolved value at `key`; untouched cells read as [`CellValue::Empty`]
    pub fn value(&self, key: CellKey) -> CellValue {
        self.get(key).map(|c| c.value.clone()).unwrap_or_default()
    }

    /// Number of cells in the arena
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellId, &Cell)> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, cell)| (CellId(i as u32), cell))
    }

    /// Ids of all formula cells
    pub fn formula_cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells().filter(|(_, c)| c.is_formula()).map(|(id, _)| id)
    }

    /// Get the id for `key`, creating an empty placeholder cell if needed
    pub fn ensure_cell(&mut self, key: CellKey) -> CellId {
        if let Some(id) = self.cell_id(key) {
            return id;
        }
        let id = CellId(self.cells.len() as u32);
        self.cells.push(Cell::new(key));
        if let Some(sheet) = self.sheets.get_mut(key.sheet.0 as usize) {
            sheet.insert(key.row, key.col, id);
        }
        id
    }

    /// Replace the content of a cell and mark its dependents dirty
    ///
    /// Literal values settle immediately. Formula cells become Dirty and keep
    /// their previous value until recalculated; the caller is expected to
    /// follow up with [`CellStore::set_precedents`].
    pub fn set_content(&mut self, key: CellKey, content: CellContent) -> CellId {
        let id = self.ensure_cell(key);

        let content = match content {
            CellContent::Value(CellValue::String(s)) => {
                CellContent::Value(CellValue::String(self.strings.intern(s.as_str())))
            }
            other => other,
        };

        let cell = &mut self.cells[id.index()];
        match &content {
            CellContent::Empty => {
                cell.value = CellValue::Empty;
                cell.state = CellState::Clean;
                cell.error = None;
            }
            CellContent::Value(v) => {
                cell.value = v.clone();
                cell.error = v.error().map(ErrorKind::from_cell_error);
                cell.state = if cell.error.is_some() {
                    CellState::Error
                } else {
                    CellState::Clean
                };
            }
            CellContent::Formula(_) => {
                cell.state = CellState::Dirty;
            }
        }
        let was_formula = cell.content.is_formula();
        let is_formula = content.is_formula();
        cell.content = content;

        if was_formula && !is_formula {
            self.set_precedents(id, AHashSet::new());
        }
        self.mark_dirty(id);
        id
    }

    /// Replace the precedent set of a formula cell, keeping the reverse
    /// edges on the precedents in sync
    pub fn set_precedents(&mut self, id: CellId, precedents: AHashSet<CellId>) {
        let old = std::mem::take(&mut self.cells[id.index()].precedents);
        for p in old.difference(&precedents) {
            self.cells[p.index()].dependents.remove(&id);
        }
        for p in precedents.difference(&old) {
            self.cells[p.index()].dependents.insert(id);
        }
        self.cells[id.index()].precedents = precedents;
    }

    /// Mark `id` (if it is a formula) and every transitive dependent Dirty.
    ///
    /// Returns the number of cells whose state changed. Traversal stops at
    /// cells that are already Dirty, since their dependents are Dirty too.
    pub fn mark_dirty(&mut self, id: CellId) -> usize {
        let mut marked = 0;
        if self.cells[id.index()].is_formula() && self.cells[id.index()].state != CellState::Dirty
        {
            self.cells[id.index()].state = CellState::Dirty;
            marked += 1;
        }

        let mut queue: VecDeque<CellId> = self.cells[id.index()].dependents.iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            let cell = &mut self.cells[next.index()];
            if cell.state == CellState::Dirty {
                continue;
            }
            cell.state = CellState::Dirty;
            marked += 1;
            queue.extend(cell.dependents.iter().copied());
        }
        marked
    }

    /// Set the calculation state of a cell
    pub fn set_state(&mut self, id: CellId, state: CellState) {
        self.cells[id.index()].state = state;
    }

    /// Store a calculated result; the state becomes Clean or Error
    pub fn commit(&mut self, id: CellId, value: CellValue, error: Option<ErrorKind>) {
        let cell = &mut self.cells[id.index()];
        let error = error.or_else(|| value.error().map(ErrorKind::from_cell_error));
        cell.state = if error.is_some() {
            CellState::Error
        } else {
            CellState::Clean
        };
        cell.error = error;
        cell.value = value;
    }

    /// Intern a string in the store's pool
    pub fn intern(&mut self, s: &str) -> SharedString {
        self.strings.intern(s)
    }

    // ==================== Named ranges ====================

    pub fn define_name(&mut self, range: NamedRange) -> Result<()> {
        self.names.define(range)
    }

    pub fn names(&self) -> &NamedRangeCollection {
        &self.names
    }
}
