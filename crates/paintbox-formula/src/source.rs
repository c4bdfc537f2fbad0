//! Where the evaluator reads cell values from

use crate::evaluator::FormulaValue;
use paintbox_core::{CellKey, CellState, CellStore, SheetId};

/// Outcome of reading one cell during evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum CellRead {
    Value(FormulaValue),
    /// The cell is being calculated right now, so reading it closes a cycle
    InProgress,
}

/// Read access to cell values
///
/// `Sync` so a layer of independent cells can be evaluated from several
/// threads against one shared source.
pub trait CellSource: Sync {
    /// Look up a sheet by name (case-insensitive)
    fn sheet_id(&self, name: &str) -> Option<SheetId>;

    /// Read the value at a 0-based position
    fn read_cell(&self, sheet: SheetId, row: u32, col: u16) -> CellRead;
}

impl CellSource for CellStore {
    fn sheet_id(&self, name: &str) -> Option<SheetId> {
        CellStore::sheet_id(self, name)
    }

    fn read_cell(&self, sheet: SheetId, row: u32, col: u16) -> CellRead {
        match self.get(CellKey::new(sheet, row, col)) {
            None => CellRead::Value(FormulaValue::Empty),
            Some(cell) if cell.state() == CellState::Calculating => CellRead::InProgress,
            // Dirty cells read as their last value; ordering keeps that rare
            Some(cell) => CellRead::Value(cell.value().clone().into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paintbox_core::{CellContent, CellValue};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_store_reads() {
        let mut store = CellStore::new();
        let sheet = store.create_sheet("Main").unwrap();
        let key = CellKey::new(sheet, 0, 0);
        let id = store.set_content(key, CellContent::Value(CellValue::Number(4.0)));

        assert_eq!(
            store.read_cell(sheet, 0, 0),
            CellRead::Value(FormulaValue::Number(4.0))
        );
        assert_eq!(
            store.read_cell(sheet, 9, 9),
            CellRead::Value(FormulaValue::Empty)
        );

        store.set_state(id, CellState::Calculating);
        assert_eq!(store.read_cell(sheet, 0, 0), CellRead::InProgress);
        assert_eq!(CellSource::sheet_id(&store, "MAIN"), Some(sheet));
    }
}
