//! Reference extraction
//!
//! Walks a formula AST for the cells it reads. References stay symbolic
//! (sheet name plus range) until [`resolve_references`] expands them to
//! per-cell keys against a store.

use crate::ast::FormulaExpr;
use crate::evaluator::function_registry;
use ahash::AHashSet;
use paintbox_core::{CellKey, CellRange, CellStore, SheetId};

/// A reference as written in a formula; single cells are 1x1 ranges
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// `None` means the sheet the formula lives on
    pub sheet: Option<String>,
    pub range: CellRange,
}

/// Every cell and range reference in `expr`, in source order
pub fn collect_references(expr: &FormulaExpr) -> Vec<Reference> {
    let mut refs = Vec::new();
    expr.walk(&mut |node| match node {
        FormulaExpr::CellRef(r) => refs.push(Reference {
            sheet: r.sheet.clone(),
            range: CellRange::single(r.address),
        }),
        FormulaExpr::RangeRef(r) => refs.push(Reference {
            sheet: r.sheet.clone(),
            range: r.range,
        }),
        _ => {}
    });
    refs
}

/// Whether `expr` calls a function that must run on every pass
pub fn is_volatile(expr: &FormulaExpr) -> bool {
    let registry = function_registry();
    let mut volatile = false;
    expr.walk(&mut |node| {
        if let FormulaExpr::Function { name, .. } = node {
            volatile |= registry.is_volatile(name);
        }
    });
    volatile
}

/// References of one formula expanded to cell keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedReferences {
    pub cells: AHashSet<CellKey>,
    /// Sheet names that do not exist (yet); the formula reads `#REF!` there
    pub missing_sheets: Vec<String>,
}

impl ResolvedReferences {
    pub fn is_complete(&self) -> bool {
        self.missing_sheets.is_empty()
    }
}

/// Expand the references of a formula on `sheet` into the cells it reads
pub fn resolve_references(expr: &FormulaExpr, sheet: SheetId, store: &CellStore) -> ResolvedReferences {
    let mut resolved = ResolvedReferences::default();

    for reference in collect_references(expr) {
        let target = match &reference.sheet {
            None => sheet,
            Some(name) => match store.sheet_id(name) {
                Some(id) => id,
                None => {
                    if !resolved.missing_sheets.iter().any(|m| m.eq_ignore_ascii_case(name)) {
                        resolved.missing_sheets.push(name.clone());
                    }
                    continue;
                }
            },
        };
        resolved.cells.extend(
            reference
                .range
                .cells()
                .map(|addr| CellKey::new(target, addr.row, addr.col)),
        );
    }

    resolved
}
