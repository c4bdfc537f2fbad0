//! Parse cache shared by every formula cell of a store
//!
//! Estimate workbooks repeat the same formula text across rooms and sheets,
//! so ASTs are keyed by exact formula text and shared via `Arc`. A formula
//! that used a sheet-local name is only valid on that sheet, and its entry
//! is scoped accordingly.

use crate::error::FormulaResult;
use crate::parser::{parse_formula_with, ParseContext, ParsedFormula, ParserOptions, SheetNames};
use ahash::AHashMap;
use paintbox_core::{CellStore, SheetId};
use std::sync::Arc;

#[derive(Debug)]
struct CacheEntry {
    parsed: Arc<ParsedFormula>,
    /// `Some` when the parse used a name local to that sheet
    scope: Option<SheetId>,
    /// Number of cells currently holding this entry
    users: usize,
}

impl CacheEntry {
    fn usable_on(&self, sheet: SheetId, store: &CellStore) -> bool {
        match self.scope {
            Some(scope) => scope == sheet,
            // A workbook-level parse is wrong on a sheet that shadows one of its names
            None => {
                !store.names().has_local_names(sheet)
                    || self
                        .parsed
                        .names
                        .iter()
                        .all(|name| store.names().get_local(name, sheet).is_none())
            }
        }
    }
}

/// Counters reported by [`ParseCache::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Reference-counted cache of parsed formulas
#[derive(Debug, Default)]
pub struct ParseCache {
    entries: AHashMap<Arc<str>, Vec<CacheEntry>>,
    hits: u64,
    misses: u64,
}

impl ParseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the parse of `text` as seen from `sheet`, parsing on a miss.
    ///
    /// The returned formula counts as one user until handed back through
    /// [`ParseCache::release`]. Parse failures are not cached.
    pub fn acquire(
        &mut self,
        text: &str,
        sheet: SheetId,
        store: &CellStore,
        options: ParserOptions,
    ) -> FormulaResult<Arc<ParsedFormula>> {
        if let Some(entries) = self.entries.get_mut(text) {
            if let Some(entry) = entries.iter_mut().find(|e| e.usable_on(sheet, store)) {
                entry.users += 1;
                self.hits += 1;
                return Ok(Arc::clone(&entry.parsed));
            }
        }

        self.misses += 1;
        let names = SheetNames::new(store, sheet);
        let parsed = Arc::new(parse_formula_with(text, &ParseContext::new(options, &names))?);
        let scope = parsed.uses_local_names.then_some(sheet);

        self.entries
            .entry(Arc::from(text))
            .or_default()
            .push(CacheEntry {
                parsed: Arc::clone(&parsed),
                scope,
                users: 1,
            });
        Ok(parsed)
    }

    /// Drop one user of a formula obtained from [`ParseCache::acquire`]
    pub fn release(&mut self, text: &str, parsed: &Arc<ParsedFormula>) {
        if let Some(entries) = self.entries.get_mut(text) {
            if let Some(entry) = entries.iter_mut().find(|e| Arc::ptr_eq(&e.parsed, parsed)) {
                entry.users = entry.users.saturating_sub(1);
            }
        }
    }

    /// Forget every entry whose parse looked up `name`
    ///
    /// Called when a name is defined, since earlier parses resolved it
    /// differently. Cells keep their `Arc` until they are reparsed.
    pub fn forget_name(&mut self, name: &str) -> usize {
        let lower = name.to_lowercase();
        let mut removed = 0;
        for entries in self.entries.values_mut() {
            let before = entries.len();
            entries.retain(|e| !e.parsed.names.contains(&lower));
            removed += before - entries.len();
        }
        self.entries.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Remove entries no cell uses any more; returns how many were dropped
    pub fn sweep(&mut self) -> usize {
        let mut removed = 0;
        for entries in self.entries.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.users > 0);
            removed += before - entries.len();
        }
        self.entries.retain(|_, entries| !entries.is_empty());
        if removed > 0 {
            log::debug!("parse cache swept {} unused entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FormulaExpr;
    use paintbox_core::{CellError, NamedRange};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identical_text_shares_one_ast() {
        let mut store = CellStore::new();
        let a = store.create_sheet("A").unwrap();
        let b = store.create_sheet("B").unwrap();
        let mut cache = ParseCache::new();
        let opts = ParserOptions::default();

        let first = cache.acquire("=SUM(A1:A3)", a, &store, opts).unwrap();
        let second = cache.acquire("=SUM(A1:A3)", b, &store, opts).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                hits: 1,
                misses: 1
            }
        );
    }

    #[test]
    fn test_local_names_scope_entries() {
        let mut store = CellStore::new();
        let a = store.create_sheet("A").unwrap();
        let b = store.create_sheet("B").unwrap();
        store
            .define_name(NamedRange::workbook_scope("Rate", "0.05").unwrap())
            .unwrap();
        store
            .define_name(NamedRange::sheet_scope("Rate", "0.08", b).unwrap())
            .unwrap();
        let mut cache = ParseCache::new();
        let opts = ParserOptions::default();

        let on_a = cache.acquire("=Rate*2", a, &store, opts).unwrap();
        let on_b = cache.acquire("=Rate*2", b, &store, opts).unwrap();
        assert!(!Arc::ptr_eq(&on_a, &on_b));
        assert_eq!(cache.len(), 2);

        let again_b = cache.acquire("=Rate*2", b, &store, opts).unwrap();
        assert!(Arc::ptr_eq(&on_b, &again_b));
    }

    #[test]
    fn test_release_and_sweep() {
        let mut store = CellStore::new();
        let a = store.create_sheet("A").unwrap();
        let mut cache = ParseCache::new();
        let opts = ParserOptions::default();

        let one = cache.acquire("=1+1", a, &store, opts).unwrap();
        let two = cache.acquire("=1+1", a, &store, opts).unwrap();
        cache.release("=1+1", &one);
        assert_eq!(cache.sweep(), 0);
        cache.release("=1+1", &two);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_forget_name_forces_reparse() {
        let mut store = CellStore::new();
        let a = store.create_sheet("A").unwrap();
        let mut cache = ParseCache::new();
        let opts = ParserOptions::default();

        let before = cache.acquire("=IFERROR(Markup,0)", a, &store, opts).unwrap();
        if let FormulaExpr::Function { args, .. } = &before.expr {
            assert_eq!(args[0], FormulaExpr::Error(CellError::Name));
        }

        store
            .define_name(NamedRange::workbook_scope("Markup", "1.2").unwrap())
            .unwrap();
        assert_eq!(cache.forget_name("MARKUP"), 1);

        let after = cache.acquire("=IFERROR(Markup,0)", a, &store, opts).unwrap();
        if let FormulaExpr::Function { args, .. } = &after.expr {
            assert_eq!(args[0], FormulaExpr::Number(1.2));
        }
    }

    #[test]
    fn test_parse_errors_are_not_cached() {
        let mut store = CellStore::new();
        let a = store.create_sheet("A").unwrap();
        let mut cache = ParseCache::new();
        assert!(cache
            .acquire("=SUM(", a, &store, ParserOptions::default())
            .is_err());
        assert!(cache.is_empty());
    }
}
