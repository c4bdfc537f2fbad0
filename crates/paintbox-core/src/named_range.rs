//! Named range definitions
//!
//! Estimate workbooks name their rate tables and constants (`LaborRate`,
//! `TaxRate`, `PaintCoverage`) so formulas stay readable. Names are resolved
//! when a formula is parsed; a sheet-scoped name shadows a workbook-scoped
//! name with the same spelling on that sheet.
//!
//! ```text
//! LaborRate  -> 'Labor Rates'!$B$2            (workbook scope)
//! Coverage   -> Interior!$H$1:$H$12           (scoped to Interior)
//! TaxRate    -> 0.0725                         (constant)
//! ```

use crate::cell::{CellValue, QualifiedRange, SheetId};
use crate::error::{Error, Result};
use ahash::AHashMap;

/// Scope of a named range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    /// Available throughout the workbook (global)
    Workbook,
    /// Visible only to formulas on one sheet
    Sheet(SheetId),
}

/// What a name resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum NameTarget {
    /// A cell or range; unqualified targets resolve against the defining sheet
    Reference(QualifiedRange),
    /// A literal constant
    Constant(CellValue),
    /// Anything else (formula expressions, unions); resolves to `#NAME?`
    Unsupported(String),
}

impl NameTarget {
    /// Interpret the `refers_to` text of a definition
    pub fn parse(refers_to: &str) -> Self {
        let expr = refers_to.trim();
        let expr = expr.strip_prefix('=').unwrap_or(expr).trim();

        if let Ok(reference) = QualifiedRange::parse(expr) {
            return NameTarget::Reference(reference);
        }
        if let Ok(n) = expr.parse::<f64>() {
            return NameTarget::Constant(CellValue::Number(n));
        }
        if expr.eq_ignore_ascii_case("TRUE") {
            return NameTarget::Constant(CellValue::Boolean(true));
        }
        if expr.eq_ignore_ascii_case("FALSE") {
            return NameTarget::Constant(CellValue::Boolean(false));
        }
        if expr.len() >= 2 && expr.starts_with('"') && expr.ends_with('"') {
            let inner = &expr[1..expr.len() - 1];
            return NameTarget::Constant(CellValue::string(inner.replace("\"\"", "\"")));
        }
        NameTarget::Unsupported(expr.to_string())
    }
}

/// A named range definition
#[derive(Debug, Clone)]
pub struct NamedRange {
    /// The name as defined (lookup is case-insensitive)
    pub name: String,
    /// Scope of this name
    pub scope: NameScope,
    /// Original definition text, e.g. `'Labor Rates'!$B$2`
    pub refers_to: String,
    /// Parsed definition
    pub target: NameTarget,
}

impl NamedRange {
    /// Create a new named range, validating the name
    pub fn new(name: impl Into<String>, refers_to: impl Into<String>, scope: NameScope) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        let refers_to = refers_to.into();
        let target = NameTarget::parse(&refers_to);
        Ok(Self {
            name,
            scope,
            refers_to,
            target,
        })
    }

    /// Create a workbook-scoped named range
    pub fn workbook_scope(name: impl Into<String>, refers_to: impl Into<String>) -> Result<Self> {
        Self::new(name, refers_to, NameScope::Workbook)
    }

    /// Create a sheet-scoped named range
    pub fn sheet_scope(
        name: impl Into<String>,
        refers_to: impl Into<String>,
        sheet: SheetId,
    ) -> Result<Self> {
        Self::new(name, refers_to, NameScope::Sheet(sheet))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '\\');
    if !valid_start || !chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return Err(Error::InvalidName(format!("'{}' is not a valid name", name)));
    }
    // A name that reads as a cell reference would be ambiguous
    if QualifiedRange::parse(name).is_ok() {
        return Err(Error::InvalidName(format!("'{}' looks like a cell reference", name)));
    }
    Ok(())
}

/// Collection of named ranges with case-insensitive, scope-aware lookup
#[derive(Debug, Default, Clone)]
pub struct NamedRangeCollection {
    ranges: AHashMap<(String, NameScope), NamedRange>,
    /// Sheets that define at least one local name
    local_counts: AHashMap<SheetId, usize>,
}

impl NamedRangeCollection {
    /// Create a new empty collection
    pub fn new() -> Self {
        Self::default()
    }

    fn make_key(name: &str, scope: NameScope) -> (String, NameScope) {
        (name.to_lowercase(), scope)
    }

    /// Define a new named range
    ///
    /// Returns an error if a name with the same scope already exists
    pub fn define(&mut self, range: NamedRange) -> Result<()> {
        let key = Self::make_key(&range.name, range.scope);

        if self.ranges.contains_key(&key) {
            return Err(Error::InvalidName(format!(
                "Named range '{}' already exists in this scope",
                range.name
            )));
        }

        if let NameScope::Sheet(sheet) = range.scope {
            *self.local_counts.entry(sheet).or_default() += 1;
        }
        self.ranges.insert(key, range);
        Ok(())
    }

    /// Get a named range visible from `current_sheet`
    ///
    /// Sheet-scoped names win over workbook-scoped ones.
    pub fn get(&self, name: &str, current_sheet: SheetId) -> Option<&NamedRange> {
        self.get_local(name, current_sheet)
            .or_else(|| self.get_exact(name, NameScope::Workbook))
    }

    /// Get a name defined on `sheet` only
    pub fn get_local(&self, name: &str, sheet: SheetId) -> Option<&NamedRange> {
        if !self.local_counts.contains_key(&sheet) {
            return None;
        }
        self.get_exact(name, NameScope::Sheet(sheet))
    }

    /// Get a named range by exact scope
    pub fn get_exact(&self, name: &str, scope: NameScope) -> Option<&NamedRange> {
        self.ranges.get(&Self::make_key(name, scope))
    }

    /// Whether `sheet` defines any local names
    pub fn has_local_names(&self, sheet: SheetId) -> bool {
        self.local_counts.contains_key(&sheet)
    }

    /// Iterate over all named ranges
    pub fn iter(&self) -> impl Iterator<Item = &NamedRange> {
        self.ranges.values()
    }

    /// Get the number of named ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Check if the collection is empty
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_named_range_targets() {
        let nr = NamedRange::workbook_scope("LaborRate", "'Labor Rates'!$B$2").unwrap();
        match &nr.target {
            NameTarget::Reference(r) => {
                assert_eq!(r.sheet.as_deref(), Some("Labor Rates"));
                assert!(r.is_single_cell());
            }
            other => panic!("unexpected target {:?}", other),
        }

        let nr = NamedRange::workbook_scope("TaxRate", "=0.0725").unwrap();
        assert_eq!(nr.target, NameTarget::Constant(CellValue::Number(0.0725)));

        let nr = NamedRange::workbook_scope("Label", "\"Sq Ft\"").unwrap();
        assert_eq!(nr.target, NameTarget::Constant(CellValue::string("Sq Ft")));

        let nr = NamedRange::workbook_scope("Total", "=SUM(A1:A10)").unwrap();
        assert!(matches!(nr.target, NameTarget::Unsupported(_)));
    }

    #[test]
    fn test_invalid_names() {
        assert!(NamedRange::workbook_scope("A1", "Sheet1!A1").is_err());
        assert!(NamedRange::workbook_scope("1Rate", "0.5").is_err());
        assert!(NamedRange::workbook_scope("Tax Rate", "0.5").is_err());
        assert!(NamedRange::workbook_scope("_Tax.Rate", "0.5").is_ok());
    }

    #[test]
    fn test_collection_scope_lookup() {
        let mut coll = NamedRangeCollection::new();
        coll.define(NamedRange::workbook_scope("Rate", "0.05").unwrap())
            .unwrap();
        coll.define(NamedRange::sheet_scope("Rate", "0.08", SheetId(0)).unwrap())
            .unwrap();

        let found = coll.get("Rate", SheetId(0)).unwrap();
        assert_eq!(found.refers_to, "0.08");

        let found = coll.get("Rate", SheetId(1)).unwrap();
        assert_eq!(found.refers_to, "0.05");

        assert!(coll.has_local_names(SheetId(0)));
        assert!(!coll.has_local_names(SheetId(1)));
    }

    #[test]
    fn test_case_insensitive() {
        let mut coll = NamedRangeCollection::new();
        coll.define(NamedRange::workbook_scope("TaxRate", "0.05").unwrap())
            .unwrap();

        assert!(coll.get("taxrate", SheetId(0)).is_some());
        assert!(coll.get("TAXRATE", SheetId(0)).is_some());

        assert!(coll
            .define(NamedRange::workbook_scope("TAXRATE", "0.10").unwrap())
            .is_err());
    }
}
