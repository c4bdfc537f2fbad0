//! Loading workbook analysis documents
//!
//! A document is loaded in a fixed order: sheets, named ranges, literal
//! values, then formulas. Names have to exist before the formulas that use
//! them are parsed, and nothing is calculated until the caller asks.

mod category;
mod document;
mod summary;

pub use category::FormulaCategory;
pub use document::{
    AnalysisDocument, Destination, FormulaEntry, Metadata, NamedRangeDetail, NamedRangeEntry,
    ScopeRef, SheetInfo,
};
pub use summary::{AnalysisSummary, CategoryCount, ComplexFormula, SheetOverview};

use crate::calculation::{value_from_json, CalcMode, CalculationEngine, CalculationOptions};
use crate::error::{Error, Result};
use paintbox_core::{CellContent, CellKey, CellValue, NameScope, NamedRange, QualifiedRange, SheetId};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

/// What a document load produced
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadSummary {
    /// Sheets created (sheets that already existed are reused)
    pub sheets: usize,
    pub names: usize,
    /// Names that could not be defined and were left out
    pub skipped_names: usize,
    pub values: usize,
    pub formulas: usize,
    /// Formulas that did not parse; they read `#NAME?`
    pub parse_errors: usize,
    pub volatile: usize,
    /// Dependencies declared by the document that the parsed formulas do not have
    pub dependency_mismatches: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sheets, {} names ({} skipped), {} values, {} formulas ({} parse errors, {} volatile)",
            self.sheets,
            self.names,
            self.skipped_names,
            self.values,
            self.formulas,
            self.parse_errors,
            self.volatile
        )?;
        if self.dependency_mismatches > 0 {
            write!(f, ", {} dependency mismatches", self.dependency_mismatches)?;
        }
        Ok(())
    }
}

impl CalculationEngine {
    /// Read an analysis document from disk into a new engine
    ///
    /// The document is returned too, for reports that need its metadata.
    pub fn open_analysis(
        path: impl AsRef<Path>,
        options: CalculationOptions,
    ) -> Result<(Self, AnalysisDocument, LoadSummary)> {
        let doc = AnalysisDocument::from_path(path)?;
        let mut engine = Self::new(options);
        let summary = engine.load_analysis(&doc)?;
        Ok((engine, doc, summary))
    }

    /// Load an analysis document into the engine without calculating
    ///
    /// Every loaded formula is left Dirty. Structural problems (a formula on
    /// a sheet the document never declares, an invalid address, a malformed
    /// document) abort the load with an error.
    pub fn load_analysis(&mut self, doc: &AnalysisDocument) -> Result<LoadSummary> {
        let started = Instant::now();
        doc.check()?;

        let mode = self.mode();
        self.set_mode(CalcMode::Manual);
        let loaded = self.load_sections(doc, started);
        self.set_mode(mode);

        let summary = loaded?;
        log::info!("loaded analysis document: {}", summary);
        Ok(summary)
    }

    fn load_sections(&mut self, doc: &AnalysisDocument, started: Instant) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();

        let order = doc.sheet_names();
        let mut sheets = Vec::with_capacity(order.len());
        for name in &order {
            let id = match self.store().sheet_id(name) {
                Some(id) => id,
                None => {
                    summary.sheets += 1;
                    self.create_sheet(name)?
                }
            };
            sheets.push(id);
        }

        for (name, entry) in &doc.named_ranges {
            if self.load_name(name, entry, &sheets) {
                summary.names += 1;
            } else {
                summary.skipped_names += 1;
            }
        }

        for (sheet, cells) in &doc.values_by_sheet {
            let sheet = self.document_sheet(&order, sheet)?;
            for (address, value) in cells {
                let key = self.store().key(sheet, address)?;
                match value_from_json(value) {
                    Some(CellValue::Empty) => continue,
                    Some(value) => {
                        self.write_cell(key, CellContent::Value(value));
                        summary.values += 1;
                    }
                    None => log::warn!(
                        "{}: value {} is not a cell literal",
                        self.store().label(key),
                        value
                    ),
                }
            }
        }

        let mut loaded = Vec::with_capacity(doc.formula_count());
        for (sheet, formulas) in &doc.formulas_by_sheet {
            let sheet = self.document_sheet(&order, sheet)?;
            for entry in formulas {
                let key = self.store().key(sheet, &entry.cell)?;
                let id = self.write_cell(key, CellContent::Formula(entry.formula_text()));
                match entry.category.as_deref().map(str::parse::<FormulaCategory>) {
                    Some(Ok(category)) => self.declare_category(id, category),
                    Some(Err(e)) => log::warn!("{}: {}", self.store().label(key), e),
                    None => {}
                }
                summary.formulas += 1;
                if self.parse_error(id).is_some() {
                    summary.parse_errors += 1;
                }
                if self.is_volatile(id) {
                    summary.volatile += 1;
                }
                loaded.push((key, entry));
            }
        }

        for (key, entry) in &loaded {
            if !self.has_declared_dependencies(*key, &entry.dependencies) {
                summary.dependency_mismatches += 1;
            }
        }
        summary.dependency_mismatches += self.check_dependency_map(doc);
        if summary.dependency_mismatches > 0 {
            log::warn!(
                "{} declared dependencies are not references of the parsed formulas",
                summary.dependency_mismatches
            );
        }

        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// A sheet named in the document's cell sections
    fn document_sheet(&self, order: &[&str], name: &str) -> Result<SheetId> {
        if !order.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return Err(Error::UnknownSheet(name.to_string()));
        }
        self.store()
            .sheet_id(name)
            .ok_or_else(|| Error::UnknownSheet(name.to_string()))
    }

    fn load_name(&mut self, name: &str, entry: &NamedRangeEntry, sheets: &[SheetId]) -> bool {
        let Some(refers_to) = entry.refers_to() else {
            log::warn!("name '{}' has no definition", name);
            return false;
        };

        let scope = match entry.scope() {
            None => NameScope::Workbook,
            // Positions count sheets in workbook order
            Some(ScopeRef::Index(i)) => match sheets.get(*i) {
                Some(sheet) => NameScope::Sheet(*sheet),
                None => {
                    log::warn!("name '{}' is scoped to missing sheet #{}", name, i);
                    return false;
                }
            },
            Some(ScopeRef::Sheet(sheet)) => match self.store().sheet_id(sheet) {
                Some(sheet) => NameScope::Sheet(sheet),
                None => {
                    log::warn!("name '{}' is scoped to missing sheet '{}'", name, sheet);
                    return false;
                }
            },
        };

        let defined = NamedRange::new(name, refers_to, scope)
            .map_err(Error::from)
            .and_then(|range| self.define_name(range));
        match defined {
            Ok(()) => true,
            Err(e) => {
                log::warn!("skipping name '{}': {}", name, e);
                false
            }
        }
    }

    /// Whether every declared reference that reads as a cell is a precedent
    fn has_declared_dependencies(&self, key: CellKey, declared: &[String]) -> bool {
        let Some(cell) = self.store().get(key) else {
            return true;
        };
        declared.iter().all(|reference| {
            match self.reference_cell(reference, key.sheet) {
                Some(target) => match self.store().cell_id(target) {
                    Some(id) => cell.precedents().contains(&id),
                    None => false,
                },
                None => true,
            }
        })
    }

    /// Count entries of the global dependency map that have no matching edge
    fn check_dependency_map(&self, doc: &AnalysisDocument) -> usize {
        let mut mismatches = 0;
        for (reference, dependents) in &doc.dependencies {
            for dependent in dependents {
                let Ok(key) = self.store().resolve(dependent, None) else {
                    continue;
                };
                let Some(cell) = self.store().get(key).filter(|c| c.is_formula()) else {
                    continue;
                };
                let Some(target) = self.reference_cell(reference, key.sheet) else {
                    continue;
                };
                let linked = self
                    .store()
                    .cell_id(target)
                    .is_some_and(|id| cell.precedents().contains(&id));
                if !linked {
                    log::debug!("{} does not read {}", dependent, reference);
                    mismatches += 1;
                }
            }
        }
        mismatches
    }

    /// First cell of a declared reference, or `None` when it does not read as one
    fn reference_cell(&self, reference: &str, sheet: SheetId) -> Option<CellKey> {
        let parsed = QualifiedRange::parse(reference).ok()?;
        let sheet = match &parsed.sheet {
            Some(name) => self.store().sheet_id(name)?,
            None => sheet,
        };
        let start = parsed.range.start;
        Some(CellKey::new(sheet, start.row, start.col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use paintbox_core::CellState;

    const DOC: &str = r##"{
        "metadata": {
            "sheets_info": {
                "Summary": { "max_row": 10, "max_column": 4 },
                "Labor Rates": { "max_row": 5, "max_column": 2 }
            }
        },
        "named_ranges": {
            "LaborRate": "'Labor Rates'!$B$2",
            "LocalHours": { "scope": 0, "value": "Summary!$A$1" },
            "1Bad": "Summary!$A$1"
        },
        "values_by_sheet": {
            "Summary": { "A1": 8, "A2": "Interior", "A3": "#N/A" },
            "Labor Rates": { "B2": 45.5 }
        },
        "formulas_by_sheet": {
            "Summary": [
                { "cell": "B1", "formula": "=A1*LaborRate", "dependencies": ["A1"] },
                { "cell": "B2", "formula": "=LocalHours+1", "dependencies": ["A9"] },
                { "cell": "B3", "formula": "=SUM(", "dependencies": [] }
            ]
        },
        "dependencies": { "A1": ["Summary!B1"], "C7": ["Summary!B1"] }
    }"##;

    fn engine() -> CalculationEngine {
        CalculationEngine::new(CalculationOptions::default())
    }

    #[test]
    fn test_load_without_calculating() {
        let doc = AnalysisDocument::from_json(DOC).unwrap();
        let mut engine = engine();
        let summary = engine.load_analysis(&doc).unwrap();

        assert_eq!(summary.sheets, 2);
        assert_eq!(summary.names, 2);
        assert_eq!(summary.skipped_names, 1);
        assert_eq!(summary.values, 4);
        assert_eq!(summary.formulas, 3);
        assert_eq!(summary.parse_errors, 1);
        assert_eq!(engine.mode(), CalcMode::Automatic);

        let b1 = engine.get_cell("Summary", "B1").unwrap().unwrap();
        assert_eq!(b1.state(), CellState::Dirty);
        assert_eq!(engine.dirty_count(), 3);
        assert_eq!(
            engine.get_value("Summary", "A3").unwrap(),
            CellValue::Error(paintbox_core::CellError::Na)
        );
    }

    #[test]
    fn test_loaded_document_calculates() {
        let doc = AnalysisDocument::from_json(DOC).unwrap();
        let mut engine = engine();
        engine.load_analysis(&doc).unwrap();

        engine.recalculate_all();
        assert_eq!(engine.get_value("Summary", "B1").unwrap(), CellValue::Number(364.0));
        assert_eq!(engine.get_value("Summary", "B2").unwrap(), CellValue::Number(9.0));
    }

    #[test]
    fn test_dependency_mismatches_are_counted() {
        let doc = AnalysisDocument::from_json(DOC).unwrap();
        let mut engine = engine();
        let summary = engine.load_analysis(&doc).unwrap();

        // B2 declares A9, and the map says B1 reads C7
        assert_eq!(summary.dependency_mismatches, 2);
    }

    #[test]
    fn test_declared_category_wins_until_rewritten() {
        let doc = AnalysisDocument::from_json(
            r#"{ "formulas_by_sheet": { "Main": [
                { "cell": "A1", "formula": "=VLOOKUP(1,'Labor Rates'!A1:B2,2)", "category": "Lookup" },
                { "cell": "A2", "formula": "=VLOOKUP(1,'Labor Rates'!A1:B2,2)" },
                { "cell": "A3", "formula": "=1+1", "category": "nonsense" }
            ] } }"#,
        )
        .unwrap();
        let mut engine = engine();
        engine.load_analysis(&doc).unwrap();
        let [a1, a2, a3, z9] = ["A1", "A2", "A3", "Z9"].map(|a| engine.key("Main", a).unwrap());

        assert_eq!(engine.category(a1), FormulaCategory::Lookup);
        assert_eq!(engine.category(a2), FormulaCategory::Financial);
        assert_eq!(engine.category(a3), FormulaCategory::Arithmetic);
        assert_eq!(engine.category(z9), FormulaCategory::Other);

        engine.set_cell_input("Main", "A1", "=SUM(1,2)").unwrap();
        assert_eq!(engine.category(a1), FormulaCategory::Math);
    }

    #[test]
    fn test_unknown_sheet_aborts() {
        let doc = AnalysisDocument::from_json(
            r#"{
                "metadata": { "sheets_info": { "Main": {} } },
                "formulas_by_sheet": { "Other": [ { "cell": "A1", "formula": "=1" } ] }
            }"#,
        )
        .unwrap();
        let err = engine().load_analysis(&doc).unwrap_err();
        assert!(matches!(err, Error::UnknownSheet(ref s) if s == "Other"));
    }

    #[test]
    fn test_invalid_address_aborts() {
        let doc = AnalysisDocument::from_json(
            r#"{ "formulas_by_sheet": { "Main": [ { "cell": "not a cell", "formula": "=1" } ] } }"#,
        )
        .unwrap();
        assert!(engine().load_analysis(&doc).is_err());
    }

    #[test]
    fn test_sheets_without_sheets_info() {
        let doc = AnalysisDocument::from_json(
            r#"{ "formulas_by_sheet": { "Main": [ { "cell": "A1", "formula": "=Extra!A1+1" } ] },
                 "values_by_sheet": { "Extra": { "A1": 2 } } }"#,
        )
        .unwrap();
        let mut engine = engine();
        engine.load_analysis(&doc).unwrap();
        engine.recalculate_all();

        let names: Vec<&str> = engine.store().sheets().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Main", "Extra"]);
        assert_eq!(engine.get_value("Main", "A1").unwrap(), CellValue::Number(3.0));
    }
}
