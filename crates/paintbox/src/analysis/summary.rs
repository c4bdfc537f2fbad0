//! Text and JSON summary of a loaded document

use super::category::FormulaCategory;
use super::document::AnalysisDocument;
use crate::calculation::CalculationEngine;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// How many complex formulas the text report lists
const TOP_COMPLEX: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub category: FormulaCategory,
    pub count: usize,
    pub percentage: f64,
}

/// A formula cell with many precedents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexFormula {
    pub cell: String,
    pub formula: String,
    pub precedents: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetOverview {
    pub name: String,
    pub max_row: u32,
    pub max_column: u32,
    pub formulas: usize,
}

/// Overview of a workbook: formula categories, complex formulas and sheets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub workbook: Option<String>,
    pub sheet_count: usize,
    pub total_formulas: usize,
    /// Most frequent first
    pub categories: Vec<CategoryCount>,
    pub named_ranges: usize,
    /// Formulas with at least the requested number of precedents, most first
    pub complex_formulas: Vec<ComplexFormula>,
    pub sheets: Vec<SheetOverview>,
}

impl AnalysisSummary {
    /// Summarize `doc` after it was loaded into `engine`
    ///
    /// Precedent counts come from the parsed formulas, so ranges count every
    /// cell they cover.
    pub fn new(doc: &AnalysisDocument, engine: &CalculationEngine, min_precedents: usize) -> Self {
        let store = engine.store();
        let mut counts: BTreeMap<FormulaCategory, usize> = BTreeMap::new();
        let mut complex = Vec::new();

        for (sheet, formulas) in &doc.formulas_by_sheet {
            let sheet_id = store.sheet_id(sheet);
            for entry in formulas {
                let category = FormulaCategory::resolve(entry.category.as_deref(), &entry.formula);
                *counts.entry(category).or_default() += 1;

                let cell = sheet_id
                    .and_then(|id| store.key(id, &entry.cell).ok())
                    .and_then(|key| store.get(key));
                if let Some(cell) = cell {
                    let precedents = cell.precedents().len();
                    if precedents >= min_precedents {
                        complex.push(ComplexFormula {
                            cell: store.label(cell.key()),
                            formula: entry.formula_text(),
                            precedents,
                        });
                    }
                }
            }
        }

        let total_formulas = doc.formula_count();
        let mut categories: Vec<CategoryCount> = counts
            .into_iter()
            .map(|(category, count)| CategoryCount {
                category,
                count,
                percentage: percentage(count, total_formulas),
            })
            .collect();
        categories.sort_by(|a, b| b.count.cmp(&a.count));
        complex.sort_by(|a, b| b.precedents.cmp(&a.precedents));

        let sheets = doc
            .sheet_names()
            .into_iter()
            .map(|name| {
                let info = doc
                    .metadata
                    .sheets_info
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, info)| *info)
                    .unwrap_or_default();
                let formulas = doc
                    .formulas_by_sheet
                    .iter()
                    .filter(|(n, _)| n.eq_ignore_ascii_case(name))
                    .map(|(_, f)| f.len())
                    .sum();
                SheetOverview {
                    name: name.to_string(),
                    max_row: info.max_row,
                    max_column: info.max_column,
                    formulas,
                }
            })
            .collect::<Vec<_>>();

        Self {
            workbook: doc.metadata.excel_file.clone(),
            sheet_count: sheets.len(),
            total_formulas,
            categories,
            named_ranges: doc.named_ranges.len(),
            complex_formulas: complex,
            sheets,
        }
    }
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

/// `14700` -> `14,700`
fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for AnalysisSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{}", rule)?;
        writeln!(f, "WORKBOOK ANALYSIS SUMMARY")?;
        writeln!(f, "{}", rule)?;
        if let Some(workbook) = &self.workbook {
            writeln!(f, "\nWorkbook: {}", workbook)?;
        }
        writeln!(f, "Total Sheets: {}", self.sheet_count)?;
        writeln!(f, "Total Formulas: {}", thousands(self.total_formulas))?;

        writeln!(f, "\nFormulas by Category:")?;
        for c in &self.categories {
            writeln!(
                f,
                "  {:<15} {:>6} ({:>5.1}%)",
                c.category.as_str(),
                thousands(c.count),
                c.percentage
            )?;
        }

        writeln!(f, "\nNamed Ranges: {}", self.named_ranges)?;
        writeln!(f, "\nTop {} Most Complex Formulas (by precedent count):", TOP_COMPLEX)?;
        for (i, c) in self.complex_formulas.iter().take(TOP_COMPLEX).enumerate() {
            writeln!(f, "  {}. {} - {} precedents", i + 1, c.cell, c.precedents)?;
        }

        writeln!(f, "\nSheets Overview:")?;
        for s in &self.sheets {
            writeln!(
                f,
                "  {:<30} {:>6} rows x {:>4} cols, {:>6} formulas",
                s.name,
                s.max_row,
                s.max_column,
                thousands(s.formulas)
            )?;
        }
        Ok(())
    }
}
