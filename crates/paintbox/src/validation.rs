//! Checking calculated results against reference values
//!
//! [`validate_result`] compares one cell. A [`Validator`] aggregates many
//! comparisons into a [`ValidationReport`] broken down by formula category,
//! and decides whether the success rate clears the acceptance threshold.
//!
//! Without reference values, [`resolution_report`] measures how many formula
//! cells resolved at all, under an explicit [`ResolutionPolicy`] that says
//! which error codes count as legitimate results.

use crate::analysis::FormulaCategory;
use crate::calculation::{value_from_json, value_to_json, CalcResult, CalculationEngine};
use crate::error::{Error, Result};
use paintbox_core::{CellState, CellValue, ErrorKind};
use paintbox_formula::parse_literal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Numeric comparison tolerance; a value passes if either bound holds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    pub absolute: f64,
    pub relative: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            absolute: 1e-9,
            relative: 1e-9,
        }
    }
}

impl Tolerance {
    pub fn accepts(&self, actual: f64, expected: f64) -> bool {
        let delta = (actual - expected).abs();
        delta <= self.absolute || delta <= self.relative * actual.abs().max(expected.abs())
    }
}

/// Result of comparing one cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    /// Absolute difference, for numeric comparisons
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

/// Compare a calculated result with the value the spreadsheet produced
///
/// Numbers match within `tolerance`; text and booleans must be identical;
/// an expected error code only matches the same code. An expected blank
/// accepts a blank or empty-text result.
pub fn validate_result(
    actual: &CalcResult,
    cell: &str,
    expected: &CellValue,
    tolerance: Option<Tolerance>,
) -> ValidationOutcome {
    let tolerance = tolerance.unwrap_or_default();
    let outcome = match (&actual.value, expected) {
        (CellValue::Number(a), CellValue::Number(e)) => ValidationOutcome {
            valid: tolerance.accepts(*a, *e),
            delta: Some((a - e).abs()),
        },
        (CellValue::Empty, CellValue::Empty) => ValidationOutcome::pass(),
        (CellValue::String(s), CellValue::Empty) => ValidationOutcome::from(s.is_empty()),
        (a, e) => ValidationOutcome::from(a == e),
    };
    if !outcome.valid {
        log::debug!("{}: expected {}, got {}", cell, expected, actual.value);
    }
    outcome
}

impl ValidationOutcome {
    fn pass() -> Self {
        Self {
            valid: true,
            delta: None,
        }
    }
}

impl From<bool> for ValidationOutcome {
    fn from(valid: bool) -> Self {
        Self { valid, delta: None }
    }
}

/// Which results count as resolved when there is nothing to compare against
///
/// Lookups that miss and divisions by an empty input are normal in an
/// estimate sheet; an unknown name, a broken reference or a failed cycle
/// means the engine could not reproduce the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionPolicy {
    /// Error codes accepted as legitimate results, e.g. `#N/A`
    pub accepted_errors: Vec<String>,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            accepted_errors: ["#N/A", "#DIV/0!", "#VALUE!", "#NUM!", "#NULL!"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ResolutionPolicy {
    pub fn accepts(&self, result: &CalcResult) -> bool {
        match (result.error, result.value.error()) {
            (None, _) => true,
            (Some(ErrorKind::CircularReference), _) => false,
            (Some(_), Some(code)) => self
                .accepted_errors
                .iter()
                .any(|a| a.trim().eq_ignore_ascii_case(code.as_str())),
            (Some(_), None) => false,
        }
    }
}

/// Validation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    pub tolerance: Tolerance,
    /// Success rate needed to pass (default: 0.95)
    pub threshold: f64,
    /// Failures kept in the report
    pub max_failures: usize,
    pub resolution: ResolutionPolicy,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::default(),
            threshold: 0.95,
            max_failures: 100,
            resolution: ResolutionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
}

impl CategoryStats {
    fn record(&mut self, valid: bool) {
        self.total += 1;
        if valid {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.success_rate = rate(self.successful, self.total);
    }
}

/// One failed cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationFailure {
    pub cell: String,
    pub category: FormulaCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// `None` when checking resolution only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<serde_json::Value>,
    pub actual: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

/// Aggregated validation results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub threshold: f64,
    pub passed: bool,
    pub categories: BTreeMap<FormulaCategory, CategoryStats>,
    /// The first failures, up to the configured cap
    pub failures: Vec<ValidationFailure>,
    /// Failures beyond the cap
    pub omitted_failures: usize,
}

impl ValidationReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}/{} cells valid ({:.2}%), threshold {:.2}%: {}",
            self.successful,
            self.total,
            self.success_rate * 100.0,
            self.threshold * 100.0,
            if self.passed { "PASSED" } else { "FAILED" }
        )?;
        for (category, stats) in &self.categories {
            writeln!(
                f,
                "  {:<12} {:>6}/{:<6} ({:.1}%)",
                category.as_str(),
                stats.successful,
                stats.total,
                stats.success_rate * 100.0
            )?;
        }
        for failure in &self.failures {
            write!(f, "  FAIL {} = {}", failure.cell, failure.actual)?;
            if let Some(expected) = &failure.expected {
                write!(f, ", expected {}", expected)?;
            }
            writeln!(f)?;
        }
        if self.omitted_failures > 0 {
            writeln!(f, "  ... {} more failures", self.omitted_failures)?;
        }
        Ok(())
    }
}

fn rate(successful: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        successful as f64 / total as f64
    }
}

/// Accumulates outcomes into a report
#[derive(Debug, Clone)]
pub struct Validator {
    options: ValidationOptions,
    overall: CategoryStats,
    categories: BTreeMap<FormulaCategory, CategoryStats>,
    failures: Vec<ValidationFailure>,
    omitted_failures: usize,
}

impl Validator {
    pub fn new(options: ValidationOptions) -> Self {
        Self {
            options,
            overall: CategoryStats::default(),
            categories: BTreeMap::new(),
            failures: Vec::new(),
            omitted_failures: 0,
        }
    }

    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    /// Compare one cell against its expected value and record the outcome
    pub fn record(
        &mut self,
        cell: &str,
        category: FormulaCategory,
        formula: Option<&str>,
        actual: &CalcResult,
        expected: &CellValue,
    ) -> ValidationOutcome {
        let outcome = validate_result(actual, cell, expected, Some(self.options.tolerance));
        self.tally(category, outcome.valid, || ValidationFailure {
            cell: cell.to_string(),
            category,
            formula: formula.map(str::to_owned),
            expected: Some(value_to_json(expected)),
            actual: value_to_json(&actual.value),
            error: actual.error,
            delta: outcome.delta,
        });
        outcome
    }

    /// Record whether a cell resolved under the resolution policy
    pub fn record_resolution(
        &mut self,
        cell: &str,
        category: FormulaCategory,
        formula: Option<&str>,
        actual: &CalcResult,
    ) -> bool {
        let valid = self.options.resolution.accepts(actual);
        self.tally(category, valid, || ValidationFailure {
            cell: cell.to_string(),
            category,
            formula: formula.map(str::to_owned),
            expected: None,
            actual: value_to_json(&actual.value),
            error: actual.error,
            delta: None,
        });
        valid
    }

    fn tally(&mut self, category: FormulaCategory, valid: bool, failure: impl FnOnce() -> ValidationFailure) {
        self.overall.record(valid);
        self.categories.entry(category).or_default().record(valid);
        if !valid {
            if self.failures.len() < self.options.max_failures {
                self.failures.push(failure());
            } else {
                self.omitted_failures += 1;
            }
        }
    }

    pub fn report(&self) -> ValidationReport {
        let success_rate = rate(self.overall.successful, self.overall.total);
        ValidationReport {
            total: self.overall.total,
            successful: self.overall.successful,
            failed: self.overall.failed,
            success_rate,
            threshold: self.options.threshold,
            passed: success_rate >= self.options.threshold,
            categories: self.categories.clone(),
            failures: self.failures.clone(),
            omitted_failures: self.omitted_failures,
        }
    }
}

/// One reference value
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedValue {
    /// Sheet-qualified cell, e.g. `Summary!B4`
    pub cell: String,
    pub value: CellValue,
}

/// Reference values from the original spreadsheet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpectedValues {
    pub values: Vec<ExpectedValue>,
}

#[derive(Debug, Deserialize)]
struct ExpectedRow {
    sheet: String,
    cell: String,
    value: String,
}

impl ExpectedValues {
    /// Read `{"Sheet!A1": value, ...}`
    pub fn from_json(text: &str) -> Result<Self> {
        let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut values = Vec::with_capacity(map.len());
        for (cell, value) in map {
            let value = value_from_json(&value).ok_or_else(|| {
                Error::invalid(format!("expected value for {} is not a cell literal", cell))
            })?;
            values.push(ExpectedValue { cell, value });
        }
        Ok(Self { values })
    }

    /// Read CSV with a `sheet,cell,value` header
    pub fn from_csv<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);
        let mut values = Vec::new();
        for row in csv.deserialize() {
            let row: ExpectedRow = row?;
            values.push(ExpectedValue {
                cell: format!(
                    "{}!{}",
                    paintbox_core::cell::quote_sheet_name(&row.sheet),
                    row.cell.trim()
                ),
                value: parse_literal(&row.value),
            });
        }
        Ok(Self { values })
    }

    /// Read a `.csv` file as CSV and anything else as JSON
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        let values = if is_csv {
            Self::from_csv(std::fs::File::open(path)?)?
        } else {
            Self::from_json(&std::fs::read_to_string(path)?)?
        };
        log::info!("read {} expected values from {}", values.len(), path.display());
        Ok(values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Compare the engine's current results with reference values
///
/// Results are read as they stand, so recalculate first. A reference to a
/// cell that does not resolve counts as a `#REF!` failure.
pub fn validate_engine(
    engine: &CalculationEngine,
    expected: &ExpectedValues,
    options: ValidationOptions,
) -> ValidationReport {
    let mut validator = Validator::new(options);
    for item in &expected.values {
        let store = engine.store();
        let (actual, formula, category) = match store.resolve(&item.cell, None) {
            Ok(key) => (
                engine.result(key),
                store.get(key).and_then(|c| c.formula()).map(str::to_owned),
                engine.category(key),
            ),
            Err(e) => {
                log::warn!("cannot check {}: {}", item.cell, e);
                (
                    CalcResult::new(
                        CellValue::Error(paintbox_core::CellError::Ref),
                        Some(ErrorKind::Reference),
                    ),
                    None,
                    FormulaCategory::Other,
                )
            }
        };
        validator.record(&item.cell, category, formula.as_deref(), &actual, &item.value);
    }
    validator.report()
}

/// Share of formula cells holding a resolved result under the policy
///
/// Cells still Dirty (a cancelled or skipped pass) count as unresolved.
pub fn resolution_report(engine: &CalculationEngine, options: ValidationOptions) -> ValidationReport {
    let mut validator = Validator::new(options);
    for (key, result) in engine.formula_results() {
        let store = engine.store();
        let Some(cell) = store.get(key) else {
            continue;
        };
        let formula = cell.formula();
        let category = engine.category(key);
        let label = store.label(key);
        if cell.state() == CellState::Dirty || cell.state() == CellState::Calculating {
            let pending = CalcResult::new(CellValue::Empty, Some(ErrorKind::Reference));
            validator.record_resolution(&label, category, formula, &pending);
        } else {
            validator.record_resolution(&label, category, formula, &result);
        }
    }
    validator.report()
}
