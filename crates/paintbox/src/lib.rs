//! # paintbox
//!
//! Excel-compatible calculation engine for painting estimate workbooks.
//!
//! The engine loads a workbook analysis document (sheets, named ranges,
//! literal values and formulas), orders the formulas by their dependencies
//! and recalculates them with Excel semantics.
//!
//! ## Features
//!
//! - Layered recalculation with memoisation of unchanged inputs
//! - Iterative solving of circular references
//! - Automatic and manual calculation modes
//! - Cooperative cancellation between layers
//! - Layer-parallel evaluation with the `parallel` feature
//! - Validation against reference values, with per-category reports
//!
//! ## Example
//!
//! ```rust
//! use paintbox::prelude::*;
//!
//! let doc = AnalysisDocument::from_json(r#"{
//!     "formulas_by_sheet": {
//!         "Estimate": [{ "cell": "B2", "formula": "=B1*1.25" }]
//!     },
//!     "values_by_sheet": { "Estimate": { "B1": 1000 } }
//! }"#).unwrap();
//!
//! let mut engine = CalculationEngine::new(CalculationOptions::default());
//! engine.load_analysis(&doc).unwrap();
//! let stats = engine.recalculate_all();
//!
//! assert_eq!(stats.cells_evaluated, 1);
//! assert_eq!(engine.get_value("Estimate", "B2").unwrap(), CellValue::Number(1250.0));
//! ```

pub mod analysis;
pub mod calculation;
pub mod cancel;
pub mod config;
pub mod error;
pub mod metrics;
pub mod prelude;
pub mod validation;

pub use analysis::{AnalysisDocument, AnalysisSummary, FormulaCategory, LoadSummary};
pub use calculation::{
    content_from_input, format_value, value_from_json, value_to_json, CalcMode, CalcResult,
    CalculationEngine, CalculationOptions,
};
pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::RecalcStats;
pub use validation::{
    resolution_report, validate_engine, validate_result, ExpectedValue, ExpectedValues,
    ResolutionPolicy, Tolerance, ValidationOptions, ValidationOutcome, ValidationReport, Validator,
};

// Re-export core types
pub use paintbox_core::{
    Cell, CellAddress, CellContent, CellError, CellId, CellKey, CellRange, CellState, CellStore,
    CellValue, ErrorKind, NameScope, NamedRange, SheetId,
};

// Re-export formula types
pub use paintbox_formula::{
    evaluate, parse_formula, CacheStats, CalculationPlan, DependencyGraph, EvaluationContext,
    FormulaError, FormulaExpr, FormulaValue,
};
