//! Prelude module - common imports for paintbox users
//!
//! ```rust
//! use paintbox::prelude::*;
//! ```

pub use crate::{
    // Documents
    AnalysisDocument,
    AnalysisSummary,
    // Calculation types
    CalcMode,
    CalcResult,
    CalculationEngine,
    CalculationOptions,
    CancellationToken,
    // Cell types
    CellContent,
    CellError,
    CellState,
    CellValue,
    Config,
    // Error types
    Error,
    ErrorKind,
    ExpectedValues,
    LoadSummary,
    NamedRange,
    RecalcStats,
    Result,
    // Validation
    ValidationOptions,
    ValidationReport,
    Validator,
};
