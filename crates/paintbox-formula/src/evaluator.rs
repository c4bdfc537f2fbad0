//! Formula evaluator
//!
//! Evaluates formula ASTs to produce values. Cell reads go through a
//! [`CellSource`]; unqualified references resolve against the sheet of the
//! formula being evaluated.

use crate::ast::{FormulaExpr, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};
use crate::functions::{operators, FunctionRegistry};
use crate::source::{CellRead, CellSource};
use chrono::NaiveDateTime;
use paintbox_core::{CellError, CellRange, CellValue, SheetId};
use std::cell::Cell;
use std::sync::OnceLock;

/// Global function registry (lazily initialized)
static FUNCTION_REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();

/// The built-in function registry, built on first use
pub fn function_registry() -> &'static FunctionRegistry {
    FUNCTION_REGISTRY.get_or_init(FunctionRegistry::new)
}

/// Value types during formula evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Number(f64),
    String(String),
    Boolean(bool),
    Error(CellError),
    Array(Vec<Vec<FormulaValue>>),
    Empty,
}

impl FormulaValue {
    /// Convert to number, if possible
    ///
    /// Text converts when it reads as a number; empty is 0.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FormulaValue::Number(n) => Some(*n),
            FormulaValue::Boolean(true) => Some(1.0),
            FormulaValue::Boolean(false) => Some(0.0),
            FormulaValue::String(s) => parse_number_text(s),
            FormulaValue::Empty => Some(0.0),
            FormulaValue::Array(rows) => single_element(rows).and_then(FormulaValue::as_number),
            FormulaValue::Error(_) => None,
        }
    }

    /// Coerce to a number for arithmetic, or the error to return instead
    pub fn to_number(&self) -> Result<f64, CellError> {
        match self.scalar() {
            FormulaValue::Error(e) => Err(e),
            v => v.as_number().ok_or(CellError::Value),
        }
    }

    /// Convert to boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FormulaValue::Boolean(b) => Some(*b),
            FormulaValue::Number(n) => Some(*n != 0.0),
            FormulaValue::Empty => Some(false),
            FormulaValue::String(s) => {
                if s.eq_ignore_ascii_case("TRUE") {
                    Some(true)
                } else if s.eq_ignore_ascii_case("FALSE") {
                    Some(false)
                } else {
                    None
                }
            }
            FormulaValue::Array(rows) => single_element(rows).and_then(FormulaValue::as_bool),
            FormulaValue::Error(_) => None,
        }
    }

    /// Coerce to a boolean for logical tests, or the error to return instead
    pub fn to_bool(&self) -> Result<bool, CellError> {
        match self.scalar() {
            FormulaValue::Error(e) => Err(e),
            v => v.as_bool().ok_or(CellError::Value),
        }
    }

    /// Convert to string the way a cell displays in text context
    pub fn as_string(&self) -> String {
        match self {
            FormulaValue::Number(n) => format_number(*n),
            FormulaValue::String(s) => s.clone(),
            FormulaValue::Boolean(true) => "TRUE".to_string(),
            FormulaValue::Boolean(false) => "FALSE".to_string(),
            FormulaValue::Error(e) => e.to_string(),
            FormulaValue::Empty => String::new(),
            FormulaValue::Array(rows) => match single_element(rows) {
                Some(v) => v.as_string(),
                None => CellError::Value.to_string(),
            },
        }
    }

    /// Coerce to text, or the error to return instead
    pub fn to_text(&self) -> Result<String, CellError> {
        match self.scalar() {
            FormulaValue::Error(e) => Err(e),
            v => Ok(v.as_string()),
        }
    }

    /// Collapse a single-cell array to its element; larger arrays become `#VALUE!`
    pub fn scalar(&self) -> FormulaValue {
        match self {
            FormulaValue::Array(rows) => match single_element(rows) {
                Some(v) => v.clone(),
                None => FormulaValue::Error(CellError::Value),
            },
            v => v.clone(),
        }
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        matches!(self, FormulaValue::Error(_))
    }

    /// Get the error if this is one
    pub fn get_error(&self) -> Option<CellError> {
        match self {
            FormulaValue::Error(e) => Some(*e),
            _ => None,
        }
    }
}

fn single_element(rows: &[Vec<FormulaValue>]) -> Option<&FormulaValue> {
    match rows {
        [row] if row.len() == 1 => row.first(),
        _ => None,
    }
}

/// Parse text as a number the way arithmetic coercion does
pub(crate) fn parse_number_text(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    if let Some(pct) = t.strip_suffix('%') {
        return pct.trim().parse::<f64>().ok().map(|n| n / 100.0);
    }
    t.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Format a number like Excel's General format: at most 15 significant
/// digits, no trailing zeros, scientific notation for extreme magnitudes
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    if !n.is_finite() {
        return CellError::Num.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }

    let magnitude = n.abs().log10().floor() as i32;
    if !(-9..15).contains(&magnitude) {
        let formatted = format!("{:.14e}", n);
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let mantissa = trim_fraction(mantissa);
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}E{}{:02}", mantissa, sign, exponent.abs());
    }

    let decimals = (14 - magnitude).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, n)).to_string()
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

impl From<CellValue> for FormulaValue {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Empty => FormulaValue::Empty,
            CellValue::Number(n) => FormulaValue::Number(n),
            CellValue::String(s) => FormulaValue::String(s.as_str().to_string()),
            CellValue::Boolean(b) => FormulaValue::Boolean(b),
            CellValue::Error(e) => FormulaValue::Error(e),
        }
    }
}

impl From<FormulaValue> for CellValue {
    fn from(value: FormulaValue) -> Self {
        match value {
            FormulaValue::Empty => CellValue::Empty,
            FormulaValue::Number(n) if !n.is_finite() => CellValue::Error(CellError::Num),
            FormulaValue::Number(n) => CellValue::Number(n),
            FormulaValue::String(s) => CellValue::string(s),
            FormulaValue::Boolean(b) => CellValue::Boolean(b),
            FormulaValue::Error(e) => CellValue::Error(e),
            array @ FormulaValue::Array(_) => array.scalar().into(),
        }
    }
}

impl From<CellError> for FormulaValue {
    fn from(e: CellError) -> Self {
        FormulaValue::Error(e)
    }
}

/// Context for formula evaluation
pub struct EvaluationContext<'a> {
    /// Where cell values come from
    pub source: Option<&'a dyn CellSource>,
    /// Sheet of the formula being evaluated
    pub current_sheet: SheetId,
    /// Timestamp of the calculation pass, used by TODAY and NOW
    pub now: NaiveDateTime,
    /// Set when a read hit a cell that is still being calculated
    circular: Cell<bool>,
}

impl<'a> EvaluationContext<'a> {
    /// Create a new evaluation context
    pub fn new(source: &'a dyn CellSource, sheet: SheetId) -> Self {
        Self {
            source: Some(source),
            current_sheet: sheet,
            now: chrono::Local::now().naive_local(),
            circular: Cell::new(false),
        }
    }

    /// Create a simple context without cells (for testing)
    pub fn simple() -> Self {
        Self {
            source: None,
            current_sheet: SheetId(0),
            now: chrono::Local::now().naive_local(),
            circular: Cell::new(false),
        }
    }

    /// Use a fixed timestamp for TODAY and NOW
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    /// Whether evaluation read a cell that was mid-calculation
    pub fn hit_circular_reference(&self) -> bool {
        self.circular.get()
    }

    fn resolve_sheet(&self, sheet: Option<&str>) -> Option<SheetId> {
        match (sheet, self.source) {
            (None, _) => Some(self.current_sheet),
            (Some(name), Some(source)) => source.sheet_id(name),
            (Some(_), None) => None,
        }
    }

    fn read(&self, sheet: SheetId, row: u32, col: u16) -> FormulaValue {
        let Some(source) = self.source else {
            return FormulaValue::Empty;
        };
        match source.read_cell(sheet, row, col) {
            CellRead::Value(v) => v,
            CellRead::InProgress => {
                self.circular.set(true);
                FormulaValue::Error(CellError::Ref)
            }
        }
    }

    /// Get a cell value
    pub fn get_cell_value(&self, sheet: Option<&str>, row: u32, col: u16) -> FormulaValue {
        match self.resolve_sheet(sheet) {
            Some(sheet) => self.read(sheet, row, col),
            None => FormulaValue::Error(CellError::Ref),
        }
    }

    /// Get a range of cell values as an array
    pub fn get_range_values(&self, sheet: Option<&str>, range: &CellRange) -> FormulaValue {
        let Some(sheet) = self.resolve_sheet(sheet) else {
            return FormulaValue::Error(CellError::Ref);
        };

        let rows = (range.start.row..=range.end.row)
            .map(|row| {
                (range.start.col..=range.end.col)
                    .map(|col| self.read(sheet, row, col))
                    .collect()
            })
            .collect();
        FormulaValue::Array(rows)
    }
}

/// Evaluate a formula expression
pub fn evaluate(expr: &FormulaExpr, ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    match expr {
        // === Literals ===
        FormulaExpr::Number(n) => Ok(FormulaValue::Number(*n)),
        FormulaExpr::String(s) => Ok(FormulaValue::String(s.clone())),
        FormulaExpr::Boolean(b) => Ok(FormulaValue::Boolean(*b)),
        FormulaExpr::Error(e) => Ok(FormulaValue::Error(*e)),
        FormulaExpr::Missing => Ok(FormulaValue::Empty),

        // === References ===
        FormulaExpr::CellRef(cell_ref) => Ok(ctx.get_cell_value(
            cell_ref.sheet.as_deref(),
            cell_ref.address.row,
            cell_ref.address.col,
        )),

        FormulaExpr::RangeRef(range_ref) => {
            Ok(ctx.get_range_values(range_ref.sheet.as_deref(), &range_ref.range))
        }

        // === Operators ===
        FormulaExpr::BinaryOp { op, left, right } => {
            let left_val = evaluate(left, ctx)?;
            let right_val = evaluate(right, ctx)?;
            Ok(operators::apply(*op, &left_val, &right_val))
        }

        FormulaExpr::UnaryOp { op, operand } => {
            let val = evaluate(operand, ctx)?;
            Ok(match op {
                UnaryOperator::Negate => operators::negate(&val),
                UnaryOperator::Percent => operators::percent(&val),
            })
        }

        // === Functions ===
        FormulaExpr::Function { name, args } => evaluate_function(name, args, ctx),

        // === Arrays ===
        FormulaExpr::Array(rows) => {
            let mut result_rows = Vec::with_capacity(rows.len());
            for row in rows {
                let mut result_row = Vec::with_capacity(row.len());
                for expr in row {
                    result_row.push(evaluate(expr, ctx)?);
                }
                result_rows.push(result_row);
            }
            Ok(FormulaValue::Array(result_rows))
        }
    }
}

/// Evaluate an expression, turning evaluation failures into error values
pub fn evaluate_to_value(expr: &FormulaExpr, ctx: &EvaluationContext) -> FormulaValue {
    evaluate(expr, ctx).unwrap_or_else(|e| FormulaValue::Error(e.cell_error()))
}

/// Evaluate a function call
fn evaluate_function(
    name: &str,
    args: &[FormulaExpr],
    ctx: &EvaluationContext,
) -> FormulaResult<FormulaValue> {
    let registry = function_registry();

    let func = registry
        .get(name)
        .ok_or_else(|| FormulaError::UnknownFunction(name.to_string()))?;

    // Check argument count
    if args.len() < func.min_args {
        return Err(FormulaError::ArgumentCount {
            function: name.to_string(),
            expected: format!("at least {}", func.min_args),
            actual: args.len(),
        });
    }

    if let Some(max) = func.max_args {
        if args.len() > max {
            return Err(FormulaError::ArgumentCount {
                function: name.to_string(),
                expected: format!("at most {}", max),
                actual: args.len(),
            });
        }
    }

    // Only the chosen branch of IF is evaluated
    if func.name == "IF" {
        let condition = evaluate_to_value(&args[0], ctx);
        return match condition.to_bool() {
            Ok(true) => Ok(evaluate_to_value(&args[1], ctx)),
            Ok(false) => match args.get(2) {
                Some(otherwise) => Ok(evaluate_to_value(otherwise, ctx)),
                None => Ok(FormulaValue::Boolean(false)),
            },
            Err(e) => Ok(FormulaValue::Error(e)),
        };
    }

    // Evaluate arguments. Aggregates see single-cell references as
    // one-element ranges so text and booleans in cells are skipped.
    let mut evaluated_args = Vec::with_capacity(args.len());
    for arg in args {
        let value = evaluate_to_value(arg, ctx);
        let value = match arg {
            FormulaExpr::CellRef(_) if func.aggregate => FormulaValue::Array(vec![vec![value]]),
            // A blank argument is a typed zero to COUNT and friends
            FormulaExpr::Missing if func.aggregate => FormulaValue::Number(0.0),
            _ => value,
        };
        evaluated_args.push(value);
    }

    // Call the function
    (func.implementation)(&evaluated_args, ctx)
}
