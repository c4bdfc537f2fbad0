//! Built-in Excel functions

pub mod criteria;
pub mod date;
pub mod info;
pub mod logical;
pub mod lookup;
pub mod math;
pub mod operators;
pub mod statistical;
pub mod text;

use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use ahash::AHashMap;
use paintbox_core::CellError;
use std::borrow::Cow;

/// Function implementation signature
///
/// Functions can consult the evaluation context (current sheet, the pass
/// timestamp) to match Excel semantics.
pub type FunctionImpl = fn(&[FormulaValue], &EvaluationContext) -> FormulaResult<FormulaValue>;

/// Function definition
pub struct FunctionDef {
    /// Function name (uppercase)
    pub name: &'static str,
    /// Minimum arguments
    pub min_args: usize,
    /// Maximum arguments (None = unlimited)
    pub max_args: Option<usize>,
    /// Implementation
    pub implementation: FunctionImpl,
    /// Is volatile (recalculates every pass)
    pub volatile: bool,
    /// Skips text and booleans that arrive through references
    pub aggregate: bool,
}

impl FunctionDef {
    pub fn new(
        name: &'static str,
        min_args: usize,
        max_args: Option<usize>,
        implementation: FunctionImpl,
    ) -> Self {
        Self {
            name,
            min_args,
            max_args,
            implementation,
            volatile: false,
            aggregate: false,
        }
    }

    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    pub fn aggregate(mut self) -> Self {
        self.aggregate = true;
        self
    }
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("volatile", &self.volatile)
            .field("aggregate", &self.aggregate)
            .finish()
    }
}

/// Function registry
#[derive(Debug)]
pub struct FunctionRegistry {
    functions: AHashMap<&'static str, FunctionDef>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Create a new registry with all built-in functions
    pub fn new() -> Self {
        let mut registry = Self {
            functions: AHashMap::new(),
        };

        registry.register_math_functions();
        registry.register_statistical_functions();
        registry.register_logical_functions();
        registry.register_text_functions();
        registry.register_lookup_functions();
        registry.register_info_functions();
        registry.register_date_functions();

        registry
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions
            .get(name)
            .or_else(|| self.functions.get(name.to_uppercase().as_str()))
    }

    /// Register a function
    pub fn register(&mut self, def: FunctionDef) {
        self.functions.insert(def.name, def);
    }

    /// Whether `name` is a known volatile function
    pub fn is_volatile(&self, name: &str) -> bool {
        self.get(name).is_some_and(|f| f.volatile)
    }

    /// Registered names in alphabetical order
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn register_math_functions(&mut self) {
        self.register(FunctionDef::new("SUM", 1, None, math::fn_sum).aggregate());
        self.register(FunctionDef::new("PRODUCT", 1, None, math::fn_product).aggregate());
        self.register(FunctionDef::new("ABS", 1, Some(1), math::fn_abs));
        self.register(FunctionDef::new("INT", 1, Some(1), math::fn_int));
        self.register(FunctionDef::new("MOD", 2, Some(2), math::fn_mod));
        self.register(FunctionDef::new("POWER", 2, Some(2), math::fn_power));
        self.register(FunctionDef::new("SQRT", 1, Some(1), math::fn_sqrt));
        self.register(FunctionDef::new("CEILING", 1, Some(2), math::fn_ceiling));
        self.register(FunctionDef::new("FLOOR", 1, Some(2), math::fn_floor));
        self.register(FunctionDef::new("TRUNC", 1, Some(2), math::fn_trunc));
        self.register(FunctionDef::new("ROUND", 1, Some(2), math::fn_round));
        self.register(FunctionDef::new("ROUNDUP", 1, Some(2), math::fn_roundup));
        self.register(FunctionDef::new("ROUNDDOWN", 1, Some(2), math::fn_rounddown));
        self.register(FunctionDef::new("SUMIF", 2, Some(3), math::fn_sumif));
        self.register(FunctionDef::new("SUMPRODUCT", 1, None, math::fn_sumproduct));
    }

    fn register_statistical_functions(&mut self) {
        self.register(FunctionDef::new("AVERAGE", 1, None, statistical::fn_average).aggregate());
        self.register(FunctionDef::new("MAX", 1, None, statistical::fn_max).aggregate());
        self.register(FunctionDef::new("MIN", 1, None, statistical::fn_min).aggregate());
        self.register(FunctionDef::new("MEDIAN", 1, None, statistical::fn_median).aggregate());
        self.register(FunctionDef::new("COUNT", 1, None, statistical::fn_count).aggregate());
        self.register(FunctionDef::new("COUNTA", 1, None, statistical::fn_counta));
        self.register(FunctionDef::new("COUNTIF", 2, Some(2), statistical::fn_countif));
        self.register(FunctionDef::new("AVERAGEIF", 2, Some(3), statistical::fn_averageif));
    }

    fn register_logical_functions(&mut self) {
        // IF itself only evaluates the chosen branch; see the evaluator
        self.register(FunctionDef::new("IF", 2, Some(3), logical::fn_if));
        self.register(FunctionDef::new("IFERROR", 2, Some(2), logical::fn_iferror));
        self.register(FunctionDef::new("IFNA", 2, Some(2), logical::fn_ifna));
        self.register(FunctionDef::new("AND", 1, None, logical::fn_and).aggregate());
        self.register(FunctionDef::new("OR", 1, None, logical::fn_or).aggregate());
        self.register(FunctionDef::new("NOT", 1, Some(1), logical::fn_not));
        self.register(FunctionDef::new("TRUE", 0, Some(0), logical::fn_true));
        self.register(FunctionDef::new("FALSE", 0, Some(0), logical::fn_false));
    }

    fn register_text_functions(&mut self) {
        self.register(FunctionDef::new("CONCATENATE", 1, None, text::fn_concatenate));
        self.register(FunctionDef::new("CONCAT", 1, None, text::fn_concat));
        self.register(FunctionDef::new("LEFT", 1, Some(2), text::fn_left));
        self.register(FunctionDef::new("RIGHT", 1, Some(2), text::fn_right));
        self.register(FunctionDef::new("MID", 3, Some(3), text::fn_mid));
        self.register(FunctionDef::new("LEN", 1, Some(1), text::fn_len));
        self.register(FunctionDef::new("UPPER", 1, Some(1), text::fn_upper));
        self.register(FunctionDef::new("LOWER", 1, Some(1), text::fn_lower));
        self.register(FunctionDef::new("TRIM", 1, Some(1), text::fn_trim));
        self.register(FunctionDef::new("VALUE", 1, Some(1), text::fn_value));
        self.register(FunctionDef::new("TEXT", 2, Some(2), text::fn_text));
    }

    fn register_lookup_functions(&mut self) {
        self.register(FunctionDef::new("VLOOKUP", 3, Some(4), lookup::fn_vlookup));
        self.register(FunctionDef::new("HLOOKUP", 3, Some(4), lookup::fn_hlookup));
        self.register(FunctionDef::new("INDEX", 2, Some(3), lookup::fn_index));
        self.register(FunctionDef::new("MATCH", 2, Some(3), lookup::fn_match));
        self.register(FunctionDef::new("CHOOSE", 2, None, lookup::fn_choose));
    }

    fn register_info_functions(&mut self) {
        self.register(FunctionDef::new("ISBLANK", 1, Some(1), info::fn_isblank));
        self.register(FunctionDef::new("ISNUMBER", 1, Some(1), info::fn_isnumber));
        self.register(FunctionDef::new("ISTEXT", 1, Some(1), info::fn_istext));
        self.register(FunctionDef::new("ISERROR", 1, Some(1), info::fn_iserror));
        self.register(FunctionDef::new("ISNA", 1, Some(1), info::fn_isna));
        self.register(FunctionDef::new("NA", 0, Some(0), info::fn_na));
    }

    fn register_date_functions(&mut self) {
        self.register(FunctionDef::new("DATE", 3, Some(3), date::fn_date));
        self.register(FunctionDef::new("YEAR", 1, Some(1), date::fn_year));
        self.register(FunctionDef::new("MONTH", 1, Some(1), date::fn_month));
        self.register(FunctionDef::new("DAY", 1, Some(1), date::fn_day));
        self.register(FunctionDef::new("TODAY", 0, Some(0), date::fn_today).volatile());
        self.register(FunctionDef::new("NOW", 0, Some(0), date::fn_now).volatile());
    }
}

/// Unwrap a coercion result or return its error as the function's value
macro_rules! try_value {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Ok($crate::evaluator::FormulaValue::Error(e)),
        }
    };
}
pub(crate) use try_value;

/// Required numeric argument
pub(crate) fn number(arg: Option<&FormulaValue>) -> Result<f64, CellError> {
    match arg {
        Some(v) => v.to_number(),
        None => Err(CellError::Value),
    }
}

/// Optional numeric argument, `default` when omitted
pub(crate) fn optional_number(arg: Option<&FormulaValue>, default: f64) -> Result<f64, CellError> {
    match arg {
        Some(v) => v.to_number(),
        None => Ok(default),
    }
}

/// Required text argument
pub(crate) fn text(arg: Option<&FormulaValue>) -> Result<String, CellError> {
    match arg {
        Some(v) => v.to_text(),
        None => Err(CellError::Value),
    }
}

/// Optional boolean argument, `default` when omitted
pub(crate) fn optional_bool(arg: Option<&FormulaValue>, default: bool) -> Result<bool, CellError> {
    match arg {
        Some(v) => v.to_bool(),
        None => Ok(default),
    }
}

/// A finite number, or `#NUM!`
pub(crate) fn number_result(n: f64) -> FormulaValue {
    if n.is_finite() {
        FormulaValue::Number(n)
    } else {
        FormulaValue::Error(CellError::Num)
    }
}

/// Every scalar inside a value: the elements of an array or the value itself
pub(crate) fn flatten(value: &FormulaValue) -> impl Iterator<Item = &FormulaValue> {
    let rows: &[Vec<FormulaValue>] = match value {
        FormulaValue::Array(rows) => rows.as_slice(),
        _ => &[],
    };
    let single = match value {
        FormulaValue::Array(_) => None,
        v => Some(v),
    };
    rows.iter().flatten().chain(single)
}

/// A value as a 2-D grid; scalars are a 1x1 grid
pub(crate) fn grid(value: &FormulaValue) -> Cow<'_, [Vec<FormulaValue>]> {
    match value {
        FormulaValue::Array(rows) => Cow::Borrowed(rows.as_slice()),
        v => Cow::Owned(vec![vec![v.clone()]]),
    }
}

/// Rows and columns of a grid
pub(crate) fn grid_dims(rows: &[Vec<FormulaValue>]) -> (usize, usize) {
    (rows.len(), rows.first().map_or(0, Vec::len))
}

/// Numbers of an aggregate's arguments
///
/// Direct arguments coerce like arithmetic operands. Inside arrays, which
/// includes references, only numbers count and text, booleans and blanks
/// are skipped. The first error wins.
pub(crate) fn collect_numbers(args: &[FormulaValue]) -> Result<Vec<f64>, CellError> {
    let mut numbers = Vec::new();
    for arg in args {
        match arg {
            FormulaValue::Array(rows) => {
                for value in rows.iter().flatten() {
                    match value {
                        FormulaValue::Number(n) => numbers.push(*n),
                        FormulaValue::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
            FormulaValue::Empty => {}
            scalar => numbers.push(scalar.to_number()?),
        }
    }
    Ok(numbers)
}
