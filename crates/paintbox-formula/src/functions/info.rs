//! Information functions

use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use paintbox_core::CellError;

/// Apply a type test to the single argument; a multi-cell range is `#VALUE!`
fn test_value(args: &[FormulaValue], test: fn(&FormulaValue) -> bool) -> FormulaResult<FormulaValue> {
    let v = match args.first() {
        Some(FormulaValue::Array(rows)) if super::grid_dims(rows) != (1, 1) => {
            return Ok(FormulaValue::Error(CellError::Value));
        }
        Some(v) => v.scalar(),
        None => FormulaValue::Empty,
    };
    Ok(FormulaValue::Boolean(test(&v)))
}

/// ISBLANK(value)
pub fn fn_isblank(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    test_value(args, |v| matches!(v, FormulaValue::Empty))
}

/// ISNUMBER(value)
pub fn fn_isnumber(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    test_value(args, |v| matches!(v, FormulaValue::Number(_)))
}

/// ISTEXT(value)
pub fn fn_istext(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    test_value(args, |v| matches!(v, FormulaValue::String(_)))
}

/// ISERROR(value)
pub fn fn_iserror(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    test_value(args, |v| matches!(v, FormulaValue::Error(_)))
}

/// ISNA(value)
pub fn fn_isna(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    test_value(args, |v| matches!(v, FormulaValue::Error(CellError::Na)))
}

/// NA()
pub fn fn_na(_args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Error(CellError::Na))
}
