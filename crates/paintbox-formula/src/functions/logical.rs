//! Logical functions

use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use paintbox_core::CellError;

/// IF function
///
/// The evaluator short-circuits IF so only the chosen branch runs; this
/// eager form is what a direct call through the registry gets.
pub fn fn_if(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let Some(condition) = args.first() else {
        return Ok(FormulaValue::Error(CellError::Value));
    };

    match condition.to_bool() {
        Ok(true) => Ok(args.get(1).cloned().unwrap_or(FormulaValue::Boolean(true))),
        Ok(false) => Ok(args.get(2).cloned().unwrap_or(FormulaValue::Boolean(false))),
        Err(e) => Ok(FormulaValue::Error(e)),
    }
}

/// Logical values of AND/OR arguments
///
/// Text and blanks inside ranges are skipped; a direct text argument that
/// is not TRUE or FALSE is `#VALUE!`. No logical values at all is `#VALUE!`.
fn logicals(args: &[FormulaValue]) -> Result<Vec<bool>, CellError> {
    let mut values = Vec::new();
    for arg in args {
        match arg {
            FormulaValue::Array(rows) => {
                for cell in rows.iter().flatten() {
                    match cell {
                        FormulaValue::Boolean(b) => values.push(*b),
                        FormulaValue::Number(n) => values.push(*n != 0.0),
                        FormulaValue::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
            FormulaValue::Empty => {}
            scalar => values.push(scalar.to_bool()?),
        }
    }

    if values.is_empty() {
        Err(CellError::Value)
    } else {
        Ok(values)
    }
}

/// AND function
pub fn fn_and(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(match logicals(args) {
        Ok(values) => FormulaValue::Boolean(values.into_iter().all(|b| b)),
        Err(e) => FormulaValue::Error(e),
    })
}

/// OR function
pub fn fn_or(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(match logicals(args) {
        Ok(values) => FormulaValue::Boolean(values.into_iter().any(|b| b)),
        Err(e) => FormulaValue::Error(e),
    })
}

/// NOT function
pub fn fn_not(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    match args.first().map(FormulaValue::to_bool) {
        Some(Ok(b)) => Ok(FormulaValue::Boolean(!b)),
        Some(Err(e)) => Ok(FormulaValue::Error(e)),
        None => Ok(FormulaValue::Error(CellError::Value)),
    }
}

/// IFERROR(value, value_if_error) - Returns value_if_error if value is an error, otherwise returns value
pub fn fn_iferror(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    match (args.first(), args.get(1)) {
        (Some(FormulaValue::Error(_)), Some(fallback)) => Ok(fallback.clone()),
        (Some(value), _) => Ok(value.clone()),
        (None, _) => Ok(FormulaValue::Error(CellError::Value)),
    }
}

/// IFNA(value, value_if_na) - Like IFERROR but only catches `#N/A`
pub fn fn_ifna(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    match (args.first(), args.get(1)) {
        (Some(FormulaValue::Error(CellError::Na)), Some(fallback)) => Ok(fallback.clone()),
        (Some(value), _) => Ok(value.clone()),
        (None, _) => Ok(FormulaValue::Error(CellError::Value)),
    }
}

/// TRUE() - Returns the logical value TRUE
pub fn fn_true(_args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Boolean(true))
}

/// FALSE() - Returns the logical value FALSE
pub fn fn_false(_args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Boolean(false))
}
