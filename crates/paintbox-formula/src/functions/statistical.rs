//! Statistical functions
//!
//! AVERAGE, MAX, MIN, MEDIAN and COUNT are aggregates: text and booleans
//! reached through references are skipped, literal arguments are coerced.

use super::criteria::Criterion;
use super::{collect_numbers, flatten, grid, try_value};
use crate::error::FormulaResult;
use crate::evaluator::{parse_number_text, EvaluationContext, FormulaValue};
use paintbox_core::CellError;

/// AVERAGE function
pub fn fn_average(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let numbers = try_value!(collect_numbers(args));
    if numbers.is_empty() {
        return Ok(FormulaValue::Error(CellError::Div0));
    }
    Ok(FormulaValue::Number(
        numbers.iter().sum::<f64>() / numbers.len() as f64,
    ))
}

/// MAX function; 0 when there are no numbers
pub fn fn_max(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let numbers = try_value!(collect_numbers(args));
    Ok(FormulaValue::Number(
        numbers.into_iter().reduce(f64::max).unwrap_or(0.0),
    ))
}

/// MIN function; 0 when there are no numbers
pub fn fn_min(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let numbers = try_value!(collect_numbers(args));
    Ok(FormulaValue::Number(
        numbers.into_iter().reduce(f64::min).unwrap_or(0.0),
    ))
}

/// MEDIAN(number1, [number2], ...)
pub fn fn_median(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let mut numbers = try_value!(collect_numbers(args));
    if numbers.is_empty() {
        return Ok(FormulaValue::Error(CellError::Num));
    }

    numbers.sort_by(f64::total_cmp);
    let mid = numbers.len() / 2;
    let median = if numbers.len() % 2 == 0 {
        (numbers[mid - 1] + numbers[mid]) / 2.0
    } else {
        numbers[mid]
    };

    Ok(FormulaValue::Number(median))
}

/// COUNT function
///
/// Counts numbers in ranges, plus literal arguments that read as numbers.
/// Errors are not counted and do not propagate.
pub fn fn_count(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let mut count = 0;

    for arg in args {
        match arg {
            FormulaValue::Array(rows) => {
                count += rows
                    .iter()
                    .flatten()
                    .filter(|v| matches!(v, FormulaValue::Number(_)))
                    .count();
            }
            FormulaValue::Number(_) | FormulaValue::Boolean(_) => count += 1,
            FormulaValue::String(s) if parse_number_text(s).is_some() => count += 1,
            _ => {}
        }
    }

    Ok(FormulaValue::Number(count as f64))
}

/// COUNTA(value1, [value2], ...) - Counts non-empty values, errors included
pub fn fn_counta(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let count = args
        .iter()
        .flat_map(flatten)
        .filter(|v| !matches!(v, FormulaValue::Empty))
        .count();
    Ok(FormulaValue::Number(count as f64))
}

/// COUNTIF(range, criteria)
pub fn fn_countif(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let (Some(range), Some(criteria)) = (args.first(), args.get(1)) else {
        return Ok(FormulaValue::Error(CellError::Value));
    };
    if let FormulaValue::Error(e) = criteria {
        return Ok(FormulaValue::Error(*e));
    }

    let matcher = Criterion::new(criteria);
    let count = flatten(range).filter(|v| matcher.matches(v)).count();
    Ok(FormulaValue::Number(count as f64))
}

/// AVERAGEIF(range, criteria, [average_range])
///
/// Only numbers in matching positions are averaged; `#DIV/0!` when none are.
pub fn fn_averageif(
    args: &[FormulaValue],
    _ctx: &EvaluationContext,
) -> FormulaResult<FormulaValue> {
    let (Some(range), Some(criteria)) = (args.first(), args.get(1)) else {
        return Ok(FormulaValue::Error(CellError::Value));
    };
    if let FormulaValue::Error(e) = criteria {
        return Ok(FormulaValue::Error(*e));
    }

    let range = grid(range);
    let average_range = args.get(2).map(grid).unwrap_or_else(|| range.clone());
    let matcher = Criterion::new(criteria);

    let mut sum = 0.0;
    let mut count = 0;
    for (r, row) in range.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            if !matcher.matches(cell) {
                continue;
            }
            match average_range.get(r).and_then(|row| row.get(c)) {
                Some(FormulaValue::Number(n)) => {
                    sum += n;
                    count += 1;
                }
                Some(FormulaValue::Error(e)) => return Ok(FormulaValue::Error(*e)),
                _ => {}
            }
        }
    }

    if count == 0 {
        Ok(FormulaValue::Error(CellError::Div0))
    } else {
        Ok(FormulaValue::Number(sum / count as f64))
    }
}
