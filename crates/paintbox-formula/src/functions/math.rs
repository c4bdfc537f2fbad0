//! Math functions

use super::criteria::Criterion;
use super::{collect_numbers, grid, grid_dims, number, number_result, operators, optional_number, try_value};
use crate::ast::BinaryOperator;
use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use paintbox_core::CellError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// SUM function
pub fn fn_sum(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let numbers = try_value!(collect_numbers(args));
    Ok(number_result(numbers.iter().sum()))
}

/// PRODUCT function; no numbers at all gives 0
pub fn fn_product(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let numbers = try_value!(collect_numbers(args));
    if numbers.is_empty() {
        return Ok(FormulaValue::Number(0.0));
    }
    Ok(number_result(numbers.iter().product()))
}

/// ABS(number) - Returns the absolute value of a number
pub fn fn_abs(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let n = try_value!(number(args.first()));
    Ok(FormulaValue::Number(n.abs()))
}

/// INT(number) - Rounds down to the nearest integer
pub fn fn_int(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let n = try_value!(number(args.first()));
    Ok(FormulaValue::Number(n.floor()))
}

/// MOD(number, divisor) - Remainder with the sign of the divisor
pub fn fn_mod(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let n = try_value!(number(args.first()));
    let d = try_value!(number(args.get(1)));

    if d == 0.0 {
        return Ok(FormulaValue::Error(CellError::Div0));
    }

    Ok(number_result(n - d * (n / d).floor()))
}

/// POWER(number, power) - Same rules as the `^` operator
pub fn fn_power(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let base = try_value!(number(args.first()));
    let exponent = try_value!(number(args.get(1)));
    Ok(operators::apply(
        BinaryOperator::Power,
        &FormulaValue::Number(base),
        &FormulaValue::Number(exponent),
    ))
}

/// SQRT(number) - Square root; negative input is `#NUM!`
pub fn fn_sqrt(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let n = try_value!(number(args.first()));
    if n < 0.0 {
        return Ok(FormulaValue::Error(CellError::Num));
    }
    Ok(FormulaValue::Number(n.sqrt()))
}

/// Drop float noise past 15 significant digits
fn clean(n: f64) -> f64 {
    format!("{:.14e}", n).parse().unwrap_or(n)
}

/// Quotient snapped to the nearest integer when float noise is all that
/// separates them, so CEILING(0.3, 0.1) stays 0.3
fn multiples(n: f64, significance: f64) -> f64 {
    let q = n / significance;
    if (q - q.round()).abs() < 1e-9 {
        q.round()
    } else {
        q
    }
}

/// CEILING(number, [significance]) - Rounds up to a multiple of significance
///
/// Negative numbers with a positive significance round toward zero; with a
/// negative significance they round away from zero.
pub fn fn_ceiling(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let n = try_value!(number(args.first()));
    let significance = try_value!(optional_number(args.get(1), 1.0));

    if n == 0.0 || significance == 0.0 {
        return Ok(FormulaValue::Number(0.0));
    }
    if n > 0.0 && significance < 0.0 {
        return Ok(FormulaValue::Error(CellError::Num));
    }

    Ok(number_result(clean(multiples(n, significance).ceil() * significance)))
}

/// FLOOR(number, [significance]) - Rounds down to a multiple of significance
pub fn fn_floor(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let n = try_value!(number(args.first()));
    let significance = try_value!(optional_number(args.get(1), 1.0));

    if significance == 0.0 {
        return Ok(if n == 0.0 {
            FormulaValue::Number(0.0)
        } else {
            FormulaValue::Error(CellError::Div0)
        });
    }
    if n > 0.0 && significance < 0.0 {
        return Ok(FormulaValue::Error(CellError::Num));
    }

    Ok(number_result(clean(multiples(n, significance).floor() * significance)))
}

/// Round `number` to `digits` places with decimal arithmetic
///
/// The shortest decimal text of the float is rounded, so 2.675 rounds to
/// 2.68 as it does in Excel. Negative `digits` round to the left of the
/// decimal point. Values outside the decimal range fall back to f64.
pub(crate) fn round_decimal(number: f64, digits: i32, strategy: RoundingStrategy) -> f64 {
    let Ok(value) = Decimal::from_str(&format!("{}", number)) else {
        return round_float(number, digits, strategy);
    };

    let rounded = if digits >= 0 {
        Some(value.round_dp_with_strategy(digits.min(28) as u32, strategy))
    } else if digits < -28 {
        Some(Decimal::ZERO)
    } else {
        let scale = Decimal::from_i128_with_scale(10_i128.pow(digits.unsigned_abs()), 0);
        value
            .checked_div(scale)
            .map(|q| q.round_dp_with_strategy(0, strategy))
            .and_then(|q| q.checked_mul(scale))
    };

    rounded
        .and_then(|d| d.to_f64())
        .unwrap_or_else(|| round_float(number, digits, strategy))
}

fn round_float(number: f64, digits: i32, strategy: RoundingStrategy) -> f64 {
    let multiplier = 10_f64.powi(digits);
    let scaled = number * multiplier;
    let rounded = match strategy {
        RoundingStrategy::AwayFromZero => {
            if scaled >= 0.0 {
                scaled.ceil()
            } else {
                scaled.floor()
            }
        }
        RoundingStrategy::ToZero => scaled.trunc(),
        // f64::round is half away from zero
        _ => scaled.round(),
    };
    rounded / multiplier
}

fn round_with(args: &[FormulaValue], strategy: RoundingStrategy) -> FormulaValue {
    let n = match number(args.first()) {
        Ok(n) => n,
        Err(e) => return FormulaValue::Error(e),
    };
    let digits = match optional_number(args.get(1), 0.0) {
        Ok(d) => d.trunc().clamp(-400.0, 400.0) as i32,
        Err(e) => return FormulaValue::Error(e),
    };
    number_result(round_decimal(n, digits, strategy))
}

/// ROUND(number, [num_digits]) - Rounds half away from zero
pub fn fn_round(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(round_with(args, RoundingStrategy::MidpointAwayFromZero))
}

/// ROUNDUP(number, [num_digits]) - Rounds away from zero
pub fn fn_roundup(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(round_with(args, RoundingStrategy::AwayFromZero))
}

/// ROUNDDOWN(number, [num_digits]) - Rounds toward zero
pub fn fn_rounddown(
    args: &[FormulaValue],
    _ctx: &EvaluationContext,
) -> FormulaResult<FormulaValue> {
    Ok(round_with(args, RoundingStrategy::ToZero))
}

/// TRUNC(number, [num_digits])
pub fn fn_trunc(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(round_with(args, RoundingStrategy::ToZero))
}

/// SUMIF(range, criteria, [sum_range]) - Adds the cells specified by a given criteria
///
/// `sum_range` is read from its top-left cell with the shape of `range`.
/// Errors in cells that are summed propagate; errors elsewhere are ignored.
pub fn fn_sumif(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let (Some(range), Some(criteria)) = (args.first(), args.get(1)) else {
        return Ok(FormulaValue::Error(CellError::Value));
    };
    if let FormulaValue::Error(e) = criteria {
        return Ok(FormulaValue::Error(*e));
    }

    let range = grid(range);
    let sum_range = args.get(2).map(grid).unwrap_or_else(|| range.clone());
    let matcher = Criterion::new(criteria);

    let mut sum = 0.0;
    for (r, row) in range.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            if !matcher.matches(cell) {
                continue;
            }
            match sum_range.get(r).and_then(|row| row.get(c)) {
                Some(FormulaValue::Number(n)) => sum += n,
                Some(FormulaValue::Error(e)) => return Ok(FormulaValue::Error(*e)),
                _ => {}
            }
        }
    }

    Ok(number_result(sum))
}

/// SUMPRODUCT(array1, [array2], ...) - Multiplies corresponding elements and sums the products
///
/// All arrays must have the same dimensions. Non-numeric values count as 0.
pub fn fn_sumproduct(
    args: &[FormulaValue],
    _ctx: &EvaluationContext,
) -> FormulaResult<FormulaValue> {
    let Some(first) = args.first() else {
        return Ok(FormulaValue::Error(CellError::Value));
    };
    if let FormulaValue::Error(e) = first {
        return Ok(FormulaValue::Error(*e));
    }

    let dims = grid_dims(&grid(first));
    let mut products = vec![1.0; dims.0 * dims.1];

    for arg in args {
        if let FormulaValue::Error(e) = arg {
            return Ok(FormulaValue::Error(*e));
        }
        let rows = grid(arg);
        if grid_dims(&rows) != dims {
            return Ok(FormulaValue::Error(CellError::Value));
        }
        for (product, value) in products.iter_mut().zip(rows.iter().flatten()) {
            match value {
                FormulaValue::Number(n) => *product *= n,
                FormulaValue::Error(e) => return Ok(FormulaValue::Error(*e)),
                _ => *product = 0.0,
            }
        }
    }

    Ok(number_result(products.iter().sum()))
}
