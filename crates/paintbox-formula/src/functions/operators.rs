//! Operators as functions
//!
//! Arithmetic, comparison and concatenation with Excel coercions. Errors
//! propagate symmetrically: whichever operand is an error wins, checking the
//! left operand first. Arrays combine element-wise.

use crate::ast::BinaryOperator;
use crate::evaluator::FormulaValue;
use paintbox_core::CellError;
use std::cmp::Ordering;

/// Apply a binary operator to two evaluated operands
pub fn apply(op: BinaryOperator, left: &FormulaValue, right: &FormulaValue) -> FormulaValue {
    match (left, right) {
        (FormulaValue::Array(_), _) | (_, FormulaValue::Array(_)) => broadcast(op, left, right),
        _ => apply_scalar(op, left, right),
    }
}

fn apply_scalar(op: BinaryOperator, left: &FormulaValue, right: &FormulaValue) -> FormulaValue {
    if let Some(e) = left.get_error().or_else(|| right.get_error()) {
        return FormulaValue::Error(e);
    }

    match op {
        BinaryOperator::Add => arithmetic(left, right, |l, r| Ok(l + r)),
        BinaryOperator::Subtract => arithmetic(left, right, |l, r| Ok(l - r)),
        BinaryOperator::Multiply => arithmetic(left, right, |l, r| Ok(l * r)),
        BinaryOperator::Divide => arithmetic(left, right, |l, r| {
            if r == 0.0 {
                Err(CellError::Div0)
            } else {
                Ok(l / r)
            }
        }),
        BinaryOperator::Power => arithmetic(left, right, power),

        BinaryOperator::Equal => compare(left, right, Ordering::is_eq),
        BinaryOperator::NotEqual => compare(left, right, Ordering::is_ne),
        BinaryOperator::LessThan => compare(left, right, Ordering::is_lt),
        BinaryOperator::LessEqual => compare(left, right, Ordering::is_le),
        BinaryOperator::GreaterThan => compare(left, right, Ordering::is_gt),
        BinaryOperator::GreaterEqual => compare(left, right, Ordering::is_ge),

        BinaryOperator::Concat => concat(left, right),
    }
}

fn arithmetic(
    left: &FormulaValue,
    right: &FormulaValue,
    f: impl Fn(f64, f64) -> Result<f64, CellError>,
) -> FormulaValue {
    let result = left
        .to_number()
        .and_then(|l| right.to_number().map(|r| (l, r)))
        .and_then(|(l, r)| f(l, r));
    match result {
        Ok(n) if n.is_finite() => FormulaValue::Number(n),
        Ok(_) => FormulaValue::Error(CellError::Num),
        Err(e) => FormulaValue::Error(e),
    }
}

fn power(base: f64, exponent: f64) -> Result<f64, CellError> {
    if base == 0.0 && exponent == 0.0 {
        return Err(CellError::Num);
    }
    if base == 0.0 && exponent < 0.0 {
        return Err(CellError::Div0);
    }
    let result = base.powf(exponent);
    if result.is_nan() {
        Err(CellError::Num)
    } else {
        Ok(result)
    }
}

fn compare(left: &FormulaValue, right: &FormulaValue, test: fn(Ordering) -> bool) -> FormulaValue {
    FormulaValue::Boolean(test(compare_values(left, right)))
}

/// `&` operator
pub fn concat(left: &FormulaValue, right: &FormulaValue) -> FormulaValue {
    match (left.to_text(), right.to_text()) {
        (Ok(l), Ok(r)) => FormulaValue::String(l + &r),
        (Err(e), _) | (_, Err(e)) => FormulaValue::Error(e),
    }
}

/// Unary minus
pub fn negate(value: &FormulaValue) -> FormulaValue {
    map_numbers(value, |n| -n)
}

/// Postfix `%`
pub fn percent(value: &FormulaValue) -> FormulaValue {
    map_numbers(value, |n| n / 100.0)
}

fn map_numbers(value: &FormulaValue, f: fn(f64) -> f64) -> FormulaValue {
    match value {
        FormulaValue::Array(rows) => FormulaValue::Array(
            rows.iter()
                .map(|row| row.iter().map(|v| map_numbers(v, f)).collect())
                .collect(),
        ),
        v => match v.to_number() {
            Ok(n) => FormulaValue::Number(f(n)),
            Err(e) => FormulaValue::Error(e),
        },
    }
}

/// Element-wise application; a 1x1 operand or a single row/column is
/// stretched to match the other side, positions outside both are `#N/A`
fn broadcast(op: BinaryOperator, left: &FormulaValue, right: &FormulaValue) -> FormulaValue {
    let dims = |v: &FormulaValue| match v {
        FormulaValue::Array(rows) => (rows.len(), rows.first().map_or(0, Vec::len)),
        _ => (1, 1),
    };
    let at = |v: &FormulaValue, (rows, cols): (usize, usize), r: usize, c: usize| match v {
        FormulaValue::Array(data) => {
            let r = if rows == 1 { 0 } else { r };
            let c = if cols == 1 { 0 } else { c };
            data.get(r)
                .and_then(|row| row.get(c))
                .cloned()
                .unwrap_or(FormulaValue::Error(CellError::Na))
        }
        scalar => scalar.clone(),
    };

    let (l_dims, r_dims) = (dims(left), dims(right));
    let rows = l_dims.0.max(r_dims.0);
    let cols = l_dims.1.max(r_dims.1);

    let result = (0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| apply_scalar(op, &at(left, l_dims, r, c), &at(right, r_dims, r, c)))
                .collect()
        })
        .collect();
    FormulaValue::Array(result)
}

/// Excel ordering for comparison operators and lookups
///
/// Numbers sort before text, text before booleans. Text compares without
/// regard to case. Empty acts as 0, `""` or FALSE depending on the other side.
pub fn compare_values(left: &FormulaValue, right: &FormulaValue) -> Ordering {
    let left = left.scalar();
    let right = right.scalar();

    let (left, right) = match (&left, &right) {
        (FormulaValue::Empty, FormulaValue::Empty) => return Ordering::Equal,
        (FormulaValue::Empty, other) | (other, FormulaValue::Empty) => {
            let blank = match other {
                FormulaValue::Number(_) => FormulaValue::Number(0.0),
                FormulaValue::String(_) => FormulaValue::String(String::new()),
                FormulaValue::Boolean(_) => FormulaValue::Boolean(false),
                _ => FormulaValue::Number(0.0),
            };
            if matches!(left, FormulaValue::Empty) {
                (blank, right.clone())
            } else {
                (left.clone(), blank)
            }
        }
        _ => (left.clone(), right.clone()),
    };

    fn rank(v: &FormulaValue) -> u8 {
        match v {
            FormulaValue::Number(_) | FormulaValue::Empty => 0,
            FormulaValue::String(_) => 1,
            FormulaValue::Boolean(_) => 2,
            FormulaValue::Error(_) | FormulaValue::Array(_) => 3,
        }
    }

    match (&left, &right) {
        (FormulaValue::Number(l), FormulaValue::Number(r)) => {
            l.partial_cmp(r).unwrap_or(Ordering::Equal)
        }
        (FormulaValue::String(l), FormulaValue::String(r)) => {
            l.to_lowercase().cmp(&r.to_lowercase())
        }
        (FormulaValue::Boolean(l), FormulaValue::Boolean(r)) => l.cmp(r),
        (FormulaValue::Error(l), FormulaValue::Error(r)) => l.cmp(r),
        (l, r) => rank(l).cmp(&rank(r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn n(v: f64) -> FormulaValue {
        FormulaValue::Number(v)
    }

    fn s(v: &str) -> FormulaValue {
        FormulaValue::String(v.into())
    }

    #[test]
    fn test_arithmetic_coercion() {
        assert_eq!(apply(BinaryOperator::Add, &s("5"), &n(1.0)), n(6.0));
        assert_eq!(
            apply(BinaryOperator::Add, &FormulaValue::Boolean(true), &FormulaValue::Empty),
            n(1.0)
        );
        assert_eq!(
            apply(BinaryOperator::Multiply, &s("two"), &n(1.0)),
            FormulaValue::Error(CellError::Value)
        );
    }

    #[test]
    fn test_division_and_power_errors() {
        assert_eq!(
            apply(BinaryOperator::Divide, &n(1.0), &FormulaValue::Empty),
            FormulaValue::Error(CellError::Div0)
        );
        assert_eq!(
            apply(BinaryOperator::Power, &n(0.0), &n(0.0)),
            FormulaValue::Error(CellError::Num)
        );
        assert_eq!(
            apply(BinaryOperator::Power, &n(-8.0), &n(0.5)),
            FormulaValue::Error(CellError::Num)
        );
        assert_eq!(
            apply(BinaryOperator::Power, &n(1e300), &n(2.0)),
            FormulaValue::Error(CellError::Num)
        );
    }

    #[test]
    fn test_error_propagation() {
        let na = FormulaValue::Error(CellError::Na);
        let div = FormulaValue::Error(CellError::Div0);
        assert_eq!(apply(BinaryOperator::Add, &na, &div), na);
        assert_eq!(apply(BinaryOperator::Add, &div, &na), div);
        assert_eq!(apply(BinaryOperator::Concat, &s("a"), &na), na);
        assert_eq!(apply(BinaryOperator::Equal, &n(1.0), &na), na);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(
            apply(BinaryOperator::Equal, &s("Brush"), &s("BRUSH")),
            FormulaValue::Boolean(true)
        );
        assert_eq!(
            apply(BinaryOperator::LessThan, &n(100.0), &s("1")),
            FormulaValue::Boolean(true)
        );
        assert_eq!(
            apply(BinaryOperator::GreaterThan, &FormulaValue::Boolean(false), &s("z")),
            FormulaValue::Boolean(true)
        );
        assert_eq!(
            apply(BinaryOperator::Equal, &FormulaValue::Empty, &s("")),
            FormulaValue::Boolean(true)
        );
        assert_eq!(
            apply(BinaryOperator::Equal, &FormulaValue::Empty, &n(0.0)),
            FormulaValue::Boolean(true)
        );
    }

    #[test]
    fn test_concat_formats_numbers() {
        assert_eq!(apply(BinaryOperator::Concat, &n(2.50), &s(" gal")), s("2.5 gal"));
        assert_eq!(
            apply(BinaryOperator::Concat, &FormulaValue::Boolean(true), &FormulaValue::Empty),
            s("TRUE")
        );
    }

    #[test]
    fn test_broadcast() {
        let column = FormulaValue::Array(vec![vec![n(1.0)], vec![n(2.0)], vec![n(3.0)]]);
        assert_eq!(
            apply(BinaryOperator::Multiply, &column, &n(2.0)),
            FormulaValue::Array(vec![vec![n(2.0)], vec![n(4.0)], vec![n(6.0)]])
        );

        let pair = FormulaValue::Array(vec![vec![n(1.0)], vec![n(1.0)]]);
        assert_eq!(
            apply(BinaryOperator::Add, &column, &pair),
            FormulaValue::Array(vec![
                vec![n(2.0)],
                vec![n(3.0)],
                vec![FormulaValue::Error(CellError::Na)]
            ])
        );

        assert_eq!(
            negate(&FormulaValue::Array(vec![vec![n(1.0), s("x")]])),
            FormulaValue::Array(vec![vec![n(-1.0), FormulaValue::Error(CellError::Value)]])
        );
    }
}
