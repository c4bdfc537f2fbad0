//! Lookup functions
//!
//! Exact matching compares text without regard to case and honours the `*`
//! and `?` wildcards. Approximate matching walks the keys in order and keeps
//! the last one not greater than the target, stopping at the first key that
//! is; keys of another type are skipped.

use super::criteria::wildcard_match;
use super::operators::compare_values;
use super::{grid, grid_dims, number, optional_bool, optional_number, try_value};
use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use paintbox_core::CellError;
use std::cmp::Ordering;

/// Type class used to decide which keys are comparable
fn kind(v: &FormulaValue) -> Option<u8> {
    match v {
        FormulaValue::Number(_) => Some(0),
        FormulaValue::String(_) => Some(1),
        FormulaValue::Boolean(_) => Some(2),
        _ => None,
    }
}

fn exact_match(target: &FormulaValue, key: &FormulaValue) -> bool {
    match (target, key) {
        (FormulaValue::String(t), FormulaValue::String(k)) => {
            wildcard_match(&t.to_lowercase(), &k.to_lowercase())
        }
        (FormulaValue::Number(t), FormulaValue::Number(k)) => t == k,
        (FormulaValue::Boolean(t), FormulaValue::Boolean(k)) => t == k,
        _ => false,
    }
}

/// Position of the first key equal to `target`
fn exact_position<'a>(
    target: &FormulaValue,
    keys: impl Iterator<Item = &'a FormulaValue>,
) -> Option<usize> {
    keys.into_iter().position(|key| exact_match(target, key))
}

/// Position of the last key on the `keep` side of `target` before the
/// first key that is not
fn sorted_position<'a>(
    target: &FormulaValue,
    keys: impl Iterator<Item = &'a FormulaValue>,
    keep: Ordering,
) -> Option<usize> {
    let target_kind = kind(target)?;
    let mut found = None;
    for (i, key) in keys.enumerate() {
        if kind(key) != Some(target_kind) {
            continue;
        }
        match compare_values(key, target) {
            Ordering::Equal => found = Some(i),
            ord if ord == keep => found = Some(i),
            _ => break,
        }
    }
    found
}

fn lookup_value(args: &[FormulaValue]) -> Result<FormulaValue, CellError> {
    match args.first().map(FormulaValue::scalar) {
        Some(FormulaValue::Error(e)) => Err(e),
        Some(v) => Ok(v),
        None => Err(CellError::Value),
    }
}

/// 1-based index argument converted to a 0-based offset; below 1 is `#VALUE!`
fn index_arg(arg: Option<&FormulaValue>) -> Result<usize, CellError> {
    let n = number(arg)?.trunc();
    if n < 1.0 {
        Err(CellError::Value)
    } else {
        Ok(n as usize - 1)
    }
}

/// VLOOKUP(lookup_value, table_array, col_index_num, [range_lookup])
pub fn fn_vlookup(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let target = try_value!(lookup_value(args));
    let Some(table) = args.get(1) else {
        return Ok(FormulaValue::Error(CellError::Value));
    };
    if let FormulaValue::Error(e) = table {
        return Ok(FormulaValue::Error(*e));
    }
    let table = grid(table);
    let col = try_value!(index_arg(args.get(2)));
    let approximate = try_value!(optional_bool(args.get(3), true));

    let (_, cols) = grid_dims(&table);
    if col >= cols {
        return Ok(FormulaValue::Error(CellError::Ref));
    }

    let keys = table.iter().map(|row| row.first().unwrap_or(&FormulaValue::Empty));
    let position = if approximate {
        sorted_position(&target, keys, Ordering::Less)
    } else {
        exact_position(&target, keys)
    };

    Ok(match position {
        Some(r) => table[r].get(col).cloned().unwrap_or(FormulaValue::Empty),
        None => FormulaValue::Error(CellError::Na),
    })
}

/// HLOOKUP(lookup_value, table_array, row_index_num, [range_lookup])
pub fn fn_hlookup(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let target = try_value!(lookup_value(args));
    let Some(table) = args.get(1) else {
        return Ok(FormulaValue::Error(CellError::Value));
    };
    if let FormulaValue::Error(e) = table {
        return Ok(FormulaValue::Error(*e));
    }
    let table = grid(table);
    let row = try_value!(index_arg(args.get(2)));
    let approximate = try_value!(optional_bool(args.get(3), true));

    if row >= table.len() {
        return Ok(FormulaValue::Error(CellError::Ref));
    }

    let keys = table[0].iter();
    let position = if approximate {
        sorted_position(&target, keys, Ordering::Less)
    } else {
        exact_position(&target, keys)
    };

    Ok(match position {
        Some(c) => table[row].get(c).cloned().unwrap_or(FormulaValue::Empty),
        None => FormulaValue::Error(CellError::Na),
    })
}

/// INDEX(array, row_num, [column_num])
///
/// A row or column number of 0 selects the whole column or row. On a
/// single-row array the second argument picks the column.
pub fn fn_index(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let Some(array) = args.first() else {
        return Ok(FormulaValue::Error(CellError::Value));
    };
    if let FormulaValue::Error(e) = array {
        return Ok(FormulaValue::Error(*e));
    }
    let array = grid(array);
    let (rows, cols) = grid_dims(&array);

    let first = try_value!(number(args.get(1))).trunc();
    let second = match args.get(2) {
        Some(v) => Some(try_value!(v.to_number()).trunc()),
        None => None,
    };
    let (row_num, col_num) = match second {
        Some(col) => (first, col),
        None if rows == 1 => (1.0, first),
        None => (first, 1.0),
    };

    if row_num < 0.0 || col_num < 0.0 {
        return Ok(FormulaValue::Error(CellError::Value));
    }
    let (r, c) = (row_num as usize, col_num as usize);
    if r > rows || c > cols {
        return Ok(FormulaValue::Error(CellError::Ref));
    }

    Ok(match (r, c) {
        (0, 0) => FormulaValue::Array(array.into_owned()),
        (0, c) => FormulaValue::Array(array.iter().map(|row| vec![row[c - 1].clone()]).collect()),
        (r, 0) => FormulaValue::Array(vec![array[r - 1].clone()]),
        (r, c) => array[r - 1][c - 1].clone(),
    })
}

/// MATCH(lookup_value, lookup_array, [match_type])
///
/// `match_type` 1 (default) finds the largest key not greater than the
/// target in ascending keys, 0 an exact match, -1 the smallest key not less
/// than the target in descending keys.
pub fn fn_match(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let target = try_value!(lookup_value(args));
    let Some(array) = args.get(1) else {
        return Ok(FormulaValue::Error(CellError::Value));
    };
    if let FormulaValue::Error(e) = array {
        return Ok(FormulaValue::Error(*e));
    }
    let array = grid(array);
    let match_type = try_value!(optional_number(args.get(2), 1.0));

    let (rows, cols) = grid_dims(&array);
    let keys: Vec<&FormulaValue> = if rows == 1 {
        array[0].iter().collect()
    } else if cols == 1 {
        array.iter().filter_map(|row| row.first()).collect()
    } else {
        return Ok(FormulaValue::Error(CellError::Na));
    };

    let position = if match_type == 0.0 {
        exact_position(&target, keys.into_iter())
    } else if match_type > 0.0 {
        sorted_position(&target, keys.into_iter(), Ordering::Less)
    } else {
        sorted_position(&target, keys.into_iter(), Ordering::Greater)
    };

    Ok(match position {
        Some(i) => FormulaValue::Number((i + 1) as f64),
        None => FormulaValue::Error(CellError::Na),
    })
}

/// CHOOSE(index_num, value1, [value2], ...) - Returns a value from a list based on index
///
/// index_num is 1-based and truncated (2.9 -> 2); out of range is `#VALUE!`.
pub fn fn_choose(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let index = try_value!(number(args.first())).trunc();
    if index < 1.0 || index as usize >= args.len() {
        return Ok(FormulaValue::Error(CellError::Value));
    }
    Ok(args[index as usize].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::evaluate;
    use crate::parser::parse_formula;
    use pretty_assertions::assert_eq;

    const RATES: &str = "{\"Latex\",32.5;\"Oil\",41;\"Primer\",24.99}";
    const TIERS: &str = "{0,\"Small\";100,\"Medium\";500,\"Large\"}";

    fn eval(formula: &str) -> FormulaValue {
        let ast = parse_formula(formula).unwrap();
        evaluate(&ast, &EvaluationContext::simple()).unwrap()
    }

    fn s(v: &str) -> FormulaValue {
        FormulaValue::String(v.into())
    }

    #[test]
    fn test_vlookup_exact() {
        assert_eq!(
            eval(&format!("=VLOOKUP(\"oil\",{},2,FALSE)", RATES)),
            FormulaValue::Number(41.0)
        );
        assert_eq!(
            eval(&format!("=VLOOKUP(\"Pri*\",{},2,0)", RATES)),
            FormulaValue::Number(24.99)
        );
        assert_eq!(
            eval(&format!("=VLOOKUP(\"Stain\",{},2,FALSE)", RATES)),
            FormulaValue::Error(CellError::Na)
        );
    }

    #[test]
    fn test_vlookup_approximate() {
        assert_eq!(eval(&format!("=VLOOKUP(250,{},2)", TIERS)), s("Medium"));
        assert_eq!(eval(&format!("=VLOOKUP(500,{},2,TRUE)", TIERS)), s("Large"));
        assert_eq!(eval(&format!("=VLOOKUP(9999,{},2)", TIERS)), s("Large"));
        assert_eq!(
            eval(&format!("=VLOOKUP(-1,{},2)", TIERS)),
            FormulaValue::Error(CellError::Na)
        );
    }

    #[test]
    fn test_vlookup_column_errors() {
        assert_eq!(
            eval(&format!("=VLOOKUP(\"Oil\",{},0,FALSE)", RATES)),
            FormulaValue::Error(CellError::Value)
        );
        assert_eq!(
            eval(&format!("=VLOOKUP(\"Oil\",{},3,FALSE)", RATES)),
            FormulaValue::Error(CellError::Ref)
        );
        assert_eq!(
            eval(&format!("=VLOOKUP(1/0,{},2,FALSE)", RATES)),
            FormulaValue::Error(CellError::Div0)
        );
    }

    #[test]
    fn test_hlookup() {
        let table = "{\"Walls\",\"Trim\";2,1}";
        assert_eq!(
            eval(&format!("=HLOOKUP(\"trim\",{},2,FALSE)", table)),
            FormulaValue::Number(1.0)
        );
        assert_eq!(
            eval(&format!("=HLOOKUP(\"trim\",{},3,FALSE)", table)),
            FormulaValue::Error(CellError::Ref)
        );
    }

    #[test]
    fn test_index() {
        assert_eq!(eval("=INDEX({1,2;3,4},2,1)"), FormulaValue::Number(3.0));
        assert_eq!(eval("=INDEX({10,20,30},2)"), FormulaValue::Number(20.0));
        assert_eq!(eval("=INDEX({10;20;30},3)"), FormulaValue::Number(30.0));
        assert_eq!(
            eval("=INDEX({1,2;3,4},0,2)"),
            FormulaValue::Array(vec![
                vec![FormulaValue::Number(2.0)],
                vec![FormulaValue::Number(4.0)]
            ])
        );
        assert_eq!(eval("=INDEX({1,2;3,4},3,1)"), FormulaValue::Error(CellError::Ref));
        assert_eq!(eval("=INDEX({1,2;3,4},-1,1)"), FormulaValue::Error(CellError::Value));
    }

    #[test]
    fn test_match() {
        assert_eq!(eval("=MATCH(\"b\",{\"a\",\"B\",\"c\"},0)"), FormulaValue::Number(2.0));
        assert_eq!(eval("=MATCH(25,{10,20,30})"), FormulaValue::Number(2.0));
        assert_eq!(eval("=MATCH(25,{30;20;10},-1)"), FormulaValue::Number(1.0));
        assert_eq!(eval("=MATCH(5,{10,20,30},1)"), FormulaValue::Error(CellError::Na));
        assert_eq!(eval("=MATCH(1,{1,2;3,4},0)"), FormulaValue::Error(CellError::Na));
    }

    #[test]
    fn test_choose() {
        assert_eq!(eval("=CHOOSE(2,\"a\",\"b\",\"c\")"), s("b"));
        assert_eq!(eval("=CHOOSE(2.9,\"a\",\"b\",\"c\")"), s("b"));
        assert_eq!(eval("=CHOOSE(4,\"a\",\"b\",\"c\")"), FormulaValue::Error(CellError::Value));
        assert_eq!(eval("=CHOOSE(0,\"a\")"), FormulaValue::Error(CellError::Value));
    }
}
