//! Text functions

use super::math::round_decimal;
use super::{number, optional_number, text, try_value};
use crate::error::FormulaResult;
use crate::evaluator::{format_number, parse_number_text, EvaluationContext, FormulaValue};
use paintbox_core::CellError;
use rust_decimal::RoundingStrategy;

fn take_left(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn take_right(s: &str, n: usize) -> String {
    let len = s.chars().count();
    if n >= len {
        return s.to_string();
    }
    s.chars().skip(len - n).collect()
}

fn take_mid(s: &str, start_1based: usize, n: usize) -> String {
    s.chars().skip(start_1based - 1).take(n).collect()
}

/// Character count argument; negative is `#VALUE!`
fn char_count(arg: Option<&FormulaValue>, default: f64) -> Result<usize, CellError> {
    let n = optional_number(arg, default)?.trunc();
    if n < 0.0 {
        Err(CellError::Value)
    } else {
        Ok(n as usize)
    }
}

/// CONCATENATE(text1, [text2], ...)
///
/// Each argument must be a single value; a multi-cell range is `#VALUE!`.
pub fn fn_concatenate(
    args: &[FormulaValue],
    _ctx: &EvaluationContext,
) -> FormulaResult<FormulaValue> {
    let mut out = String::new();
    for arg in args {
        out.push_str(&try_value!(arg.to_text()));
    }
    Ok(FormulaValue::String(out))
}

/// CONCAT(text1, [text2], ...) - Ranges are joined cell by cell
pub fn fn_concat(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let mut out = String::new();
    for value in args.iter().flat_map(super::flatten) {
        if let FormulaValue::Error(e) = value {
            return Ok(FormulaValue::Error(*e));
        }
        out.push_str(&value.as_string());
    }
    Ok(FormulaValue::String(out))
}

/// LEFT(text, [num_chars])
pub fn fn_left(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let s = try_value!(text(args.first()));
    let n = try_value!(char_count(args.get(1), 1.0));
    Ok(FormulaValue::String(take_left(&s, n)))
}

/// RIGHT(text, [num_chars])
pub fn fn_right(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let s = try_value!(text(args.first()));
    let n = try_value!(char_count(args.get(1), 1.0));
    Ok(FormulaValue::String(take_right(&s, n)))
}

/// MID(text, start_num, num_chars)
pub fn fn_mid(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let s = try_value!(text(args.first()));
    let start = try_value!(number(args.get(1))).trunc();
    let n = try_value!(char_count(args.get(2), 0.0));

    if start < 1.0 {
        return Ok(FormulaValue::Error(CellError::Value));
    }

    Ok(FormulaValue::String(take_mid(&s, start as usize, n)))
}

/// LEN(text)
pub fn fn_len(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let s = try_value!(text(args.first()));
    Ok(FormulaValue::Number(s.chars().count() as f64))
}

/// UPPER(text)
pub fn fn_upper(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let s = try_value!(text(args.first()));
    Ok(FormulaValue::String(s.to_uppercase()))
}

/// LOWER(text)
pub fn fn_lower(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let s = try_value!(text(args.first()));
    Ok(FormulaValue::String(s.to_lowercase()))
}

/// TRIM(text) - Strips leading and trailing spaces and collapses inner runs
pub fn fn_trim(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let s = try_value!(text(args.first()));
    Ok(FormulaValue::String(
        s.split(' ')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
    ))
}

/// VALUE(text) - Converts a text string that represents a number to a number
pub fn fn_value(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    match args.first().map(FormulaValue::scalar) {
        Some(FormulaValue::Number(n)) => Ok(FormulaValue::Number(n)),
        Some(FormulaValue::Error(e)) => Ok(FormulaValue::Error(e)),
        Some(FormulaValue::Empty) => Ok(FormulaValue::Number(0.0)),
        Some(FormulaValue::String(s)) => Ok(parse_number_text(&s)
            .map(FormulaValue::Number)
            .unwrap_or(FormulaValue::Error(CellError::Value))),
        _ => Ok(FormulaValue::Error(CellError::Value)),
    }
}

/// TEXT(value, format_text)
///
/// Supports `General`, `@`, fixed-decimal patterns such as `0`, `0.00`,
/// `#,##0.00`, percentages (`0%`, `0.0%`), literal prefixes and suffixes
/// (`$#,##0.00`, `0.0 "gal"`) and day/month/year date patterns.
pub fn fn_text(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let value = match args.first().map(FormulaValue::scalar) {
        Some(FormulaValue::Error(e)) => return Ok(FormulaValue::Error(e)),
        Some(v) => v,
        None => return Ok(FormulaValue::Error(CellError::Value)),
    };
    let format = try_value!(text(args.get(1)));

    if format.eq_ignore_ascii_case("general") || format == "@" || format.is_empty() {
        return Ok(FormulaValue::String(value.as_string()));
    }

    // Text passes through number formats unchanged
    let n = match &value {
        FormulaValue::String(s) => match parse_number_text(s) {
            Some(n) => n,
            None => return Ok(FormulaValue::String(s.clone())),
        },
        v => try_value!(v.to_number()),
    };

    if let Some(formatted) = super::date::format_date_pattern(n, &format) {
        return Ok(FormulaValue::String(formatted));
    }

    Ok(FormulaValue::String(
        format_with_pattern(n, &format).unwrap_or_else(|| format_number(n)),
    ))
}

/// Format `n` with a fixed-decimal pattern, `None` when the pattern has no digits
fn format_with_pattern(n: f64, pattern: &str) -> Option<String> {
    let pattern = pattern.replace('"', "");
    let (_, prefix, integer, decimals, percent, suffix) =
        lazy_regex::regex_captures!(r"^([^0#.,%]*)([0#,]*)(?:\.([0#]+))?(%?)(.*)$", &pattern)?;
    if integer.is_empty() && decimals.is_empty() {
        return None;
    }

    let scaled = if percent.is_empty() { n } else { n * 100.0 };
    let places = decimals.len();
    let rounded = round_decimal(scaled, places as i32, RoundingStrategy::MidpointAwayFromZero);
    let digits = format!("{:.*}", places, rounded.abs());
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (digits, None),
    };

    let int_part = if integer.contains(',') {
        group_thousands(&int_part)
    } else if !integer.contains('0') && int_part == "0" {
        String::new()
    } else {
        int_part
    };

    let mut out = String::new();
    if rounded < 0.0 {
        out.push('-');
    }
    out.push_str(prefix);
    out.push_str(&int_part);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(&frac);
    }
    out.push_str(percent);
    out.push_str(suffix);
    Some(out)
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
