//! Date/time functions
//!
//! Dates are Excel serial numbers in the 1900 date system: serial 1 is
//! 1900-01-01, and serial 60 is the non-existent 1900-02-29 Excel keeps for
//! Lotus compatibility, so every later serial is one ahead of the real day
//! count.

use super::{number, try_value};
use crate::error::FormulaResult;
use crate::evaluator::{EvaluationContext, FormulaValue};
use chrono::{Datelike, NaiveDate, Timelike};
use paintbox_core::CellError;

/// Serial of 9999-12-31, the last date Excel accepts
const MAX_SERIAL: i64 = 2_958_465;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 31).unwrap_or(NaiveDate::MIN)
}

/// Serial number of a real calendar date
pub(crate) fn serial_from_date(date: NaiveDate) -> i64 {
    let days = (date - epoch()).num_days();
    // Everything from March 1900 on sits after the phantom leap day
    if days >= 60 {
        days + 1
    } else {
        days
    }
}

/// (year, month, day) of a serial; serial 0 is the Excel "1900-01-00"
pub(crate) fn date_from_serial(serial: i64) -> Option<(i32, u32, u32)> {
    match serial {
        0 => Some((1900, 1, 0)),
        60 => Some((1900, 2, 29)),
        s if !(1..=MAX_SERIAL).contains(&s) => None,
        s => {
            let days = if s > 60 { s - 1 } else { s };
            let date = epoch().checked_add_signed(chrono::Duration::days(days))?;
            Some((date.year(), date.month(), date.day()))
        }
    }
}

fn date_part(
    args: &[FormulaValue],
    part: impl Fn((i32, u32, u32)) -> f64,
) -> FormulaResult<FormulaValue> {
    let n = try_value!(number(args.first()));
    Ok(match date_from_serial(n.floor() as i64) {
        Some(ymd) => FormulaValue::Number(part(ymd)),
        None => FormulaValue::Error(CellError::Num),
    })
}

/// DATE(year, month, day)
///
/// Month and day overflow roll into the next month or year, and years
/// 0 to 1899 are offset by 1900.
pub fn fn_date(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let mut year = try_value!(number(args.first())).trunc() as i64;
    let month = try_value!(number(args.get(1))).trunc() as i64;
    let day = try_value!(number(args.get(2))).trunc() as i64;

    if (0..1900).contains(&year) {
        year += 1900;
    }
    if !(0..10_000).contains(&year) {
        return Ok(FormulaValue::Error(CellError::Num));
    }

    // 0-based month index handles negatives
    let total_months = year * 12 + (month - 1);
    let norm_year = total_months.div_euclid(12) as i32;
    let norm_month = total_months.rem_euclid(12) as u32 + 1;

    let Some(first) = NaiveDate::from_ymd_opt(norm_year, norm_month, 1) else {
        return Ok(FormulaValue::Error(CellError::Num));
    };

    // Days are added in serial space so they step over the phantom 1900-02-29
    let serial = serial_from_date(first) + day - 1;
    if !(0..=MAX_SERIAL).contains(&serial) {
        return Ok(FormulaValue::Error(CellError::Num));
    }

    Ok(FormulaValue::Number(serial as f64))
}

/// YEAR(serial)
pub fn fn_year(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    date_part(args, |(y, _, _)| y as f64)
}

/// MONTH(serial)
pub fn fn_month(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    date_part(args, |(_, m, _)| m as f64)
}

/// DAY(serial)
pub fn fn_day(args: &[FormulaValue], _ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    date_part(args, |(_, _, d)| d as f64)
}

/// TODAY() - The pass timestamp's date as a serial number
pub fn fn_today(_args: &[FormulaValue], ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Ok(FormulaValue::Number(serial_from_date(ctx.now.date()) as f64))
}

/// NOW() - The pass timestamp as a serial number with a time fraction
pub fn fn_now(_args: &[FormulaValue], ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    let time = ctx.now.time();
    let fraction = f64::from(time.num_seconds_from_midnight()) / 86_400.0;
    Ok(FormulaValue::Number(
        serial_from_date(ctx.now.date()) as f64 + fraction,
    ))
}

/// Render a serial with a day/month/year pattern such as `mm/dd/yyyy`
///
/// Returns `None` for patterns that are not date patterns, and for the
/// phantom 1900-02-29, which has no calendar date to format.
pub(crate) fn format_date_pattern(serial: f64, pattern: &str) -> Option<String> {
    let lower = pattern.to_lowercase();
    if lower.contains(['0', '#', 'h', 's'])
        || !lower.contains(['y', 'm', 'd'])
    {
        return None;
    }

    let (y, m, d) = date_from_serial(serial.floor() as i64)?;
    let date = NaiveDate::from_ymd_opt(y, m, d)?;

    let chars: Vec<char> = lower.chars().filter(|c| *c != '"').collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        match c {
            'y' if run > 2 => out.push_str(&format!("{:04}", date.year())),
            'y' => out.push_str(&format!("{:02}", date.year() % 100)),
            'm' => match run {
                1 => out.push_str(&date.month().to_string()),
                2 => out.push_str(&format!("{:02}", date.month())),
                3 => out.push_str(&date.format("%b").to_string()),
                _ => out.push_str(&date.format("%B").to_string()),
            },
            'd' => match run {
                1 => out.push_str(&date.day().to_string()),
                2 => out.push_str(&format!("{:02}", date.day())),
                3 => out.push_str(&date.format("%a").to_string()),
                _ => out.push_str(&date.format("%A").to_string()),
            },
            other => {
                for _ in 0..run {
                    out.push(other);
                }
            }
        }
        i += run;
    }
    Some(out)
}
