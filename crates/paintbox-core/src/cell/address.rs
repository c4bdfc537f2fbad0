//! A1-style addresses, rectangular ranges and sheet-qualified references

use crate::error::{Error, Result};
use crate::{MAX_COLS, MAX_ROWS};
use std::fmt;
use std::str::FromStr;

/// A cell address such as `B7` or `$B$7`
///
/// Rows and columns are 0-based; `$` markers are kept so references can be
/// printed back the way they were written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellAddress {
    pub row: u32,
    pub col: u16,
    pub row_absolute: bool,
    pub col_absolute: bool,
}

fn strip_dollar(s: &str) -> (bool, &str) {
    match s.strip_prefix('$') {
        Some(rest) => (true, rest),
        None => (false, s),
    }
}

impl CellAddress {
    pub fn new(row: u32, col: u16) -> Self {
        Self::with_absolute(row, col, false, false)
    }

    pub fn with_absolute(row: u32, col: u16, row_absolute: bool, col_absolute: bool) -> Self {
        Self {
            row,
            col,
            row_absolute,
            col_absolute,
        }
    }

    /// `$A$1` style
    pub fn absolute(row: u32, col: u16) -> Self {
        Self::with_absolute(row, col, true, true)
    }

    /// Parse `B7`, `$B7`, `B$7` or `$B$7`
    ///
    /// ```
    /// use paintbox_core::CellAddress;
    ///
    /// let addr = CellAddress::parse("$C$12").unwrap();
    /// assert_eq!((addr.row, addr.col), (11, 2));
    /// assert!(addr.row_absolute && addr.col_absolute);
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || Error::InvalidAddress(format!("'{}'", text));

        let (col_absolute, rest) = strip_dollar(text);
        let split = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let (letters, rest) = rest.split_at(split);
        let (row_absolute, digits) = strip_dollar(rest);

        if letters.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let col = Self::letters_to_column(letters)?;
        let row: u32 = digits
            .parse()
            .map_err(|_| Error::OutOfBounds(text.to_string()))?;
        match row {
            0 => Err(invalid()),
            r if r > MAX_ROWS => Err(Error::OutOfBounds(text.to_string())),
            r => Ok(Self::with_absolute(r - 1, col, row_absolute, col_absolute)),
        }
    }

    /// 0 -> `A`, 25 -> `Z`, 26 -> `AA`
    pub fn column_to_letters(col: u16) -> String {
        let mut letters = Vec::with_capacity(3);
        let mut n = u32::from(col) + 1;
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push(b'A' + rem as u8);
            n = (n - 1) / 26;
        }
        letters.iter().rev().map(|&b| char::from(b)).collect()
    }

    /// `A` -> 0, `AA` -> 26, case-insensitive
    pub fn letters_to_column(letters: &str) -> Result<u16> {
        if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(Error::InvalidAddress(format!("column '{}'", letters)));
        }
        let index = letters.bytes().try_fold(0u32, |acc, b| {
            let next = acc * 26 + u32::from(b.to_ascii_uppercase() - b'A') + 1;
            (next <= u32::from(MAX_COLS)).then_some(next)
        });
        match index {
            Some(n) => Ok((n - 1) as u16),
            None => Err(Error::OutOfBounds(letters.to_string())),
        }
    }

    pub fn to_a1_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let col_mark = if self.col_absolute { "$" } else { "" };
        let row_mark = if self.row_absolute { "$" } else { "" };
        write!(
            f,
            "{}{}{}{}",
            col_mark,
            Self::column_to_letters(self.col),
            row_mark,
            self.row + 1
        )
    }
}

impl FromStr for CellAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A rectangle of cells, always stored top-left to bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: CellAddress,
    pub end: CellAddress,
}

impl CellRange {
    /// Build a range from any two opposite corners
    pub fn new(a: CellAddress, b: CellAddress) -> Self {
        Self {
            start: CellAddress::with_absolute(
                a.row.min(b.row),
                a.col.min(b.col),
                a.row_absolute,
                a.col_absolute,
            ),
            end: CellAddress::with_absolute(
                a.row.max(b.row),
                a.col.max(b.col),
                b.row_absolute,
                b.col_absolute,
            ),
        }
    }

    pub fn single(addr: CellAddress) -> Self {
        Self {
            start: addr,
            end: addr,
        }
    }

    /// Parse `A1:B10` or a single `A1`
    pub fn parse(text: &str) -> Result<Self> {
        match text.trim().split_once(':') {
            Some((a, b)) => Ok(Self::new(CellAddress::parse(a)?, CellAddress::parse(b)?)),
            None => Ok(Self::single(CellAddress::parse(text)?)),
        }
    }

    pub fn contains(&self, addr: &CellAddress) -> bool {
        (self.start.row..=self.end.row).contains(&addr.row)
            && (self.start.col..=self.end.col).contains(&addr.col)
    }

    pub fn row_count(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn col_count(&self) -> u16 {
        self.end.col - self.start.col + 1
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.row_count()) * u64::from(self.col_count())
    }

    /// Addresses in row-major order
    pub fn cells(&self) -> RangeCells {
        RangeCells {
            range: *self,
            next: 0,
            total: self.cell_count(),
        }
    }

    pub fn to_a1_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

impl FromStr for CellRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Row-major walk over a [`CellRange`]
#[derive(Debug, Clone)]
pub struct RangeCells {
    range: CellRange,
    next: u64,
    total: u64,
}

impl Iterator for RangeCells {
    type Item = CellAddress;

    fn next(&mut self) -> Option<CellAddress> {
        if self.next >= self.total {
            return None;
        }
        let width = u64::from(self.range.col_count());
        let row = self.range.start.row + (self.next / width) as u32;
        let col = self.range.start.col + (self.next % width) as u16;
        self.next += 1;
        Some(CellAddress::new(row, col))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.total - self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for RangeCells {}

/// A cell or range with an optional sheet prefix, e.g. `'Labor Rates'!$B$2:$C$9`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedRange {
    /// Sheet name as written, unquoted
    pub sheet: Option<String>,
    pub range: CellRange,
}

impl QualifiedRange {
    /// ```
    /// use paintbox_core::{CellAddress, QualifiedRange};
    ///
    /// let r = QualifiedRange::parse("'Labor Rates'!$B$2").unwrap();
    /// assert_eq!(r.sheet.as_deref(), Some("Labor Rates"));
    /// assert_eq!(r.range.start, CellAddress::absolute(1, 1));
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (sheet, rest) = split_sheet_prefix(text)?;

        let range = match rest.split_once(':') {
            None => CellRange::single(CellAddress::parse(rest)?),
            Some((first, second)) => {
                // `Data!A1:Data!B2` repeats the prefix on the far corner
                let (second_sheet, second) = split_sheet_prefix(second)?;
                let spans_two = match (&sheet, &second_sheet) {
                    (Some(a), Some(b)) => !a.eq_ignore_ascii_case(b),
                    (None, Some(_)) => true,
                    _ => false,
                };
                if spans_two {
                    return Err(Error::SheetSpanningRange(text.to_string()));
                }
                CellRange::new(CellAddress::parse(first)?, CellAddress::parse(second)?)
            }
        };

        Ok(Self { sheet, range })
    }

    pub fn is_single_cell(&self) -> bool {
        self.range.cell_count() == 1
    }
}

impl fmt::Display for QualifiedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sheet {
            Some(sheet) => write!(f, "{}!{}", quote_sheet_name(sheet), self.range),
            None => write!(f, "{}", self.range),
        }
    }
}

impl FromStr for QualifiedRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split a leading `Sheet!` or `'Sheet Name'!` off a reference
///
/// Inside quotes `''` stands for one apostrophe. Without a `!` the whole
/// text comes back as the remainder.
pub fn split_sheet_prefix(text: &str) -> Result<(Option<String>, &str)> {
    let Some(quoted) = text.strip_prefix('\'') else {
        return match text.split_once('!') {
            Some(("", _)) => Err(Error::InvalidAddress(format!("empty sheet name in '{}'", text))),
            Some((sheet, rest)) => Ok((Some(sheet.to_string()), rest)),
            None => Ok((None, text)),
        };
    };

    let mut name = String::new();
    let mut rest = quoted;
    loop {
        let Some(quote) = rest.find('\'') else {
            return Err(Error::InvalidAddress(format!("unterminated sheet name in '{}'", text)));
        };
        name.push_str(&rest[..quote]);
        rest = &rest[quote + 1..];
        match rest.strip_prefix('\'') {
            Some(after) => {
                name.push('\'');
                rest = after;
            }
            None => break,
        }
    }

    match rest.strip_prefix('!') {
        Some(rest) if !name.is_empty() => Ok((Some(name), rest)),
        _ => Err(Error::InvalidAddress(format!(
            "expected '!' after sheet name in '{}'",
            text
        ))),
    }
}

/// Quote a sheet name unless it is a plain identifier
pub fn quote_sheet_name(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| !c.is_ascii_digit())
        && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}
