//! Criteria for SUMIF, COUNTIF and AVERAGEIF
//!
//! A criterion is either a bare value (`5`, `"Latex"`) or text starting with
//! a comparison operator (`">=10"`, `"<>Primer"`). Text patterns are
//! case-insensitive and understand `*`, `?` and the `~` escape.

use crate::evaluator::FormulaValue;

const EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    /// Split a leading operator off criteria text
    fn split(text: &str) -> (Op, &str) {
        for (prefix, op) in [
            (">=", Op::Ge),
            ("<=", Op::Le),
            ("<>", Op::Ne),
            (">", Op::Gt),
            ("<", Op::Lt),
            ("=", Op::Eq),
        ] {
            if let Some(rest) = text.strip_prefix(prefix) {
                return (op, rest);
            }
        }
        (Op::Eq, text)
    }

    fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Op::Eq => ordering == Equal,
            Op::Ne => ordering != Equal,
            Op::Lt => ordering == Less,
            Op::Le => ordering != Greater,
            Op::Gt => ordering == Greater,
            Op::Ge => ordering != Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    /// Lowercased pattern
    Text(String),
    Blank,
}

/// A parsed criteria argument
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    op: Op,
    operand: Operand,
}

impl Criterion {
    pub fn new(criteria: &FormulaValue) -> Self {
        let operand = match criteria {
            FormulaValue::Number(n) => Operand::Number(*n),
            FormulaValue::Boolean(b) => Operand::Number(if *b { 1.0 } else { 0.0 }),
            FormulaValue::String(s) => return Self::parse(s),
            // Errors and arrays only ever match blanks
            FormulaValue::Empty | FormulaValue::Error(_) | FormulaValue::Array(_) => Operand::Blank,
        };
        Self { op: Op::Eq, operand }
    }

    fn parse(text: &str) -> Self {
        let (op, rest) = Op::split(text.trim());
        let rest = rest.trim();
        let operand = if rest.is_empty() {
            Operand::Blank
        } else if let Ok(n) = rest.parse::<f64>() {
            Operand::Number(n)
        } else {
            Operand::Text(rest.to_lowercase())
        };
        Self { op, operand }
    }

    /// Whether a cell value satisfies the criterion
    pub fn matches(&self, value: &FormulaValue) -> bool {
        match &self.operand {
            Operand::Blank => {
                let blank = match value {
                    FormulaValue::Empty => true,
                    FormulaValue::String(s) => s.is_empty(),
                    _ => false,
                };
                match self.op {
                    Op::Ne => !blank,
                    _ => blank,
                }
            }
            Operand::Number(target) => {
                let n = match value {
                    FormulaValue::Number(n) => *n,
                    FormulaValue::Boolean(b) => f64::from(u8::from(*b)),
                    // Text never compares equal to a number criterion
                    _ => return self.op == Op::Ne,
                };
                let ordering = if (n - target).abs() < EPSILON {
                    std::cmp::Ordering::Equal
                } else if n < *target {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                };
                self.op.holds(ordering)
            }
            Operand::Text(pattern) => {
                let text = match value {
                    FormulaValue::String(s) => s.to_lowercase(),
                    _ => return self.op == Op::Ne,
                };
                match self.op {
                    Op::Eq => wildcard_match(pattern, &text),
                    Op::Ne => !wildcard_match(pattern, &text),
                    op => op.holds(text.as_str().cmp(pattern.as_str())),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Any,
    One,
    Char(char),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '*' => Token::Any,
            '?' => Token::One,
            '~' => match chars.next() {
                Some(escaped) => Token::Char(escaped),
                None => Token::Char('~'),
            },
            c => Token::Char(c),
        });
    }
    tokens
}

/// Match `text` against an Excel wildcard pattern
///
/// Case is compared as given; callers lowercase both sides.
pub(crate) fn wildcard_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains(['*', '?', '~']) {
        return pattern == text;
    }

    let tokens = tokenize(pattern);
    let text: Vec<char> = text.chars().collect();

    // Greedy scan that backs up to the last `*` on a mismatch
    let (mut p, mut t) = (0, 0);
    let mut resume: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(Token::Any) => {
                resume = Some((p, t));
                p += 1;
            }
            Some(Token::One) => {
                p += 1;
                t += 1;
            }
            Some(Token::Char(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match resume {
                Some((star, from)) => {
                    p = star + 1;
                    t = from + 1;
                    resume = Some((star, from + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| *token == Token::Any)
}
