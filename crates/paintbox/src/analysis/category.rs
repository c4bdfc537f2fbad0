//! Formula categories
//!
//! A coarse label for what a formula mostly does, used for reporting and
//! for grouping validation results. The rules are ordered substring checks
//! on the uppercased text; the first group with a hit wins.

use lazy_regex::regex_is_match;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormulaCategory {
    Financial,
    Lookup,
    Statistical,
    Math,
    Logical,
    Text,
    DateTime,
    Arithmetic,
    Other,
}

const RULES: &[(FormulaCategory, &[&str])] = &[
    (FormulaCategory::Financial, &["PMT", "PV", "FV", "RATE", "NPV", "IRR"]),
    (FormulaCategory::Lookup, &["VLOOKUP", "HLOOKUP", "INDEX", "MATCH", "XLOOKUP"]),
    (FormulaCategory::Statistical, &["AVERAGE", "STDEV", "VAR", "MEDIAN", "MODE"]),
    (FormulaCategory::Math, &["SUM", "PRODUCT", "SQRT", "POWER", "LOG"]),
    (FormulaCategory::Logical, &["IF", "AND", "OR", "NOT", "XOR"]),
    (FormulaCategory::Text, &["CONCATENATE", "LEFT", "RIGHT", "MID", "LEN"]),
    (FormulaCategory::DateTime, &["DATE", "TIME", "NOW", "TODAY", "YEAR", "MONTH"]),
];

impl FormulaCategory {
    pub const ALL: [FormulaCategory; 9] = [
        FormulaCategory::Financial,
        FormulaCategory::Lookup,
        FormulaCategory::Statistical,
        FormulaCategory::Math,
        FormulaCategory::Logical,
        FormulaCategory::Text,
        FormulaCategory::DateTime,
        FormulaCategory::Arithmetic,
        FormulaCategory::Other,
    ];

    /// Categorize formula text
    ///
    /// Matching is by substring, so `=SUMIF(...)` is Math and `=IFERROR(...)`
    /// is Logical.
    pub fn classify(formula: &str) -> Self {
        let upper = formula.to_uppercase();
        for (category, needles) in RULES {
            if needles.iter().any(|n| upper.contains(n)) {
                return *category;
            }
        }
        if regex_is_match!(r"^[=+\-*/()\d\s$A-Z]+$", &upper) {
            FormulaCategory::Arithmetic
        } else {
            FormulaCategory::Other
        }
    }

    /// Category given by the document when it names a known one, otherwise
    /// classified from the text
    pub fn resolve(declared: Option<&str>, formula: &str) -> Self {
        declared
            .and_then(|c| c.parse().ok())
            .unwrap_or_else(|| Self::classify(formula))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FormulaCategory::Financial => "Financial",
            FormulaCategory::Lookup => "Lookup",
            FormulaCategory::Statistical => "Statistical",
            FormulaCategory::Math => "Math",
            FormulaCategory::Logical => "Logical",
            FormulaCategory::Text => "Text",
            FormulaCategory::DateTime => "DateTime",
            FormulaCategory::Arithmetic => "Arithmetic",
            FormulaCategory::Other => "Other",
        }
    }
}

impl fmt::Display for FormulaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormulaCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown formula category '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify() {
        let cases = [
            ("=PMT(B1/12,B2,B3)", FormulaCategory::Financial),
            ("=VLOOKUP(A2,Prices!A:B,2,FALSE)", FormulaCategory::Lookup),
            ("=AVERAGE(C2:C9)", FormulaCategory::Statistical),
            ("=SUM(D2:D20)*1.1", FormulaCategory::Math),
            ("=IF(A1>0,\"Yes\",\"No\")", FormulaCategory::Logical),
            ("=LEFT(A1,3)", FormulaCategory::Text),
            ("=TODAY()-B4", FormulaCategory::DateTime),
            ("=B2*C2+$D$1", FormulaCategory::Arithmetic),
            ("=A1&\" gal\"", FormulaCategory::Other),
        ];
        for (formula, expected) in cases {
            assert_eq!(FormulaCategory::classify(formula), expected, "{}", formula);
        }
    }

    #[test]
    fn test_first_matching_group_wins() {
        // RATE sits in the financial group even inside a larger word
        assert_eq!(FormulaCategory::classify("=LaborRate*B2"), FormulaCategory::Financial);
        assert_eq!(FormulaCategory::classify("=IF(SUM(A1:A3)>0,1,0)"), FormulaCategory::Math);
    }

    #[test]
    fn test_resolve_prefers_declared() {
        assert_eq!(
            FormulaCategory::resolve(Some("lookup"), "=A1+1"),
            FormulaCategory::Lookup
        );
        assert_eq!(
            FormulaCategory::resolve(Some("Mystery"), "=A1+1"),
            FormulaCategory::Arithmetic
        );
        assert_eq!(FormulaCategory::resolve(None, "=SUM(A1)"), FormulaCategory::Math);
    }
}
