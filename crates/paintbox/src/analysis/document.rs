//! The workbook analysis document
//!
//! JSON produced by the workbook extraction step: sheet dimensions, named
//! ranges, every formula with its cell, and a precomputed dependency map.
//! Maps keyed by sheet name keep their document order, since that order is
//! the workbook's sheet order.

use crate::error::{Error, Result};
use paintbox_core::cell::quote_sheet_name;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::marker::PhantomData;
use std::path::Path;

/// A parsed analysis document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisDocument {
    pub metadata: Metadata,
    #[serde(deserialize_with = "ordered_map")]
    pub named_ranges: Vec<(String, NamedRangeEntry)>,
    #[serde(deserialize_with = "ordered_map")]
    pub formulas_by_sheet: Vec<(String, Vec<FormulaEntry>)>,
    /// Literal cell values, `sheet -> {cell -> value}`
    #[serde(deserialize_with = "ordered_map")]
    pub values_by_sheet: Vec<(String, BTreeMap<String, serde_json::Value>)>,
    /// `reference -> [dependent "Sheet!Cell"]`
    pub dependencies: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub excel_file: Option<String>,
    pub total_formulas: usize,
    pub sheet_count: usize,
    #[serde(deserialize_with = "ordered_map")]
    pub sheets_info: Vec<(String, SheetInfo)>,
    pub category_summary: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SheetInfo {
    pub max_row: u32,
    pub max_column: u32,
    pub cell_count: usize,
}

/// A named range, either as plain reference text or the detailed form
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NamedRangeEntry {
    Reference(String),
    Detailed(NamedRangeDetail),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NamedRangeDetail {
    pub name: Option<String>,
    pub scope: Option<ScopeRef>,
    /// Definition text, e.g. `'Labor Rates'!$B$2`
    pub value: Option<String>,
    pub destinations: Vec<Destination>,
}

/// Scope of a sheet-local name: a sheet position or a sheet name
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScopeRef {
    Index(usize),
    Sheet(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Destination {
    pub sheet: String,
    pub range: String,
}

impl NamedRangeEntry {
    /// The reference text the name stands for
    ///
    /// The detailed form prefers `value`, then falls back to the first
    /// destination.
    pub fn refers_to(&self) -> Option<String> {
        match self {
            NamedRangeEntry::Reference(text) => Some(text.clone()),
            NamedRangeEntry::Detailed(detail) => detail.value.clone().or_else(|| {
                detail
                    .destinations
                    .first()
                    .map(|d| format!("{}!{}", quote_sheet_name(&d.sheet), d.range))
            }),
        }
    }

    pub fn scope(&self) -> Option<&ScopeRef> {
        match self {
            NamedRangeEntry::Reference(_) => None,
            NamedRangeEntry::Detailed(detail) => detail.scope.as_ref(),
        }
    }
}

/// One formula cell
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormulaEntry {
    pub sheet: Option<String>,
    pub cell: String,
    pub formula: String,
    pub category: Option<String>,
    /// References found by the extraction step; informational only
    pub dependencies: Vec<String>,
    pub row: Option<u32>,
    pub column: Option<u32>,
}

impl FormulaEntry {
    /// Formula text with the leading `=` restored if the extractor dropped it
    pub fn formula_text(&self) -> String {
        let text = self.formula.trim();
        if text.starts_with('=') {
            text.to_string()
        } else {
            format!("={}", text)
        }
    }
}

impl AnalysisDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let doc = Self::from_reader(std::io::BufReader::new(file))?;
        log::info!(
            "read analysis document {} ({} sheets, {} formulas)",
            path.display(),
            doc.sheet_names().len(),
            doc.formula_count()
        );
        Ok(doc)
    }

    /// Sheet names in workbook order, without duplicates (ignoring case)
    ///
    /// `sheets_info` decides the order when present; otherwise sheets appear
    /// as the formula and value sections first mention them.
    pub fn sheet_names(&self) -> Vec<&str> {
        let candidates: Vec<&str> = if self.metadata.sheets_info.is_empty() {
            self.formulas_by_sheet
                .iter()
                .map(|(n, _)| n.as_str())
                .chain(self.values_by_sheet.iter().map(|(n, _)| n.as_str()))
                .collect()
        } else {
            self.metadata.sheets_info.iter().map(|(n, _)| n.as_str()).collect()
        };

        let mut names: Vec<&str> = Vec::new();
        for name in candidates {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        names
    }

    pub fn formula_count(&self) -> usize {
        self.formulas_by_sheet.iter().map(|(_, f)| f.len()).sum()
    }

    /// Fail on structural problems that would make loading meaningless
    pub fn check(&self) -> Result<()> {
        if !self.metadata.sheets_info.is_empty() {
            let mut seen: Vec<String> = Vec::new();
            for (name, _) in &self.metadata.sheets_info {
                let lower = name.to_lowercase();
                if seen.contains(&lower) {
                    return Err(Error::invalid(format!("sheet '{}' is listed twice", name)));
                }
                seen.push(lower);
            }
        }
        for (sheet, formulas) in &self.formulas_by_sheet {
            for entry in formulas {
                if entry.cell.trim().is_empty() {
                    return Err(Error::invalid(format!("formula on sheet '{}' has no cell", sheet)));
                }
                if entry.formula.trim().trim_start_matches('=').is_empty() {
                    return Err(Error::invalid(format!("{}!{} has an empty formula", sheet, entry.cell)));
                }
            }
        }
        Ok(())
    }
}

/// Deserialize a JSON object into `(key, value)` pairs in document order
fn ordered_map<'de, D, T>(deserializer: D) -> std::result::Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedMap<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedMap<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map keyed by name")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }

        fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_map(OrderedMap(PhantomData))
}
