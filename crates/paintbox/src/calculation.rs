//! Workbook calculation engine
//!
//! Owns the cell store, the parse cache and the dependency graph, and keeps
//! the three in sync as cells change. Recalculation walks the layered plan
//! from [`DependencyGraph::calculation_plan`]: plain cells of a layer are
//! evaluated against the committed values of earlier layers, and cyclic
//! groups go through an iterative Gauss-Seidel solver.
//!
//! # Example
//!
//! ```rust
//! use paintbox::prelude::*;
//!
//! let mut engine = CalculationEngine::new(CalculationOptions::default());
//! engine.create_sheet("Estimate").unwrap();
//! engine.set_cell_input("Estimate", "A1", "120").unwrap();
//! engine.set_cell_input("Estimate", "A2", "=A1*2.5").unwrap();
//!
//! let result = engine.calculate_cell("Estimate", "A2").unwrap();
//! assert_eq!(result.value, CellValue::Number(300.0));
//! ```

use crate::analysis::FormulaCategory;
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::metrics::RecalcStats;
use ahash::{AHashMap, AHashSet};
use chrono::NaiveDateTime;
use paintbox_core::{
    Cell, CellContent, CellError, CellId, CellKey, CellState, CellStore, CellValue, ErrorKind,
    NamedRange, SheetId,
};
use paintbox_formula::{
    evaluate, format_number, is_volatile, parse_literal, resolve_references, CacheStats,
    CalculationPlan, DependencyGraph, EvaluationContext, FormulaError, FormulaValue, ParseCache,
    ParsedFormula, ParserOptions, PlanNode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Layers smaller than this are evaluated on the calling thread
#[cfg(feature = "parallel")]
const PARALLEL_THRESHOLD: usize = 64;

/// When recalculation happens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalcMode {
    /// Every edit recalculates the cells it made dirty
    #[default]
    Automatic,
    /// Edits only mark cells dirty; the caller recalculates explicitly
    Manual,
}

/// Options for workbook calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculationOptions {
    pub mode: CalcMode,
    /// Iterate cyclic groups instead of failing them at once
    pub iterative: bool,
    /// Maximum sweeps over a cyclic group (default: 100)
    pub max_iterations: u32,
    /// A cycle has converged once no value moves by this much (default: 0.001)
    pub epsilon: f64,
    /// Function argument separator (`,` or `;`)
    pub list_separator: char,
    /// Evaluate large layers on the rayon pool (needs the `parallel` feature)
    pub parallel: bool,
}

impl Default for CalculationOptions {
    fn default() -> Self {
        Self {
            mode: CalcMode::Automatic,
            iterative: true,
            max_iterations: 100,
            epsilon: 0.001,
            list_separator: ',',
            parallel: true,
        }
    }
}

impl CalculationOptions {
    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            list_separator: self.list_separator,
        }
    }
}

/// Result of calculating one cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalcResult {
    pub value: CellValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// The value as Excel's General format shows it; `None` for empty cells
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_value: Option<String>,
}

impl CalcResult {
    pub fn new(value: CellValue, error: Option<ErrorKind>) -> Self {
        let formatted_value = format_value(&value);
        Self {
            value,
            error,
            formatted_value,
        }
    }

    fn of(cell: &Cell) -> Self {
        Self::new(cell.value().clone(), cell.error())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Display text of a value in General format
pub fn format_value(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Empty => None,
        CellValue::Number(n) => Some(format_number(*n)),
        CellValue::String(s) => Some(s.as_str().to_string()),
        CellValue::Boolean(true) => Some("TRUE".to_string()),
        CellValue::Boolean(false) => Some("FALSE".to_string()),
        CellValue::Error(e) => Some(e.to_string()),
    }
}

/// JSON form of a value: errors become their code, empty becomes null
pub fn value_to_json(value: &CellValue) -> serde_json::Value {
    match value {
        CellValue::Empty => serde_json::Value::Null,
        CellValue::Number(n) => serde_json::json!(n),
        CellValue::String(s) => serde_json::Value::String(s.as_str().to_string()),
        CellValue::Boolean(b) => serde_json::Value::Bool(*b),
        CellValue::Error(e) => serde_json::Value::String(e.to_string()),
    }
}

/// Read a literal from JSON; error codes in strings become error values
///
/// Arrays and objects have no cell equivalent and give `None`.
pub fn value_from_json(value: &serde_json::Value) -> Option<CellValue> {
    match value {
        serde_json::Value::Null => Some(CellValue::Empty),
        serde_json::Value::Bool(b) => Some(CellValue::Boolean(*b)),
        serde_json::Value::Number(n) => n.as_f64().map(CellValue::Number),
        serde_json::Value::String(s) => Some(match CellError::parse(s) {
            Some(e) => CellValue::Error(e),
            None => CellValue::string(s.as_str()),
        }),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}

#[derive(Debug, Clone)]
enum Formula {
    Parsed {
        text: String,
        parsed: Arc<ParsedFormula>,
    },
    Invalid(FormulaError),
}

impl Formula {
    fn uses_name(&self, lower: &str) -> bool {
        match self {
            Formula::Parsed { parsed, .. } => parsed.names.iter().any(|n| n == lower),
            Formula::Invalid(_) => false,
        }
    }
}

/// The calculation engine
#[derive(Debug)]
pub struct CalculationEngine {
    options: CalculationOptions,
    store: CellStore,
    cache: ParseCache,
    /// Parsed formula of every formula cell
    formulas: AHashMap<CellId, Formula>,
    graph: DependencyGraph,
    /// Built on demand, dropped whenever an edge changes
    plan: Option<Arc<CalculationPlan>>,
    volatile: AHashSet<CellId>,
    /// Formula cells reading sheets that do not exist yet, with the lowercased names
    unresolved: AHashMap<CellId, Vec<String>>,
    /// Formula cells whose text or parse changed since they were last evaluated
    edited: AHashSet<CellId>,
    /// Cells whose value changed since the last complete pass
    changed: AHashSet<CellId>,
    /// Categories declared by a loaded document, dropped when the cell is rewritten
    categories: AHashMap<CellId, FormulaCategory>,
}

impl Default for CalculationEngine {
    fn default() -> Self {
        Self::new(CalculationOptions::default())
    }
}

impl CalculationEngine {
    pub fn new(options: CalculationOptions) -> Self {
        Self {
            options,
            store: CellStore::new(),
            cache: ParseCache::new(),
            formulas: AHashMap::new(),
            graph: DependencyGraph::new(),
            plan: None,
            volatile: AHashSet::new(),
            unresolved: AHashMap::new(),
            edited: AHashSet::new(),
            changed: AHashSet::new(),
            categories: AHashMap::new(),
        }
    }

    pub fn options(&self) -> &CalculationOptions {
        &self.options
    }

    /// Replace the options; a different separator only affects later parses
    pub fn set_options(&mut self, options: CalculationOptions) {
        self.options = options;
    }

    pub fn mode(&self) -> CalcMode {
        self.options.mode
    }

    pub fn set_mode(&mut self, mode: CalcMode) {
        self.options.mode = mode;
    }

    /// Read access to every cell, sheet and name
    pub fn store(&self) -> &CellStore {
        &self.store
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of formula cells
    pub fn formula_count(&self) -> usize {
        self.formulas.len()
    }

    /// Formula cells not yet settled
    pub fn dirty_count(&self) -> usize {
        self.formulas
            .keys()
            .filter(|id| !self.store.cell(**id).state().is_settled())
            .count()
    }

    /// The parse failure of a formula cell, if its text did not parse
    pub fn parse_error(&self, id: CellId) -> Option<&FormulaError> {
        match self.formulas.get(&id) {
            Some(Formula::Invalid(e)) => Some(e),
            _ => None,
        }
    }

    pub fn is_volatile(&self, id: CellId) -> bool {
        self.volatile.contains(&id)
    }

    // ==================== Sheets and cells ====================

    pub fn sheet_id(&self, name: &str) -> Result<SheetId> {
        self.store
            .sheet_id(name)
            .ok_or_else(|| paintbox_core::Error::SheetNotFound(name.to_string()).into())
    }

    /// Resolve an address on a sheet (the address may carry its own sheet prefix)
    pub fn key(&self, sheet: &str, address: &str) -> Result<CellKey> {
        let sheet = self.sheet_id(sheet)?;
        Ok(self.store.key(sheet, address)?)
    }

    /// Create a sheet; formulas that were waiting for it are relinked
    pub fn create_sheet(&mut self, name: &str) -> Result<SheetId> {
        let id = self.store.create_sheet(name)?;

        let lower = name.to_lowercase();
        let mut waiting: Vec<CellId> = self
            .unresolved
            .iter()
            .filter(|(_, missing)| missing.contains(&lower))
            .map(|(cell, _)| *cell)
            .collect();
        waiting.sort_unstable();

        if !waiting.is_empty() {
            log::debug!("sheet {:?} resolves {} waiting formulas", name, waiting.len());
            for cell in waiting {
                self.link(cell);
                self.store.mark_dirty(cell);
            }
            self.recalculate_if_automatic();
        }
        Ok(id)
    }

    /// Set a cell's content; in automatic mode dirty cells are recalculated
    pub fn set_cell(&mut self, sheet: &str, address: &str, content: CellContent) -> Result<CellId> {
        let key = self.key(sheet, address)?;
        let id = self.write_cell(key, content);
        self.recalculate_if_automatic();
        Ok(id)
    }

    /// Set a cell from raw user input: `=` starts a formula, anything else is a literal
    pub fn set_cell_input(&mut self, sheet: &str, address: &str, input: &str) -> Result<CellId> {
        self.set_cell(sheet, address, content_from_input(input))
    }

    /// The stored cell, or `None` for a cell that was never touched
    pub fn get_cell(&self, sheet: &str, address: &str) -> Result<Option<&Cell>> {
        let key = self.key(sheet, address)?;
        Ok(self.store.get(key))
    }

    /// Last resolved value; untouched cells read as empty
    pub fn get_value(&self, sheet: &str, address: &str) -> Result<CellValue> {
        let key = self.key(sheet, address)?;
        Ok(self.store.value(key))
    }

    /// Define a named range; formulas that looked the name up are reparsed
    pub fn define_name(&mut self, range: NamedRange) -> Result<()> {
        let lower = range.name.to_lowercase();
        self.store.define_name(range)?;
        self.cache.forget_name(&lower);

        let mut affected: Vec<CellId> = self
            .formulas
            .iter()
            .filter(|(_, f)| f.uses_name(&lower))
            .map(|(id, _)| *id)
            .collect();
        affected.sort_unstable();

        if !affected.is_empty() {
            log::debug!("name {:?} reparses {} formulas", lower, affected.len());
            for id in affected {
                self.link(id);
                self.store.mark_dirty(id);
            }
            self.recalculate_if_automatic();
        }
        Ok(())
    }

    /// Cells that recalculate when the given cell changes, in id order
    pub fn impacted_cells(&self, sheet: &str, address: &str) -> Result<Vec<CellKey>> {
        let key = self.key(sheet, address)?;
        let Some(id) = self.store.cell_id(key) else {
            return Ok(Vec::new());
        };
        Ok(self
            .graph
            .transitive_dependents([id])
            .into_iter()
            .map(|d| self.store.cell(d).key())
            .collect())
    }

    /// Pin the category of a formula cell, overriding classification
    pub(crate) fn declare_category(&mut self, id: CellId, category: FormulaCategory) {
        self.categories.insert(id, category);
    }

    /// Declared category if any, else the classified formula text
    ///
    /// Literal and missing cells are Other.
    pub fn category(&self, key: CellKey) -> FormulaCategory {
        let Some(id) = self.store.cell_id(key) else {
            return FormulaCategory::Other;
        };
        if let Some(&declared) = self.categories.get(&id) {
            return declared;
        }
        self.store
            .cell(id)
            .formula()
            .map_or(FormulaCategory::Other, FormulaCategory::classify)
    }

    pub(crate) fn write_cell(&mut self, key: CellKey, content: CellContent) -> CellId {
        let is_formula = content.is_formula();
        let was_formula = self.store.get(key).is_some_and(Cell::is_formula);
        let id = self.store.set_content(key, content);
        self.categories.remove(&id);

        if is_formula {
            self.link(id);
        } else {
            if was_formula {
                self.unlink(id);
            }
            self.changed.insert(id);
        }
        id
    }

    /// Parse a formula cell and wire its edges into the store and graph
    fn link(&mut self, id: CellId) {
        self.release(id);

        let cell = self.store.cell(id);
        let key = cell.key();
        let Some(text) = cell.formula().map(str::to_owned) else {
            self.unlink(id);
            return;
        };

        let options = self.options.parser_options();
        match self.cache.acquire(&text, key.sheet, &self.store, options) {
            Ok(parsed) => {
                let resolved = resolve_references(&parsed.expr, key.sheet, &self.store);
                let precedents: AHashSet<CellId> = resolved
                    .cells
                    .iter()
                    .map(|&k| self.store.ensure_cell(k))
                    .collect();

                if resolved.is_complete() {
                    self.unresolved.remove(&id);
                } else {
                    let missing = resolved
                        .missing_sheets
                        .iter()
                        .map(|s| s.to_lowercase())
                        .collect();
                    self.unresolved.insert(id, missing);
                }

                if is_volatile(&parsed.expr) {
                    self.volatile.insert(id);
                } else {
                    self.volatile.remove(&id);
                }

                self.graph.replace_dependencies(id, precedents.iter().copied());
                self.store.set_precedents(id, precedents);
                self.formulas.insert(id, Formula::Parsed { text, parsed });
            }
            Err(e) => {
                log::warn!("{}: {}", self.store.label(key), e);
                self.unresolved.remove(&id);
                self.volatile.remove(&id);
                self.graph.replace_dependencies(id, std::iter::empty());
                self.store.set_precedents(id, AHashSet::new());
                self.formulas.insert(id, Formula::Invalid(e));
            }
        }

        self.edited.insert(id);
        self.plan = None;
    }

    fn unlink(&mut self, id: CellId) {
        self.release(id);
        self.volatile.remove(&id);
        self.unresolved.remove(&id);
        self.edited.remove(&id);
        self.graph.remove_node(id);
        self.plan = None;
    }

    fn release(&mut self, id: CellId) {
        if let Some(Formula::Parsed { text, parsed }) = self.formulas.remove(&id) {
            self.cache.release(&text, &parsed);
        }
    }

    // ==================== Calculation ====================

    /// The current layered plan, rebuilt if an edge changed since the last one
    pub fn calculation_plan(&mut self) -> Arc<CalculationPlan> {
        if let Some(plan) = &self.plan {
            return Arc::clone(plan);
        }
        let plan = Arc::new(self.graph.calculation_plan());
        self.plan = Some(Arc::clone(&plan));
        plan
    }

    /// Bring one cell up to date and return its result
    ///
    /// Only the dirty cells upstream of it are evaluated. A settled cell is
    /// returned as is without touching anything.
    pub fn calculate_cell(&mut self, sheet: &str, address: &str) -> Result<CalcResult> {
        let key = self.key(sheet, address)?;
        let Some(id) = self.store.cell_id(key) else {
            return Ok(CalcResult::new(CellValue::Empty, None));
        };

        if !self.store.cell(id).state().is_settled() {
            let mut targets: AHashSet<CellId> = self
                .graph
                .transitive_precedents([id])
                .into_iter()
                .filter(|p| !self.store.cell(*p).state().is_settled())
                .collect();
            targets.insert(id);

            let mut stats = RecalcStats::default();
            self.run_pass(Some(&targets), None, &mut stats);
            log::debug!("calculated {}: {}", self.store.label(key), stats);
        }

        Ok(CalcResult::of(self.store.cell(id)))
    }

    /// Recalculate every dirty formula cell
    pub fn recalculate_all(&mut self) -> RecalcStats {
        self.recalculate_with(&CancellationToken::new())
    }

    /// Recalculate every dirty formula cell, stopping between layers once
    /// `cancel` is set
    pub fn recalculate_with(&mut self, cancel: &CancellationToken) -> RecalcStats {
        let started = Instant::now();
        let mut stats = RecalcStats::default();

        let volatile: Vec<CellId> = self.volatile.iter().copied().collect();
        for &id in &volatile {
            self.store.mark_dirty(id);
        }
        stats.volatile_cells = volatile.len();

        self.run_pass(None, Some(cancel), &mut stats);
        if !stats.cancelled {
            self.changed.clear();
            self.cache.sweep();
        }

        stats.remaining_dirty = self.dirty_count();
        stats.finish(started);
        log::info!("recalculation: {}", stats);
        stats
    }

    /// Mark every formula cell for evaluation on the next pass
    pub fn invalidate_all(&mut self) -> usize {
        let mut ids: Vec<CellId> = self.formulas.keys().copied().collect();
        ids.sort_unstable();
        for &id in &ids {
            self.store.set_state(id, CellState::Dirty);
            self.edited.insert(id);
        }
        ids.len()
    }

    /// Result of every formula cell in sheet order
    pub fn formula_results(&self) -> Vec<(CellKey, CalcResult)> {
        let mut results: Vec<(CellKey, CalcResult)> = self
            .formulas
            .keys()
            .map(|&id| {
                let cell = self.store.cell(id);
                (cell.key(), CalcResult::of(cell))
            })
            .collect();
        results.sort_unstable_by_key(|(key, _)| *key);
        results
    }

    /// Current result of a cell without calculating anything
    pub fn result(&self, key: CellKey) -> CalcResult {
        match self.store.get(key) {
            Some(cell) => CalcResult::of(cell),
            None => CalcResult::new(CellValue::Empty, None),
        }
    }

    fn recalculate_if_automatic(&mut self) {
        if self.options.mode == CalcMode::Automatic {
            self.recalculate_all();
        }
    }

    fn is_pending(&self, id: CellId, targets: Option<&AHashSet<CellId>>) -> bool {
        !self.store.cell(id).state().is_settled() && targets.map_or(true, |t| t.contains(&id))
    }

    /// Whether a dirty cell has to be evaluated, or can keep its value
    fn needs_evaluation(&self, id: CellId) -> bool {
        self.edited.contains(&id)
            || self.volatile.contains(&id)
            || self
                .store
                .cell(id)
                .precedents()
                .iter()
                .any(|p| self.changed.contains(p))
    }

    /// Mark a cell settled with the value it already holds
    fn settle(&mut self, id: CellId) {
        let state = if self.store.cell(id).error().is_some() {
            CellState::Error
        } else {
            CellState::Clean
        };
        self.store.set_state(id, state);
    }

    fn run_pass(
        &mut self,
        targets: Option<&AHashSet<CellId>>,
        cancel: Option<&CancellationToken>,
        stats: &mut RecalcStats,
    ) {
        let plan = self.calculation_plan();
        let now = chrono::Local::now().naive_local();

        for layer in &plan.layers {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                stats.cancelled = true;
                log::debug!("pass cancelled after {} layers", stats.layers);
                break;
            }
            stats.layers += 1;

            let mut work = Vec::new();
            let mut cycles = Vec::new();
            for node in layer {
                match *node {
                    PlanNode::Cell(id) => {
                        if !self.is_pending(id, targets) {
                            continue;
                        }
                        if self.needs_evaluation(id) {
                            work.push(id);
                        } else {
                            self.settle(id);
                            stats.cells_skipped += 1;
                        }
                    }
                    PlanNode::Cycle(i) => {
                        let members = &plan.cycles[i];
                        if members.iter().any(|&m| self.is_pending(m, targets)) {
                            cycles.push(i);
                        }
                    }
                }
            }

            self.evaluate_cells(&work, now, stats);
            for i in cycles {
                self.solve_cycle(&plan.cycles[i], now, stats);
            }
        }
    }

    /// Evaluate independent cells against committed values, then commit
    fn evaluate_cells(&mut self, work: &[CellId], now: NaiveDateTime, stats: &mut RecalcStats) {
        if work.is_empty() {
            return;
        }
        for &id in work {
            self.store.set_state(id, CellState::Calculating);
        }

        let results = self.evaluate_batch(work, now);
        for (id, (value, error)) in results {
            self.commit(id, value, error, stats);
            stats.cells_evaluated += 1;
        }
    }

    fn evaluate_batch(
        &self,
        work: &[CellId],
        now: NaiveDateTime,
    ) -> Vec<(CellId, (CellValue, Option<ErrorKind>))> {
        let store = &self.store;
        let formulas = &self.formulas;
        let eval = |&id: &CellId| {
            let sheet = store.cell(id).key().sheet;
            (id, evaluate_formula(store, formulas.get(&id), sheet, now))
        };

        #[cfg(feature = "parallel")]
        if self.options.parallel && work.len() >= PARALLEL_THRESHOLD {
            use rayon::prelude::*;
            return work.par_iter().map(eval).collect();
        }

        work.iter().map(eval).collect()
    }

    fn commit(&mut self, id: CellId, value: CellValue, error: Option<ErrorKind>, stats: &mut RecalcStats) {
        let value = match value {
            CellValue::String(s) => CellValue::String(self.store.intern(s.as_str())),
            v => v,
        };

        let cell = self.store.cell(id);
        if cell.value() != &value || cell.error() != error {
            self.changed.insert(id);
        }
        if error.is_some() {
            stats.errors += 1;
        }
        self.edited.remove(&id);
        self.store.commit(id, value, error);
    }

    /// Iterate a cyclic group until no value moves by `epsilon` or more
    ///
    /// Members are swept in id order and each result is committed right
    /// away, so later members see this sweep's values.
    fn solve_cycle(&mut self, members: &[CellId], now: NaiveDateTime, stats: &mut RecalcStats) {
        if !members.iter().any(|&m| self.needs_evaluation(m)) {
            for &m in members {
                self.settle(m);
            }
            stats.cells_skipped += members.len();
            return;
        }

        // Every solve starts from blank members so an earlier failure
        // cannot be mistaken for a fixed point
        for &m in members {
            self.store.commit(m, CellValue::Empty, None);
        }

        let mut converged = false;
        if self.options.iterative {
            for _ in 0..self.options.max_iterations.max(1) {
                stats.iterations += 1;
                let mut max_delta = 0.0f64;
                for &m in members {
                    let sheet = self.store.cell(m).key().sheet;
                    let (value, error) = evaluate_formula(&self.store, self.formulas.get(&m), sheet, now);
                    max_delta = max_delta.max(delta(self.store.cell(m).value(), &value));
                    self.store.commit(m, value, error);
                }
                if max_delta < self.options.epsilon {
                    converged = true;
                    break;
                }
            }
        }

        if converged {
            stats.cycles_converged += 1;
            for &m in members {
                let cell = self.store.cell(m);
                let (value, error) = (cell.value().clone(), cell.error());
                self.commit(m, value, error, stats);
            }
        } else {
            stats.cycles_failed += 1;
            log::warn!(
                "circular reference through {} cells did not converge, starting at {}",
                members.len(),
                members
                    .first()
                    .map(|&m| self.store.label(self.store.cell(m).key()))
                    .unwrap_or_default()
            );
            for &m in members {
                self.commit(
                    m,
                    CellValue::Error(CellError::Ref),
                    Some(ErrorKind::CircularReference),
                    stats,
                );
            }
        }
        // Cycle members always count as changed for their dependents
        self.changed.extend(members.iter().copied());
        stats.cells_evaluated += members.len();
    }
}

/// Interpret raw input text the way a user typing into a cell means it
pub fn content_from_input(input: &str) -> CellContent {
    if input.trim_start().starts_with('=') {
        CellContent::Formula(input.trim().to_string())
    } else {
        match parse_literal(input) {
            CellValue::Empty => CellContent::Empty,
            value => CellContent::Value(value),
        }
    }
}

fn evaluate_formula(
    store: &CellStore,
    formula: Option<&Formula>,
    sheet: SheetId,
    now: NaiveDateTime,
) -> (CellValue, Option<ErrorKind>) {
    let Some(Formula::Parsed { parsed, .. }) = formula else {
        return (CellValue::Error(CellError::Name), Some(ErrorKind::Parse));
    };

    let ctx = EvaluationContext::new(store, sheet).with_now(now);
    let value = match evaluate(&parsed.expr, &ctx).map(|v| v.scalar()) {
        // A formula pointing at a blank cell shows 0
        Ok(FormulaValue::Empty) => CellValue::Number(0.0),
        Ok(v) => CellValue::from(v),
        Err(e) => {
            log::debug!("evaluation failed: {}", e);
            CellValue::Error(e.cell_error())
        }
    };

    let error = match value.error() {
        Some(_) if ctx.hit_circular_reference() => Some(ErrorKind::CircularReference),
        Some(e) => Some(ErrorKind::from_cell_error(e)),
        None => None,
    };
    (value, error)
}

/// How far a value moved between two sweeps of a cycle
fn delta(old: &CellValue, new: &CellValue) -> f64 {
    match (old, new) {
        (CellValue::Number(a), CellValue::Number(b)) => (a - b).abs(),
        // An error never settles a cycle
        (CellValue::Error(_), _) | (_, CellValue::Error(_)) => f64::INFINITY,
        (a, b) if a == b => 0.0,
        _ => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manual() -> CalculationEngine {
        let mut engine = CalculationEngine::new(CalculationOptions {
            mode: CalcMode::Manual,
            ..Default::default()
        });
        engine.create_sheet("Sheet1").unwrap();
        engine
    }

    fn set(engine: &mut CalculationEngine, address: &str, input: &str) {
        engine.set_cell_input("Sheet1", address, input).unwrap();
    }

    fn value(engine: &CalculationEngine, address: &str) -> CellValue {
        engine.get_value("Sheet1", address).unwrap()
    }

    #[test]
    fn test_simple_calculation() {
        let mut engine = manual();
        set(&mut engine, "A1", "10");
        set(&mut engine, "A2", "20");
        set(&mut engine, "A3", "=A1+A2");

        let stats = engine.recalculate_all();

        assert_eq!(stats.cells_evaluated, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(value(&engine, "A3"), CellValue::Number(30.0));
    }

    #[test]
    fn test_chain_calculation() {
        let mut engine = manual();
        set(&mut engine, "A1", "5");
        set(&mut engine, "A2", "=A1*2");
        set(&mut engine, "A3", "=A2+10");
        set(&mut engine, "A4", "=A3*A1");

        let stats = engine.recalculate_all();

        assert_eq!(stats.cells_evaluated, 3);
        assert_eq!(stats.layers, 3);
        assert_eq!(value(&engine, "A2"), CellValue::Number(10.0));
        assert_eq!(value(&engine, "A3"), CellValue::Number(20.0));
        assert_eq!(value(&engine, "A4"), CellValue::Number(100.0));
    }

    #[test]
    fn test_manual_mode_only_marks_dirty() {
        let mut engine = manual();
        set(&mut engine, "A1", "1");
        set(&mut engine, "B1", "=A1+1");
        engine.recalculate_all();

        set(&mut engine, "A1", "41");
        let cell = engine.get_cell("Sheet1", "B1").unwrap().unwrap();
        assert_eq!(cell.state(), CellState::Dirty);
        assert_eq!(cell.value(), &CellValue::Number(2.0));

        engine.recalculate_all();
        assert_eq!(value(&engine, "B1"), CellValue::Number(42.0));
    }

    #[test]
    fn test_automatic_mode_recalculates_on_edit() {
        let mut engine = CalculationEngine::default();
        engine.create_sheet("Sheet1").unwrap();
        set(&mut engine, "A1", "3");
        set(&mut engine, "B1", "=A1*A1");
        assert_eq!(value(&engine, "B1"), CellValue::Number(9.0));

        set(&mut engine, "A1", "4");
        assert_eq!(value(&engine, "B1"), CellValue::Number(16.0));
    }

    #[test]
    fn test_calculate_cell_only_touches_upstream() {
        let mut engine = manual();
        set(&mut engine, "A1", "2");
        set(&mut engine, "A2", "=A1*3");
        set(&mut engine, "B1", "=99");

        let result = engine.calculate_cell("Sheet1", "A2").unwrap();
        assert_eq!(result.value, CellValue::Number(6.0));
        assert_eq!(result.formatted_value.as_deref(), Some("6"));

        let b1 = engine.get_cell("Sheet1", "B1").unwrap().unwrap();
        assert_eq!(b1.state(), CellState::Dirty);
    }

    #[test]
    fn test_calculate_clean_cell_is_idempotent() {
        let mut engine = manual();
        set(&mut engine, "A1", "7");
        set(&mut engine, "A2", "=A1+1");

        let first = engine.calculate_cell("Sheet1", "A2").unwrap();
        let precedents = engine.get_cell("Sheet1", "A2").unwrap().unwrap().precedents().clone();
        let second = engine.calculate_cell("Sheet1", "A2").unwrap();

        assert_eq!(first, second);
        assert_eq!(
            engine.get_cell("Sheet1", "A2").unwrap().unwrap().precedents(),
            &precedents
        );
    }

    #[test]
    fn test_empty_reference_reads_as_zero() {
        let mut engine = manual();
        set(&mut engine, "A1", "=Z99");
        engine.recalculate_all();
        assert_eq!(value(&engine, "A1"), CellValue::Number(0.0));
    }

    #[test]
    fn test_parse_error_is_local() {
        let mut engine = manual();
        set(&mut engine, "A1", "=1+");
        set(&mut engine, "A2", "=2*3");
        let stats = engine.recalculate_all();

        let a1 = engine.get_cell("Sheet1", "A1").unwrap().unwrap();
        assert_eq!(a1.value(), &CellValue::Error(CellError::Name));
        assert_eq!(a1.error(), Some(ErrorKind::Parse));
        assert_eq!(a1.state(), CellState::Error);
        assert!(engine.parse_error(engine.store().cell_id(a1.key()).unwrap()).is_some());
        assert_eq!(value(&engine, "A2"), CellValue::Number(6.0));
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_circular_reference_without_iteration() {
        let mut engine = CalculationEngine::new(CalculationOptions {
            mode: CalcMode::Manual,
            iterative: false,
            ..Default::default()
        });
        engine.create_sheet("Sheet1").unwrap();
        set(&mut engine, "A1", "=B1+1");
        set(&mut engine, "B1", "=A1+1");
        set(&mut engine, "C1", "=5");

        let stats = engine.recalculate_all();

        assert_eq!(stats.cycles_failed, 1);
        assert_eq!(stats.iterations, 0);
        for address in ["A1", "B1"] {
            let cell = engine.get_cell("Sheet1", address).unwrap().unwrap();
            assert_eq!(cell.error(), Some(ErrorKind::CircularReference));
            assert_eq!(cell.value(), &CellValue::Error(CellError::Ref));
        }
        assert_eq!(value(&engine, "C1"), CellValue::Number(5.0));
    }

    #[test]
    fn test_divergent_cycle_fails_after_max_iterations() {
        let mut engine = manual();
        set(&mut engine, "A1", "=B1+1");
        set(&mut engine, "B1", "=A1+1");

        let stats = engine.recalculate_all();

        assert_eq!(stats.cycles_failed, 1);
        assert_eq!(stats.iterations, 100);
        let a1 = engine.get_cell("Sheet1", "A1").unwrap().unwrap();
        assert_eq!(a1.error(), Some(ErrorKind::CircularReference));
    }

    #[test]
    fn test_iterative_calculation_converges() {
        // B1 = A1, A1 = B1/2 + 0.5 settles at 1
        let mut engine = manual();
        set(&mut engine, "B1", "=A1");
        set(&mut engine, "A1", "=B1/2+0.5");
        set(&mut engine, "C1", "=A1*10");

        let stats = engine.recalculate_all();

        assert_eq!(stats.cycles_converged, 1);
        let a1 = value(&engine, "A1").as_number().unwrap();
        assert!((a1 - 1.0).abs() < 0.01, "A1 = {}", a1);
        let c1 = value(&engine, "C1").as_number().unwrap();
        assert!((c1 - 10.0).abs() < 0.1, "C1 = {}", c1);
    }

    #[test]
    fn test_failed_cycle_recovers_after_input_edit() {
        let mut engine = manual();
        set(&mut engine, "C1", "1");
        set(&mut engine, "D1", "1");
        set(&mut engine, "A1", "=B1+C1");
        set(&mut engine, "B1", "=A1*D1");

        let stats = engine.recalculate_all();
        assert_eq!(stats.cycles_failed, 1);
        assert_eq!(value(&engine, "A1"), CellValue::Error(CellError::Ref));

        // Halving the feedback makes A1 = A1/2 + 1, which settles at 2
        set(&mut engine, "D1", "0.5");
        let stats = engine.recalculate_all();

        assert_eq!(stats.cycles_converged, 1);
        assert_eq!(stats.cycles_failed, 0);
        let a1 = engine.get_cell("Sheet1", "A1").unwrap().unwrap();
        assert_eq!(a1.error(), None);
        let n = a1.value().as_number().unwrap();
        assert!((n - 2.0).abs() < 0.01, "A1 = {}", n);
    }

    #[test]
    fn test_cycle_of_errors_does_not_converge() {
        let mut engine = manual();
        set(&mut engine, "A1", "=B1+1/0");
        set(&mut engine, "B1", "=A1");

        let stats = engine.recalculate_all();

        assert_eq!(stats.cycles_failed, 1);
        let a1 = engine.get_cell("Sheet1", "A1").unwrap().unwrap();
        assert_eq!(a1.error(), Some(ErrorKind::CircularReference));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut engine = manual();
        set(&mut engine, "A1", "=A1+1");
        let stats = engine.recalculate_all();
        assert_eq!(stats.cycles_failed, 1);
    }

    #[test]
    fn test_memoised_pass_skips_unchanged_dependents() {
        let mut engine = manual();
        set(&mut engine, "A1", "4");
        set(&mut engine, "B1", "=ROUND(A1/10,0)");
        set(&mut engine, "C1", "=B1*100");
        set(&mut engine, "D1", "=C1+1");
        engine.recalculate_all();
        assert_eq!(value(&engine, "D1"), CellValue::Number(1.0));

        // B1 still rounds to 0, so C1 and D1 keep their values
        set(&mut engine, "A1", "3");
        let stats = engine.recalculate_all();

        assert_eq!(stats.cells_evaluated, 1);
        assert_eq!(stats.cells_skipped, 2);
        assert_eq!(engine.dirty_count(), 0);
    }

    #[test]
    fn test_volatile_cells_rerun_every_pass() {
        let mut engine = manual();
        set(&mut engine, "A1", "=TODAY()");
        set(&mut engine, "B1", "=5");
        engine.recalculate_all();

        let stats = engine.recalculate_all();
        assert_eq!(stats.volatile_cells, 1);
        assert_eq!(stats.cells_evaluated, 1);
    }

    #[test]
    fn test_cancel_before_pass_leaves_cells_dirty() {
        let mut engine = manual();
        set(&mut engine, "A1", "1");
        set(&mut engine, "B1", "=A1+1");
        set(&mut engine, "C1", "=B1+1");

        let token = CancellationToken::new();
        token.cancel();
        let stats = engine.recalculate_with(&token);

        assert!(stats.cancelled);
        assert_eq!(stats.cells_evaluated, 0);
        assert_eq!(stats.remaining_dirty, 2);
        assert_eq!(
            engine.get_cell("Sheet1", "A1").unwrap().unwrap().state(),
            CellState::Clean
        );

        token.reset();
        let stats = engine.recalculate_with(&token);
        assert!(!stats.cancelled);
        assert_eq!(value(&engine, "C1"), CellValue::Number(3.0));
    }

    #[test]
    fn test_formula_replaced_by_value() {
        let mut engine = manual();
        set(&mut engine, "A1", "1");
        set(&mut engine, "B1", "=A1*2");
        set(&mut engine, "C1", "=B1+1");
        engine.recalculate_all();

        set(&mut engine, "B1", "10");
        engine.recalculate_all();

        assert_eq!(engine.formula_count(), 1);
        assert!(engine.get_cell("Sheet1", "B1").unwrap().unwrap().precedents().is_empty());
        assert_eq!(value(&engine, "C1"), CellValue::Number(11.0));
        assert!(engine.impacted_cells("Sheet1", "A1").unwrap().is_empty());
    }

    #[test]
    fn test_sheet_created_later_is_relinked() {
        let mut engine = manual();
        set(&mut engine, "A1", "=Rates!B2*2");
        engine.recalculate_all();
        assert_eq!(value(&engine, "A1"), CellValue::Error(CellError::Ref));

        engine.create_sheet("Rates").unwrap();
        engine.set_cell_input("Rates", "B2", "21").unwrap();
        engine.recalculate_all();

        assert_eq!(value(&engine, "A1"), CellValue::Number(42.0));
    }

    #[test]
    fn test_defining_a_name_reparses_users() {
        let mut engine = manual();
        set(&mut engine, "A1", "0.5");
        set(&mut engine, "B1", "=IFERROR(Markup*100,-1)");
        engine.recalculate_all();
        assert_eq!(value(&engine, "B1"), CellValue::Number(-1.0));

        engine
            .define_name(NamedRange::workbook_scope("Markup", "Sheet1!$A$1").unwrap())
            .unwrap();
        engine.recalculate_all();
        assert_eq!(value(&engine, "B1"), CellValue::Number(50.0));
    }

    #[test]
    fn test_impacted_cells() {
        let mut engine = manual();
        set(&mut engine, "A1", "1");
        set(&mut engine, "B1", "=A1");
        set(&mut engine, "C1", "=B1");

        let impacted = engine.impacted_cells("Sheet1", "A1").unwrap();
        let labels: Vec<String> = impacted.iter().map(|k| engine.store().label(*k)).collect();
        assert_eq!(labels, vec!["Sheet1!B1", "Sheet1!C1"]);
    }

    #[test]
    fn test_content_from_input() {
        assert_eq!(content_from_input(" =A1 "), CellContent::Formula("=A1".into()));
        assert_eq!(content_from_input("12.5"), CellContent::Value(CellValue::Number(12.5)));
        assert_eq!(content_from_input(""), CellContent::Empty);
    }

    #[test]
    fn test_calc_result_json() {
        let result = CalcResult::new(CellValue::Error(CellError::Div0), Some(ErrorKind::Division));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["value"], serde_json::json!("#DIV/0!"));
        assert_eq!(json["error"], serde_json::json!("Division"));
        assert_eq!(json["formatted_value"], serde_json::json!("#DIV/0!"));

        let empty = serde_json::to_value(CalcResult::new(CellValue::Empty, None)).unwrap();
        assert_eq!(empty, serde_json::json!({ "value": null }));
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: CalculationOptions =
            serde_json::from_str(r#"{ "mode": "manual", "max_iterations": 10 }"#).unwrap();
        assert_eq!(options.mode, CalcMode::Manual);
        assert_eq!(options.max_iterations, 10);
        assert_eq!(options.epsilon, 0.001);
        assert!(options.iterative);
    }
}
