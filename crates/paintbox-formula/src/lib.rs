//! # paintbox-formula
//!
//! Formula parser and evaluator for paintbox.
//!
//! This crate provides:
//! - Formula parsing (text → AST), with named ranges resolved at parse time
//! - A reference-counted [`ParseCache`] shared by every formula cell
//! - Formula evaluation (AST → value) against any [`CellSource`]
//! - The built-in Excel function library
//! - Dependency tracking: reference extraction, ordering, cycle detection
//!   and layered calculation plans
//!
//! ## Example
//!
//! ```rust
//! use paintbox_formula::{evaluate, parse_formula, EvaluationContext, FormulaValue};
//!
//! let ast = parse_formula("=ROUND(3.14159, 2)").unwrap();
//! let value = evaluate(&ast, &EvaluationContext::simple()).unwrap();
//! assert_eq!(value, FormulaValue::Number(3.14));
//! ```

pub mod ast;
pub mod cache;
pub mod dependency;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod references;
pub mod source;

pub use ast::{BinaryOperator, CellReference, FormulaExpr, RangeReference, UnaryOperator};
pub use cache::{CacheStats, ParseCache};
pub use dependency::{CalculationPlan, CycleDetected, DependencyGraph, PlanNode};
pub use error::{FormulaError, FormulaResult};
pub use evaluator::{evaluate, format_number, function_registry, EvaluationContext, FormulaValue};
pub use functions::{FunctionDef, FunctionRegistry};
pub use parser::{
    parse_cell_input, parse_formula, parse_formula_with, parse_literal, CellInput, NameResolver,
    ParseContext, ParsedFormula, ParserOptions, SheetNames,
};
pub use references::{collect_references, is_volatile, resolve_references, Reference, ResolvedReferences};
pub use source::{CellRead, CellSource};
