// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Formula expression trees and their operator registry
//!
//! A formula series computes its curve on demand by evaluating a lisp-ish
//! expression tree against other series, e.g. `(series "ground-0")` or
//! `(+ 1 (series "ground-0"))`. Operators live in an explicit
//! [`OperatorRegistry`] built at store construction; each entry is a fixed
//! capability record (evaluate / dependencies / insertion-dates / metadata),
//! which also covers "autotrophic" operators that source data outside the
//! series graph and must supply their own insertion-date logic.

mod parser;
mod registry;

pub use parser::parse_formula;
pub use registry::{
    register_builtin_operators, Operator, OperatorMetadata, OperatorRegistry,
};

use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::series::{Curve, Stamp};
use crate::storage::{GetArgs, SeriesReader};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    #[error("Formula parse error: {0}")]
    Parse(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Bad arguments for ({op} ...): {detail}")]
    BadArguments { op: String, detail: String },

    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

pub type FormulaResult<T> = Result<T, FormulaError>;

/// One node of a formula expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    /// A `(series "name")` reference, normalized out of the generic call form.
    Series(String),
    Call { op: String, args: Vec<Expr> },
}

impl Expr {
    /// All series names referenced anywhere in the tree, including the extra
    /// dependencies operators declare through the registry.
    pub fn series_refs(&self, registry: &OperatorRegistry) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_refs(registry, &mut out);
        out
    }

    fn collect_refs(&self, registry: &OperatorRegistry, out: &mut BTreeSet<String>) {
        match self {
            Expr::Series(name) => {
                out.insert(name.clone());
            }
            Expr::Call { op, args } => {
                if let Some(spec) = registry.get(op) {
                    out.extend(spec.dependencies(args));
                }
                for arg in args {
                    arg.collect_refs(registry, out);
                }
            }
            Expr::Number(_) | Expr::Str(_) => {}
        }
    }

    /// Whether the tree contains an operator depending on "the current
    /// moment" with no anchored upstream revision. Such formulas are always
    /// live and must not be frequency-reduced.
    pub fn is_live(&self, registry: &OperatorRegistry) -> bool {
        match self {
            Expr::Call { op, args } => {
                registry
                    .get(op)
                    .map(|spec| spec.metadata().live)
                    .unwrap_or(false)
                    || args.iter().any(|a| a.is_live(registry))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    /// Canonical text form, used for definition content hashing.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Str(s) => write!(f, "{s:?}"),
            Expr::Series(name) => write!(f, "(series {name:?})"),
            Expr::Call { op, args } => {
                write!(f, "({op}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A value produced while evaluating a formula node: scalars flow into
/// arithmetic operators, curves are the terminal result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Curve(Curve),
}

impl Value {
    pub fn into_curve(self, op: &str) -> FormulaResult<Curve> {
        match self {
            Value::Curve(c) => Ok(c),
            Value::Scalar(_) => Err(FormulaError::BadArguments {
                op: op.to_string(),
                detail: "expected a series-valued argument".to_string(),
            }),
        }
    }
}

/// Everything an operator needs to evaluate its arguments.
pub struct EvalContext<'a> {
    pub reader: &'a dyn SeriesReader,
    pub registry: &'a OperatorRegistry,
    pub revision_date: Option<Stamp>,
    pub from_value_date: Option<Stamp>,
    pub to_value_date: Option<Stamp>,
    pub nocache: bool,
    pub live: bool,
}

impl<'a> EvalContext<'a> {
    fn read_args(&self) -> GetArgs {
        GetArgs {
            revision_date: self.revision_date,
            from_value_date: self.from_value_date,
            to_value_date: self.to_value_date,
            nocache: self.nocache,
            live: self.live,
        }
    }
}

/// Evaluate one expression node.
pub fn eval_expr(ctx: &EvalContext<'_>, expr: &Expr) -> FormulaResult<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Scalar(*n)),
        Expr::Str(s) => Err(FormulaError::Evaluation(format!(
            "string literal {s:?} outside an operator position"
        ))),
        Expr::Series(name) => {
            let curve = ctx
                .reader
                .get(name, &ctx.read_args())
                .map_err(|e| FormulaError::Evaluation(e.to_string()))?;
            Ok(Value::Curve(curve))
        }
        Expr::Call { op, args } => match ctx.registry.get(op) {
            Some(spec) => spec.evaluate(ctx, args),
            None => Err(FormulaError::UnknownOperator(op.clone())),
        },
    }
}

/// Evaluate a whole formula down to its curve.
pub fn eval_formula(ctx: &EvalContext<'_>, expr: &Expr) -> FormulaResult<Curve> {
    match eval_expr(ctx, expr)? {
        Value::Curve(c) => Ok(c),
        Value::Scalar(_) => Err(FormulaError::Evaluation(
            "formula evaluates to a scalar, not a series".to_string(),
        )),
    }
}
