// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Operator registry
//!
//! Operators are registered explicitly at store construction, keyed by name.
//! Each entry exposes the fixed capability interface the engine relies on:
//! evaluate, dependencies, insertion-dates (for autotrophic operators) and
//! metadata (liveness).

use chrono::{Duration, Utc};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use super::{eval_expr, EvalContext, Expr, FormulaError, FormulaResult, Value};
use crate::moment::parse_date_literal;
use crate::series::{Curve, Stamp};

/// Static facts about an operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorMetadata {
    /// Sources data outside the series graph and supplies its own
    /// insertion dates.
    pub autotrophic: bool,
    /// Depends on the current moment; formulas containing it are never
    /// frequency-reduced.
    pub live: bool,
}

/// The capability interface every formula operator implements.
pub trait Operator: Send + Sync {
    fn name(&self) -> &'static str;

    fn metadata(&self) -> OperatorMetadata {
        OperatorMetadata::default()
    }

    fn evaluate(&self, ctx: &EvalContext<'_>, args: &[Expr]) -> FormulaResult<Value>;

    /// Series names this call pulls in beyond structural `(series ...)`
    /// references.
    fn dependencies(&self, _args: &[Expr]) -> Vec<String> {
        Vec::new()
    }

    /// For autotrophic operators: the insertion dates they observe within
    /// the inclusive `[from, to]` range. `None` for ordinary operators.
    fn insertion_dates(
        &self,
        _args: &[Expr],
        _from: Stamp,
        _to: Stamp,
    ) -> Option<Vec<Stamp>> {
        None
    }
}

/// Registry of formula operators, populated by registration calls at
/// process start.
#[derive(Default)]
pub struct OperatorRegistry {
    ops: HashMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// With all builtin operators registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtin_operators(&mut registry);
        registry
    }

    pub fn register(&mut self, op: Arc<dyn Operator>) {
        debug!("registered formula operator: {}", op.name());
        self.ops.insert(op.name().to_string(), op);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Operator>> {
        self.ops.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ops.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Register the builtin operator set.
pub fn register_builtin_operators(registry: &mut OperatorRegistry) {
    registry.register(Arc::new(ScalarArith {
        name: "+",
        apply: |a, b| a + b,
    }));
    registry.register(Arc::new(ScalarArith {
        name: "*",
        apply: |a, b| a * b,
    }));
    registry.register(Arc::new(AddSeries));
    registry.register(Arc::new(ConstantOp));
    registry.register(Arc::new(TodayOp));
}

/// `(+ k <series>)` / `(* k <series>)`: apply a scalar to every value.
struct ScalarArith {
    name: &'static str,
    apply: fn(f64, f64) -> f64,
}

impl Operator for ScalarArith {
    fn name(&self) -> &'static str {
        self.name
    }

    fn evaluate(&self, ctx: &EvalContext<'_>, args: &[Expr]) -> FormulaResult<Value> {
        if args.len() != 2 {
            return Err(bad(self.name, "expected exactly 2 arguments"));
        }
        let left = eval_expr(ctx, &args[0])?;
        let right = eval_expr(ctx, &args[1])?;
        let apply = self.apply;
        match (left, right) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(apply(a, b))),
            (Value::Scalar(k), Value::Curve(c)) | (Value::Curve(c), Value::Scalar(k)) => {
                Ok(Value::Curve(c.map_values(|v| apply(k, v))))
            }
            (Value::Curve(_), Value::Curve(_)) => {
                Err(bad(self.name, "use (add ...) to combine two series"))
            }
        }
    }
}

/// `(add <series> <series> ...)`: pointwise sum over shared value dates.
struct AddSeries;

impl Operator for AddSeries {
    fn name(&self) -> &'static str {
        "add"
    }

    fn evaluate(&self, ctx: &EvalContext<'_>, args: &[Expr]) -> FormulaResult<Value> {
        if args.is_empty() {
            return Err(bad("add", "expected at least 1 argument"));
        }
        let mut curves = Vec::with_capacity(args.len());
        for arg in args {
            curves.push(eval_expr(ctx, arg)?.into_curve("add")?);
        }
        Ok(Value::Curve(Curve::sum(&curves)))
    }
}

/// `(constant <value> "<from>" "<to>" "<revdate>")`: a daily curve sourced
/// from nowhere - the reference autotrophic operator. It appears at
/// `revdate` and is empty for any earlier revision.
struct ConstantOp;

impl ConstantOp {
    fn parse_args(args: &[Expr]) -> FormulaResult<(f64, Stamp, Stamp, Stamp)> {
        let detail = "expected (constant <value> \"<from>\" \"<to>\" \"<revdate>\")";
        if args.len() != 4 {
            return Err(bad("constant", detail));
        }
        let value = match &args[0] {
            Expr::Number(n) => *n,
            _ => return Err(bad("constant", detail)),
        };
        let mut dates = Vec::with_capacity(3);
        for arg in &args[1..] {
            match arg {
                Expr::Str(text) => match parse_date_literal(text) {
                    Some(d) => dates.push(d),
                    None => return Err(bad("constant", detail)),
                },
                _ => return Err(bad("constant", detail)),
            }
        }
        Ok((value, dates[0], dates[1], dates[2]))
    }
}

impl Operator for ConstantOp {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn metadata(&self) -> OperatorMetadata {
        OperatorMetadata {
            autotrophic: true,
            live: false,
        }
    }

    fn evaluate(&self, ctx: &EvalContext<'_>, args: &[Expr]) -> FormulaResult<Value> {
        let (value, from, to, revdate) = Self::parse_args(args)?;
        if let Some(rev) = ctx.revision_date {
            if rev < revdate {
                return Ok(Value::Curve(Curve::new()));
            }
        }
        let lo = ctx.from_value_date.map_or(from, |d| d.max(from));
        let hi = ctx.to_value_date.map_or(to, |d| d.min(to));
        let mut curve = Curve::new();
        let mut d = lo;
        while d <= hi {
            curve.insert(d, value);
            d += Duration::days(1);
        }
        Ok(Value::Curve(curve))
    }

    fn insertion_dates(
        &self,
        args: &[Expr],
        from: Stamp,
        to: Stamp,
    ) -> Option<Vec<Stamp>> {
        match Self::parse_args(args) {
            Ok((_, _, _, revdate)) if revdate >= from && revdate <= to => {
                Some(vec![revdate])
            }
            _ => Some(Vec::new()),
        }
    }
}

/// `(today)` / `(today <value>)`: a single point at the current day's
/// midnight. Anchored to nothing, so formulas using it are always live.
struct TodayOp;

impl Operator for TodayOp {
    fn name(&self) -> &'static str {
        "today"
    }

    fn metadata(&self) -> OperatorMetadata {
        OperatorMetadata {
            autotrophic: false,
            live: true,
        }
    }

    fn evaluate(&self, ctx: &EvalContext<'_>, args: &[Expr]) -> FormulaResult<Value> {
        let value = match args {
            [] => 1.0,
            [Expr::Number(n)] => *n,
            _ => return Err(bad("today", "expected at most one numeric argument")),
        };
        let now = ctx.revision_date.unwrap_or_else(Utc::now);
        let midnight = chrono::TimeZone::from_utc_datetime(
            &Utc,
            &now.date_naive().and_hms_opt(0, 0, 0).unwrap(),
        );
        let mut curve = Curve::new();
        curve.insert(midnight, value);
        Ok(Value::Curve(curve))
    }
}

fn bad(op: &str, detail: &str) -> FormulaError {
    FormulaError::BadArguments {
        op: op.to_string(),
        detail: detail.to_string(),
    }
}
