//! Test utilities for bitempo integration tests
//!
//! `EngineFixture` wires a fresh in-memory series store, policy store and
//! refresh engine together; every test gets its own isolated instance.

// each test binary compiles its own copy and uses a different subset
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use bitempo::formula::{EvalContext, FormulaError, FormulaResult, Value};
use bitempo::{
    CachePolicy, Curve, MemoryPolicyStore, Operator, OperatorRegistry, PolicyStore,
    RefreshEngine, SeriesStore, Stamp,
};

/// A stamp on day `d` of January 2025, UTC midnight.
pub fn day(d: u32) -> Stamp {
    at(d, 0)
}

/// A stamp on day `d` of January 2025 at hour `h`.
pub fn at(d: u32, h: u32) -> Stamp {
    Utc.with_ymd_and_hms(2025, 1, d, h, 0, 0).unwrap()
}

pub fn curve(pairs: &[(u32, f64)]) -> Curve {
    Curve::from_pairs(pairs.iter().map(|&(d, v)| (day(d), v)))
}

/// Isolated engine instance backed by in-memory stores.
pub struct EngineFixture {
    pub store: Arc<SeriesStore>,
    pub policies: Arc<MemoryPolicyStore>,
    pub engine: RefreshEngine,
}

impl EngineFixture {
    pub fn new() -> Self {
        Self::with_registry(OperatorRegistry::with_builtins())
    }

    pub fn with_registry(registry: OperatorRegistry) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(SeriesStore::new(Arc::new(registry)));
        let policies = Arc::new(MemoryPolicyStore::new());
        let engine = RefreshEngine::new(
            store.clone(),
            policies.clone() as Arc<dyn PolicyStore>,
        );
        Self {
            store,
            policies,
            engine,
        }
    }

    /// A daily-midnight policy anchored at 2025-01-01 with a ±10 day window.
    pub fn daily_policy(name: &str) -> CachePolicy {
        CachePolicy::new(
            name,
            "(date \"2025-1-1\")",
            "(shifted now #:days -10)",
            "(shifted now #:days 10)",
            "0 0 * * *",
            "0 1 * * *",
        )
    }

    /// Ingest one ground revision at noon of `idate_day` carrying a single
    /// point `(value_day, value)`.
    pub fn noon_revision(&self, name: &str, idate_day: u32, value_day: u32, value: f64) {
        self.store
            .update(name, curve(&[(value_day, value)]), at(idate_day, 12))
            .expect("ground ingest");
    }

    /// Register the policy and link the series to it.
    pub fn policy_with(&self, policy: CachePolicy, series: &str) {
        let name = policy.name.clone();
        self.engine.new_policy(policy).expect("create policy");
        self.engine.set_policy(&name, series).expect("link series");
    }
}

/// An operator that always fails to evaluate, for exercising partial-failure
/// aggregation in batch refreshes.
pub struct BrokenOp;

impl Operator for BrokenOp {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn evaluate(&self, _ctx: &EvalContext<'_>, _args: &[bitempo::Expr]) -> FormulaResult<Value> {
        Err(FormulaError::Evaluation("broken on purpose".to_string()))
    }
}
