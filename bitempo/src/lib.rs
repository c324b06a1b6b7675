// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Bitempo - a bitemporal series cache engine
//!
//! Bitempo stores bitemporal time series (every write is a revision keyed by
//! its insertion date), evaluates formulas written in a small lisp-ish
//! expression language, and materializes formula histories under named cache
//! policies so that reads never pay the full evaluation cost.
//!
//! # Features
//!
//! - **Bitemporal storage**: per-series revision logs with as-of reads
//! - **Formula language**: parsed s-expressions over a pluggable operator
//!   registry, with canonical printing and content hashing
//! - **Cache policies**: moment expressions and cron rules describing when
//!   and over which window a formula gets rematerialized
//! - **Cache-aware reads**: cached history patched with a live evaluation of
//!   the policy's look-ahead window
//! - **Batch refresh**: dependency-ordered, idempotent, with cascading
//!   invalidation when a formula definition changes
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use bitempo::{CachePolicy, MemoryPolicyStore, RefreshEngine, SeriesStore};
//!
//! let store = Arc::new(SeriesStore::with_builtins());
//! let policies = Arc::new(MemoryPolicyStore::new());
//! let engine = RefreshEngine::new(store, policies);
//!
//! engine.new_policy(CachePolicy {
//!     name: "hourly".into(),
//!     initial_revdate: "(date \"2025-1-1\")".into(),
//!     look_before: "(shifted (today) #:days -15)".into(),
//!     look_after: "(shifted (today) #:days 2)".into(),
//!     revdate_rule: "0 * * * *".into(),
//!     schedule_rule: "5 * * * *".into(),
//! })?;
//! # Ok::<(), bitempo::CacheError>(())
//! ```

pub mod cache;
pub mod cron;
pub mod formula;
pub mod moment;
pub mod series;
pub mod storage;

// Re-export the primary API surface
pub use cache::{
    CacheError, CachePolicy, CacheResult, CachedReader, MemoryPolicyStore,
    PolicyLink, PolicyStore, RefreshEngine,
};
pub use formula::{parse_formula, Expr, FormulaError, Operator, OperatorRegistry};
pub use moment::{eval_moment, parse_moment, MomentError, MomentExpr};
pub use series::{Curve, Stamp};
pub use storage::{GetArgs, SeriesKind, SeriesReader, SeriesStore, StorageError};

#[cfg(feature = "sled-backend")]
pub use cache::SledPolicyStore;

/// Bitempo version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name for logging and diagnostics
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
