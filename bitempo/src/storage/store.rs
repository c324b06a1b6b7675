// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Series store facade
//!
//! Owns ground revision logs, formula definitions and the cache namespace.
//! Locking discipline: the inner lock is only held for map access, never
//! across formula evaluation, so re-entrant reads from evaluation cannot
//! deadlock.

use log::{debug, info};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::{GetArgs, RevisionLog, SeriesReader, StorageError, StorageResult};
use crate::formula::{
    eval_formula, parse_formula, EvalContext, Expr, OperatorRegistry,
};
use crate::series::{Curve, Stamp};

/// What a name denotes in the primary namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Ground,
    Formula,
}

struct FormulaRecord {
    definition: String,
    expr: Expr,
    /// Hash of the expanded definition at registration time.
    content_hash: u32,
}

#[derive(Default)]
struct Inner {
    ground: HashMap<String, RevisionLog>,
    formulas: HashMap<String, FormulaRecord>,
    cache: HashMap<String, RevisionLog>,
}

/// In-memory bitemporal store with a primary and a cache namespace.
pub struct SeriesStore {
    inner: RwLock<Inner>,
    registry: Arc<OperatorRegistry>,
}

impl SeriesStore {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            registry,
        }
    }

    /// With the builtin operator set.
    pub fn with_builtins() -> Self {
        Self::new(Arc::new(OperatorRegistry::with_builtins()))
    }

    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    // ------------------------------------------------------------------
    // primary namespace: ground series

    /// Ingest one ground revision; the curve is patched over the previous
    /// revision.
    pub fn update(
        &self,
        name: &str,
        curve: Curve,
        insertion_date: Stamp,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.formulas.contains_key(name) {
            return Err(StorageError::InvalidOperation(format!(
                "{name} is a formula, cannot ingest ground revisions"
            )));
        }
        inner
            .ground
            .entry(name.to_string())
            .or_default()
            .update(insertion_date, curve);
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        let inner = self.inner.read();
        inner.ground.contains_key(name) || inner.formulas.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<SeriesKind> {
        let inner = self.inner.read();
        if inner.formulas.contains_key(name) {
            Some(SeriesKind::Formula)
        } else if inner.ground.contains_key(name) {
            Some(SeriesKind::Ground)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // primary namespace: formulas

    /// Register or redefine a formula. A changed definition purges the
    /// formula's cache and the caches of all its transitive dependents.
    pub fn register_formula(&self, name: &str, definition: &str) -> StorageResult<()> {
        let expr = parse_formula(definition)?;
        let mut visiting = BTreeSet::new();
        self.check_references(&expr, name, &mut visiting)?;

        let previous_hash = {
            let inner = self.inner.read();
            if inner.ground.contains_key(name) {
                return Err(StorageError::InvalidOperation(format!(
                    "{name} is a ground series, cannot register as formula"
                )));
            }
            inner.formulas.get(name).map(|r| r.content_hash)
        };

        {
            let mut inner = self.inner.write();
            inner.formulas.insert(
                name.to_string(),
                FormulaRecord {
                    definition: definition.to_string(),
                    expr,
                    content_hash: 0,
                },
            );
        }
        // the hash covers transitively expanded definitions, so it must be
        // computed after the new record is visible
        let new_hash = self.live_content_hash(name).unwrap_or(0);
        if let Some(record) = self.inner.write().formulas.get_mut(name) {
            record.content_hash = new_hash;
        }

        if let Some(prev) = previous_hash {
            if prev != new_hash {
                info!("formula {name} changed, invalidating dependent caches");
                self.cache_delete(name);
                for dependent in self.dependents(name) {
                    self.cache_delete(&dependent);
                }
            }
        }
        Ok(())
    }

    /// Reject unknown operators, unknown series and reference cycles.
    /// Evaluation recurses through definitions unguarded, so a cycle must
    /// never make it into the formula namespace. Reaching `being_defined`
    /// again through any chain of stored definitions is a cycle, including
    /// the direct self-reference.
    fn check_references(
        &self,
        expr: &Expr,
        being_defined: &str,
        visiting: &mut BTreeSet<String>,
    ) -> StorageResult<()> {
        match expr {
            Expr::Call { op, args } => {
                if self.registry.get(op).is_none() {
                    return Err(
                        crate::formula::FormulaError::UnknownOperator(op.clone()).into()
                    );
                }
                for arg in args {
                    self.check_references(arg, being_defined, visiting)?;
                }
            }
            Expr::Series(child) => {
                if child == being_defined {
                    return Err(StorageError::InvalidOperation(format!(
                        "{being_defined} would depend on itself"
                    )));
                }
                if !self.exists(child) {
                    return Err(StorageError::SeriesNotFound(child.clone()));
                }
                if visiting.insert(child.clone()) {
                    if let Some(child_expr) = self.formula_expr(child) {
                        self.check_references(&child_expr, being_defined, visiting)?;
                    }
                }
            }
            Expr::Number(_) | Expr::Str(_) => {}
        }
        Ok(())
    }

    pub fn formula_definition(&self, name: &str) -> Option<String> {
        self.inner
            .read()
            .formulas
            .get(name)
            .map(|r| r.definition.clone())
    }

    pub fn formula_expr(&self, name: &str) -> Option<Expr> {
        self.inner.read().formulas.get(name).map(|r| r.expr.clone())
    }

    pub fn formula_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().formulas.keys().cloned().collect();
        names.sort();
        names
    }

    /// Formulas that reference `name`, directly or transitively.
    pub fn dependents(&self, name: &str) -> BTreeSet<String> {
        let direct: HashMap<String, BTreeSet<String>> = {
            let inner = self.inner.read();
            inner
                .formulas
                .iter()
                .map(|(n, r)| (n.clone(), r.expr.series_refs(&self.registry)))
                .collect()
        };
        let mut out = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for (candidate, refs) in &direct {
                if refs.contains(&current) && out.insert(candidate.clone()) {
                    frontier.push(candidate.clone());
                }
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // content hashes

    /// The hash stored at registration time.
    pub fn content_hash(&self, name: &str) -> Option<u32> {
        self.inner.read().formulas.get(name).map(|r| r.content_hash)
    }

    /// Recomputed hash of the current expanded definition; differs from
    /// [`Self::content_hash`] after any upstream definition edit.
    pub fn live_content_hash(&self, name: &str) -> Option<u32> {
        let expr = self.formula_expr(name)?;
        let mut visiting = BTreeSet::new();
        visiting.insert(name.to_string());
        let expanded = self.expand(&expr, &mut visiting);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(expanded.to_string().as_bytes());
        Some(hasher.finalize())
    }

    /// Re-anchor the stored hash to the current expanded definition.
    pub fn refresh_content_hash(&self, name: &str) {
        if let Some(h) = self.live_content_hash(name) {
            if let Some(record) = self.inner.write().formulas.get_mut(name) {
                record.content_hash = h;
            }
        }
    }

    /// Inline every referenced formula definition.
    fn expand(&self, expr: &Expr, visiting: &mut BTreeSet<String>) -> Expr {
        match expr {
            Expr::Series(child) => match self.formula_expr(child) {
                Some(child_expr) if visiting.insert(child.clone()) => {
                    let expanded = self.expand(&child_expr, visiting);
                    visiting.remove(child);
                    expanded
                }
                _ => expr.clone(),
            },
            Expr::Call { op, args } => Expr::Call {
                op: op.clone(),
                args: args.iter().map(|a| self.expand(a, visiting)).collect(),
            },
            _ => expr.clone(),
        }
    }

    // ------------------------------------------------------------------
    // rename / delete (both namespaces)

    pub fn rename(&self, old: &str, new: &str) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.ground.contains_key(new) || inner.formulas.contains_key(new) {
            return Err(StorageError::SeriesExists(new.to_string()));
        }
        if let Some(log) = inner.ground.remove(old) {
            inner.ground.insert(new.to_string(), log);
        } else if let Some(record) = inner.formulas.remove(old) {
            inner.formulas.insert(new.to_string(), record);
        } else {
            return Err(StorageError::SeriesNotFound(old.to_string()));
        }
        if let Some(log) = inner.cache.remove(old) {
            debug!("renaming cache {old} -> {new}");
            inner.cache.insert(new.to_string(), log);
        }
        Ok(())
    }

    pub fn delete(&self, name: &str) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let known =
            inner.ground.remove(name).is_some() | inner.formulas.remove(name).is_some();
        if !known {
            return Err(StorageError::SeriesNotFound(name.to_string()));
        }
        if inner.cache.remove(name).is_some() {
            debug!("deleted cache of {name}");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // primary reads (cache-oblivious)

    /// Direct read: ground revision lookup, or formula evaluation through
    /// `reader` (pass the cache-aware decorator to stop at cached series).
    pub fn get_with_reader(
        &self,
        name: &str,
        args: &GetArgs,
        reader: &dyn SeriesReader,
    ) -> StorageResult<Curve> {
        if let Some(log) = self.inner.read().ground.get(name) {
            return Ok(log
                .get_at(args.revision_date)
                .map(|(_, c)| c.window(args.from_value_date, args.to_value_date))
                .unwrap_or_default());
        }
        match self.formula_expr(name) {
            Some(expr) => {
                let ctx = EvalContext {
                    reader,
                    registry: &self.registry,
                    revision_date: args.revision_date,
                    from_value_date: args.from_value_date,
                    to_value_date: args.to_value_date,
                    nocache: args.nocache,
                    live: args.live,
                };
                Ok(eval_formula(&ctx, &expr)?)
            }
            None => Err(StorageError::SeriesNotFound(name.to_string())),
        }
    }

    /// True insertion dates: ground revisions, or the union of upstream
    /// insertion dates for a formula (full tree expansion, cache ignored).
    pub fn insertion_dates(
        &self,
        name: &str,
        from: Option<Stamp>,
        to: Option<Stamp>,
    ) -> StorageResult<Vec<Stamp>> {
        if let Some(log) = self.inner.read().ground.get(name) {
            return Ok(log.insertion_dates(from, to));
        }
        match self.formula_expr(name) {
            Some(expr) => {
                let mut visiting = BTreeSet::new();
                visiting.insert(name.to_string());
                let mut dates = BTreeSet::new();
                self.expr_insertion_dates(&expr, from, to, &mut visiting, &mut dates);
                Ok(dates.into_iter().collect())
            }
            None => Err(StorageError::SeriesNotFound(name.to_string())),
        }
    }

    fn expr_insertion_dates(
        &self,
        expr: &Expr,
        from: Option<Stamp>,
        to: Option<Stamp>,
        visiting: &mut BTreeSet<String>,
        out: &mut BTreeSet<Stamp>,
    ) {
        match expr {
            Expr::Series(child) => match self.kind(child) {
                Some(SeriesKind::Ground) => {
                    let inner = self.inner.read();
                    if let Some(log) = inner.ground.get(child) {
                        out.extend(log.insertion_dates(from, to));
                    }
                }
                Some(SeriesKind::Formula) => {
                    if visiting.insert(child.clone()) {
                        if let Some(child_expr) = self.formula_expr(child) {
                            self.expr_insertion_dates(&child_expr, from, to, visiting, out);
                        }
                        visiting.remove(child);
                    }
                }
                None => {}
            },
            Expr::Call { op, args } => {
                if let Some(spec) = self.registry.get(op) {
                    let lo = from.unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
                    let hi = to.unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
                    if let Some(dates) = spec.insertion_dates(args, lo, hi) {
                        out.extend(dates);
                    }
                }
                for arg in args {
                    self.expr_insertion_dates(arg, from, to, visiting, out);
                }
            }
            _ => {}
        }
    }

    /// Full revision history: ground logs directly, formulas re-evaluated at
    /// each true insertion date through `reader`.
    pub fn history_with_reader(
        &self,
        name: &str,
        from: Option<Stamp>,
        to: Option<Stamp>,
        reader: &dyn SeriesReader,
    ) -> StorageResult<BTreeMap<Stamp, Curve>> {
        if let Some(log) = self.inner.read().ground.get(name) {
            return Ok(log.range(from, to));
        }
        if self.kind(name) != Some(SeriesKind::Formula) {
            return Err(StorageError::SeriesNotFound(name.to_string()));
        }
        let mut out = BTreeMap::new();
        for idate in self.insertion_dates(name, from, to)? {
            let curve = self.get_with_reader(name, &GetArgs::at_revision(idate), reader)?;
            if !curve.is_empty() {
                out.insert(idate, curve);
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // cache namespace

    pub fn cache_exists(&self, name: &str) -> bool {
        self.inner.read().cache.contains_key(name)
    }

    /// Materialize one cache revision (patched over the previous entry, same
    /// semantics as the primary namespace).
    pub fn cache_update(&self, name: &str, insertion_date: Stamp, curve: Curve) {
        debug!("cache write {name} @ {insertion_date}");
        self.inner
            .write()
            .cache
            .entry(name.to_string())
            .or_default()
            .update(insertion_date, curve);
    }

    pub fn cache_get(&self, name: &str, args: &GetArgs) -> Option<Curve> {
        let inner = self.inner.read();
        let log = inner.cache.get(name)?;
        Some(
            log.get_at(args.revision_date)
                .map(|(_, c)| c.window(args.from_value_date, args.to_value_date))
                .unwrap_or_default(),
        )
    }

    pub fn cache_insertion_dates(
        &self,
        name: &str,
        from: Option<Stamp>,
        to: Option<Stamp>,
    ) -> Vec<Stamp> {
        self.inner
            .read()
            .cache
            .get(name)
            .map(|log| log.insertion_dates(from, to))
            .unwrap_or_default()
    }

    pub fn cache_last_insertion_date(&self, name: &str) -> Option<Stamp> {
        self.inner
            .read()
            .cache
            .get(name)
            .and_then(|log| log.last_insertion_date())
    }

    pub fn cache_history(
        &self,
        name: &str,
        from: Option<Stamp>,
        to: Option<Stamp>,
    ) -> BTreeMap<Stamp, Curve> {
        self.inner
            .read()
            .cache
            .get(name)
            .map(|log| log.range(from, to))
            .unwrap_or_default()
    }

    /// Full purge of a series' materialized history.
    pub fn cache_delete(&self, name: &str) {
        if self.inner.write().cache.remove(name).is_some() {
            info!("purged cache of {name}");
        }
    }
}

/// Base reads: formulas are always evaluated, caches ignored.
impl SeriesReader for SeriesStore {
    fn get(&self, name: &str, args: &GetArgs) -> StorageResult<Curve> {
        self.get_with_reader(name, args, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn store_with_ground(name: &str) -> SeriesStore {
        let store = SeriesStore::with_builtins();
        store
            .update(
                name,
                Curve::from_pairs([(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(), 1.0)]),
                Utc.with_ymd_and_hms(2022, 1, 1, 12, 0, 0).unwrap(),
            )
            .unwrap();
        store
    }

    #[test]
    fn self_referential_formulas_are_rejected() {
        let store = SeriesStore::with_builtins();
        let err = store
            .register_formula("selfy", "(+ 1 (series \"selfy\"))")
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidOperation(_)));
        assert_eq!(store.kind("selfy"), None);
    }

    #[test]
    fn redefinition_closing_a_cycle_is_rejected() {
        let store = store_with_ground("ground-0");
        store
            .register_formula("leaf", "(series \"ground-0\")")
            .unwrap();
        store
            .register_formula("wrap", "(* 2 (series \"leaf\"))")
            .unwrap();
        // redefining the leaf on top of its own dependent closes a cycle
        let err = store
            .register_formula("leaf", "(series \"wrap\")")
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidOperation(_)));
        // the previous definition is untouched
        assert_eq!(
            store.formula_definition("leaf").as_deref(),
            Some("(series \"ground-0\")")
        );
    }

    #[test]
    fn unknown_references_are_rejected() {
        let store = SeriesStore::with_builtins();
        let err = store
            .register_formula("orphan", "(series \"nowhere\")")
            .unwrap_err();
        assert!(matches!(err, StorageError::SeriesNotFound(n) if n == "nowhere"));
    }
}
