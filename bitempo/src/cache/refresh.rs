// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! The refresh engine
//!
//! Orchestrates policy CRUD with validation, per-series incremental refresh
//! (cron candidates reduced against true upstream insertion dates), spot
//! refresh, cascading invalidation and policy-level batch refresh with
//! partial-failure reporting.

use chrono::Utc;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::error::{CacheError, CacheResult};
use super::frequency::reduce_frequency;
use super::ordering::sort_for_refresh;
use super::policy::CachePolicy;
use super::read::CachedReader;
use super::store::PolicyStore;
use crate::cron::CronRule;
use crate::formula::Expr;
use crate::moment::eval_moment;
use crate::series::Stamp;
use crate::storage::{GetArgs, SeriesKind, SeriesStore};

/// Policy management and cache materialization over a series store.
pub struct RefreshEngine {
    store: Arc<SeriesStore>,
    policies: Arc<dyn PolicyStore>,
}

impl RefreshEngine {
    pub fn new(store: Arc<SeriesStore>, policies: Arc<dyn PolicyStore>) -> Self {
        Self { store, policies }
    }

    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    pub fn policies(&self) -> &Arc<dyn PolicyStore> {
        &self.policies
    }

    /// A cache-aware reader sharing this engine's stores.
    pub fn reader(&self) -> CachedReader {
        CachedReader::new(self.store.clone(), self.policies.clone())
    }

    // ------------------------------------------------------------------
    // policy CRUD

    /// Validate then create. All invalid fields are reported together.
    pub fn new_policy(&self, policy: CachePolicy) -> CacheResult<()> {
        let bad = policy.validate();
        if !bad.is_empty() {
            return Err(CacheError::InvalidPolicy { fields: bad });
        }
        self.policies.create_policy(&policy)
    }

    /// Validate then edit. Existing caches are kept; the next batch refresh
    /// picks up the new rules.
    pub fn edit_policy(&self, policy: CachePolicy) -> CacheResult<()> {
        let bad = policy.validate();
        if !bad.is_empty() {
            return Err(CacheError::InvalidPolicy { fields: bad });
        }
        self.policies.edit_policy(&policy)
    }

    /// Delete the policy, its links, and every linked series' cache.
    pub fn delete_policy(&self, name: &str) -> CacheResult<()> {
        let unlinked = self.policies.delete_policy(name)?;
        for series in unlinked {
            self.store.cache_delete(&series);
        }
        Ok(())
    }

    /// Map a formula to a policy.
    pub fn set_policy(&self, policy: &str, series: &str) -> CacheResult<()> {
        if self.store.kind(series) != Some(SeriesKind::Formula) {
            return Err(CacheError::NotAFormula(series.to_string()));
        }
        self.policies.link_series(policy, series)
    }

    /// Unmap a series from its policy and purge its cache.
    pub fn unset_policy(&self, series: &str) -> CacheResult<()> {
        self.policies.unlink_series(series)?;
        self.store.cache_delete(series);
        Ok(())
    }

    /// Serving readiness: `None` for an unmapped series, `Some(true)` when
    /// its cache exists and no refresh is in flight.
    pub fn ready(&self, series: &str) -> CacheResult<Option<bool>> {
        Ok(self
            .policies
            .link(series)?
            .map(|link| link.ready && self.store.cache_exists(series)))
    }

    /// Formulas eligible for caching; with `unlinked` only those not yet
    /// mapped to any policy.
    pub fn cacheable_formulas(&self, unlinked: bool) -> CacheResult<Vec<String>> {
        let mut names = Vec::new();
        for name in self.store.formula_names() {
            if !unlinked || self.policies.link(&name)?.is_none() {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Full purge of one series' materialized history.
    pub fn invalidate(&self, series: &str) {
        self.store.cache_delete(series);
    }

    // ------------------------------------------------------------------
    // per-series refresh

    /// Incrementally materialize `name` up to `final_revdate` (default now).
    /// A refresh already in flight turns this into a logged no-op.
    pub fn refresh_series(
        &self,
        name: &str,
        final_revdate: Option<Stamp>,
    ) -> CacheResult<()> {
        let policy = self
            .policies
            .policy_for_series(name)?
            .ok_or_else(|| CacheError::NoPolicy(name.to_string()))?;
        if self.store.kind(name) != Some(SeriesKind::Formula) {
            return Err(CacheError::NotAFormula(name.to_string()));
        }
        if !self.policies.try_acquire_series(name)? {
            info!("refresh of {name} skipped: already in flight");
            return Ok(());
        }
        let result = self.refresh_series_locked(name, &policy, final_revdate);
        // the advisory lock is released on every path; a stuck flag would
        // strand the series off-cache for good
        self.policies.release_series(name)?;
        result
    }

    fn refresh_series_locked(
        &self,
        name: &str,
        policy: &CachePolicy,
        final_revdate: Option<Stamp>,
    ) -> CacheResult<()> {
        let final_revdate = final_revdate.unwrap_or_else(Utc::now);
        let reader = self.reader();
        let anchor = eval_moment(&policy.initial_revdate, final_revdate)?;
        let tip = self.store.cache_last_insertion_date(name);
        let had_cache = tip.is_some();
        let mut cold_start = false;

        let initial_revdate = match tip {
            // resume from the cache tip, unless the policy anchor moved past
            // it (manual edits, discontinued upstream)
            Some(tip) => tip.max(anchor),
            None => {
                // cold start: snapshot the full horizon, no value-date window
                let snapshot = self.store.get_with_reader(
                    name,
                    &GetArgs::at_revision(anchor),
                    &reader,
                )?;
                if snapshot.is_empty() {
                    debug!("{name}: nothing to snapshot at {anchor}");
                } else {
                    self.store.cache_update(name, anchor, snapshot);
                    cold_start = true;
                }
                anchor
            }
        };

        if initial_revdate > final_revdate {
            debug!("{name}: initial revdate past {final_revdate}, nothing to do");
            return Ok(());
        }

        let expr = self
            .store
            .formula_expr(name)
            .ok_or_else(|| CacheError::NotAFormula(name.to_string()))?;
        let rule = CronRule::parse(&policy.revdate_rule)?;
        let candidates = rule.range(initial_revdate, final_revdate);

        let selected = if expr.is_live(self.store.registry()) {
            // an always-live construct observes new data at every firing
            debug!("{name}: live formula, skipping frequency reduction");
            candidates
        } else {
            let idates = self.upstream_idates(name, &expr, initial_revdate, final_revdate);
            if idates.is_empty() {
                debug!("{name}: no upstream cadence, keeping the schedule as-is");
                candidates
            } else {
                let idates: Vec<Stamp> = idates.into_iter().collect();
                reduce_frequency(&candidates, &idates)
            }
        };
        if selected.is_empty() {
            debug!("{name}: empty refresh window up to {final_revdate}");
        }

        let mut first = true;
        for revdate in selected {
            let skip = (had_cache && revdate == initial_revdate) || (cold_start && first);
            first = false;
            if skip {
                continue;
            }
            let from = eval_moment(&policy.look_before, revdate)?;
            let to = eval_moment(&policy.look_after, revdate)?;
            let curve = self.store.get_with_reader(
                name,
                &GetArgs::windowed(Some(revdate), Some(from), Some(to)),
                &reader,
            )?;
            if curve.is_empty() {
                debug!("{name}: empty evaluation at {revdate}, skipped");
            } else {
                self.store.cache_update(name, revdate, curve);
            }
        }
        Ok(())
    }

    /// Upstream insertion dates in `[from, to]`, stopping at any referenced
    /// series with a servable cache (the layering mechanism: a cache of a
    /// cache refreshes against the cached dates, not the full tree).
    fn upstream_idates(
        &self,
        name: &str,
        expr: &Expr,
        from: Stamp,
        to: Stamp,
    ) -> BTreeSet<Stamp> {
        let reader = self.reader();
        let mut visiting = BTreeSet::new();
        visiting.insert(name.to_string());
        let mut out = BTreeSet::new();
        self.walk_idates(expr, from, to, &reader, &mut visiting, &mut out);
        out
    }

    fn walk_idates(
        &self,
        expr: &Expr,
        from: Stamp,
        to: Stamp,
        reader: &CachedReader,
        visiting: &mut BTreeSet<String>,
        out: &mut BTreeSet<Stamp>,
    ) {
        match expr {
            Expr::Series(child) => {
                if reader.servable(child) {
                    out.extend(self.store.cache_insertion_dates(
                        child,
                        Some(from),
                        Some(to),
                    ));
                } else if self.store.kind(child) == Some(SeriesKind::Formula) {
                    if visiting.insert(child.clone()) {
                        if let Some(child_expr) = self.store.formula_expr(child) {
                            self.walk_idates(&child_expr, from, to, reader, visiting, out);
                        }
                        visiting.remove(child);
                    }
                } else if let Ok(dates) =
                    self.store.insertion_dates(child, Some(from), Some(to))
                {
                    out.extend(dates);
                }
            }
            Expr::Call { op, args } => {
                if let Some(spec) = self.store.registry().get(op) {
                    if let Some(dates) = spec.insertion_dates(args, from, to) {
                        out.extend(dates);
                    }
                }
                for arg in args {
                    self.walk_idates(arg, from, to, reader, visiting, out);
                }
            }
            Expr::Number(_) | Expr::Str(_) => {}
        }
    }

    // ------------------------------------------------------------------
    // spot refresh

    /// Refresh the cache tip immediately, outside the cron schedule. A
    /// series with no cache yet is a logged no-op.
    pub fn refresh_now(&self, name: &str) -> CacheResult<()> {
        if !self.store.cache_exists(name) {
            warn!("spot refresh of {name} skipped: no cache yet");
            return Ok(());
        }
        let policy = self
            .policies
            .policy_for_series(name)?
            .ok_or_else(|| CacheError::NoPolicy(name.to_string()))?;
        if !self.policies.try_acquire_series(name)? {
            info!("spot refresh of {name} skipped: already in flight");
            return Ok(());
        }
        let result = (|| {
            let now = Utc::now();
            let from = eval_moment(&policy.look_before, now)?;
            let to = eval_moment(&policy.look_after, now)?;
            let reader = self.reader();
            let curve = self.store.get_with_reader(
                name,
                &GetArgs::windowed(None, Some(from), Some(to)),
                &reader,
            )?;
            if !curve.is_empty() {
                // always a fresh insertion date; the existing tip stays
                // immutable for readers that already observed it
                self.store.cache_update(name, now, curve);
            }
            Ok(())
        })();
        self.policies.release_series(name)?;
        result
    }

    // ------------------------------------------------------------------
    // policy-level batch refresh

    /// Refresh every series of a policy: the already-cached partition first
    /// (with definition-edit detection), then the bootstrap partition, each
    /// in dependency order. Per-series failures are collected, the policy is
    /// marked ready regardless, and a single aggregate error names every
    /// failed series.
    pub fn refresh_policy(
        &self,
        policy_name: &str,
        initial: bool,
        final_revdate: Option<Stamp>,
    ) -> CacheResult<()> {
        if self.policies.policy(policy_name)?.is_none() {
            return Err(CacheError::PolicyNotFound(policy_name.to_string()));
        }
        if !initial && self.policies.policy_ready(policy_name)? != Some(true) {
            info!("policy {policy_name} not bootstrapped yet, incremental refresh skipped");
            return Ok(());
        }

        let names = self.policies.series_for_policy(policy_name)?;
        for name in &names {
            // a definition edited under an existing cache, or purged by a
            // dependency edit, must be re-anchored before refreshing
            if self.store.live_content_hash(name) != self.store.content_hash(name) {
                info!("definition of {name} changed under its cache, purging");
                self.store.cache_delete(name);
                self.store.refresh_content_hash(name);
            }
        }
        let (mut cached, mut uncached): (Vec<String>, Vec<String>) = names
            .into_iter()
            .partition(|n| self.store.cache_exists(n));
        sort_for_refresh(&self.store, &mut cached);
        sort_for_refresh(&self.store, &mut uncached);
        info!(
            "refreshing policy {policy_name}: {} cached, {} to bootstrap",
            cached.len(),
            uncached.len()
        );

        let mut failed = Vec::new();
        for name in cached {
            if let Err(e) = self.refresh_series(&name, final_revdate) {
                warn!("refresh of {name} failed: {e}");
                failed.push(name);
            }
        }
        for name in uncached {
            if let Err(e) = self.refresh_series(&name, final_revdate) {
                warn!("bootstrap of {name} failed: {e}");
                failed.push(name);
            }
        }

        // working series stay servable even when siblings failed
        self.policies.set_policy_ready(policy_name, true)?;
        if failed.is_empty() {
            Ok(())
        } else {
            Err(CacheError::PartialRefresh {
                policy: policy_name.to_string(),
                names: failed,
            })
        }
    }
}
