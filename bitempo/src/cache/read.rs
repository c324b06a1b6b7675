// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Cache-aware reads
//!
//! [`CachedReader`] decorates the base [`SeriesStore`]: when a formula has a
//! servable cache it reads the materialized curve, otherwise it falls back to
//! direct evaluation - the cache is strictly a performance layer. Because the
//! decorator is itself the [`SeriesReader`] used during evaluation, expansion
//! of a formula stops at any referenced series with a servable cache.

use chrono::Utc;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::{CacheError, CacheResult};
use super::store::PolicyStore;
use crate::moment::eval_moment;
use crate::series::{Curve, Stamp};
use crate::storage::{GetArgs, SeriesKind, SeriesReader, SeriesStore, StorageError};

/// Read-side decorator over the base store.
pub struct CachedReader {
    store: Arc<SeriesStore>,
    policies: Arc<dyn PolicyStore>,
    auto_live: bool,
}

impl CachedReader {
    pub fn new(store: Arc<SeriesStore>, policies: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            policies,
            auto_live: false,
        }
    }

    /// Enable the staleness heuristic: when the lag between now and the
    /// freshest cached insertion date exceeds twice the inferred cadence,
    /// reads behave as if `live` had been requested.
    pub fn with_auto_live(mut self) -> Self {
        self.auto_live = true;
        self
    }

    /// Whether reads of `name` may be served from its cache: the cache must
    /// exist and the link must not be mid-refresh.
    pub fn servable(&self, name: &str) -> bool {
        self.store.cache_exists(name)
            && matches!(self.policies.link(name), Ok(Some(link)) if link.ready)
    }

    pub fn get(&self, name: &str, args: &GetArgs) -> CacheResult<Curve> {
        if self.store.kind(name) != Some(SeriesKind::Formula) {
            return Ok(self
                .store
                .get_with_reader(name, args, self.store.as_ref())?);
        }
        if args.nocache || !self.servable(name) {
            // no usable cache: evaluate directly. Expansion still stops at
            // other caches unless the caller asked for the unvarnished truth.
            let curve = if args.nocache || args.live {
                self.store
                    .get_with_reader(name, args, self.store.as_ref())?
            } else {
                self.store.get_with_reader(name, args, self)?
            };
            return Ok(curve);
        }

        debug!("serving {name} from cache");
        let cached = self
            .store
            .cache_get(name, args)
            .unwrap_or_default();

        let live = args.live || (self.auto_live && self.is_stale(name));
        if live && !cached.is_empty() {
            return self.patch_live(name, args, cached);
        }
        Ok(cached)
    }

    /// Compute the live tail over the policy window and merge it over the
    /// cached curve; live values win in the overlap.
    fn patch_live(&self, name: &str, args: &GetArgs, cached: Curve) -> CacheResult<Curve> {
        let policy = self
            .policies
            .policy_for_series(name)?
            .ok_or_else(|| CacheError::NoPolicy(name.to_string()))?;
        let now = args
            .revision_date
            .or_else(|| self.store.cache_last_insertion_date(name))
            .unwrap_or_else(Utc::now);
        let from_live = eval_moment(&policy.look_before, now)?;
        let mut to_live = eval_moment(&policy.look_after, now)?;
        if let Some(tvd) = args.to_value_date {
            // honor the right bound of the query for the live part
            to_live = to_live.max(tvd);
        }
        let live_args = GetArgs {
            revision_date: args.revision_date,
            from_value_date: Some(from_live),
            to_value_date: Some(to_live),
            nocache: false,
            live: true,
        };
        let livets = self
            .store
            .get_with_reader(name, &live_args, self.store.as_ref())?;
        Ok(cached
            .patch(&livets)
            .window(args.from_value_date, args.to_value_date))
    }

    pub fn insertion_dates(
        &self,
        name: &str,
        from: Option<Stamp>,
        to: Option<Stamp>,
        nocache: bool,
    ) -> CacheResult<Vec<Stamp>> {
        if self.store.kind(name) == Some(SeriesKind::Formula)
            && !nocache
            && self.servable(name)
        {
            return Ok(self.store.cache_insertion_dates(name, from, to));
        }
        Ok(self.store.insertion_dates(name, from, to)?)
    }

    pub fn history(
        &self,
        name: &str,
        from: Option<Stamp>,
        to: Option<Stamp>,
        nocache: bool,
    ) -> CacheResult<BTreeMap<Stamp, Curve>> {
        if self.store.kind(name) == Some(SeriesKind::Formula)
            && !nocache
            && self.servable(name)
        {
            return Ok(self.store.cache_history(name, from, to));
        }
        let reader: &dyn SeriesReader = if nocache { self.store.as_ref() } else { self };
        Ok(self.store.history_with_reader(name, from, to, reader)?)
    }

    // lag > ~2x the inferred cadence between cached insertion dates
    fn is_stale(&self, name: &str) -> bool {
        let idates = self.store.cache_insertion_dates(name, None, None);
        if idates.len() < 2 {
            return false;
        }
        let last = *idates.last().unwrap();
        let span = (last - idates[0]).num_seconds();
        let cadence = span / (idates.len() as i64 - 1);
        (Utc::now() - last).num_seconds() > 2 * cadence
    }
}

impl SeriesReader for CachedReader {
    fn get(&self, name: &str, args: &GetArgs) -> Result<Curve, StorageError> {
        CachedReader::get(self, name, args)
            .map_err(|e| StorageError::InvalidOperation(e.to_string()))
    }
}
