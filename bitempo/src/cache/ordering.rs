// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Dependency ordering for batch refresh
//!
//! Linearizes a batch of series so that every series is emitted before the
//! series it depends on (the "top" of each sub-tree first), ties broken
//! lexicographically. Kahn's algorithm over the dependents relation
//! restricted to the batch; registration rejects reference cycles, so a
//! residual cycle only means foreign data and is drained deterministically.

use std::collections::{BTreeMap, BTreeSet};

use crate::storage::SeriesStore;

/// Sort a batch in place into refresh order. A series becomes eligible once
/// every in-batch series depending on it has been emitted.
pub fn sort_for_refresh(store: &SeriesStore, names: &mut [String]) {
    let batch: BTreeSet<String> = names.iter().cloned().collect();
    let mut blocked: BTreeMap<String, BTreeSet<String>> = batch
        .iter()
        .map(|name| {
            let in_batch: BTreeSet<String> = store
                .dependents(name)
                .into_iter()
                .filter(|dep| batch.contains(dep))
                .collect();
            (name.clone(), in_batch)
        })
        .collect();

    let mut order = Vec::with_capacity(names.len());
    while !blocked.is_empty() {
        let next = blocked
            .iter()
            .find(|(_, deps)| deps.is_empty())
            .map(|(name, _)| name.clone());
        match next {
            Some(name) => {
                blocked.remove(&name);
                for deps in blocked.values_mut() {
                    deps.remove(&name);
                }
                order.push(name);
            }
            None => {
                order.extend(blocked.keys().cloned());
                blocked.clear();
            }
        }
    }
    for (slot, name) in names.iter_mut().zip(order) {
        *slot = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Curve;
    use chrono::{TimeZone, Utc};

    fn ingest_ground(store: &SeriesStore, name: &str) {
        store
            .update(
                name,
                Curve::from_pairs([(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(), 1.0)]),
                Utc.with_ymd_and_hms(2022, 1, 1, 12, 0, 0).unwrap(),
            )
            .unwrap();
    }

    fn chain_store() -> SeriesStore {
        let store = SeriesStore::with_builtins();
        ingest_ground(&store, "ground-0");
        store
            .register_formula("dep-bottom", "(series \"ground-0\")")
            .unwrap();
        store
            .register_formula("dep-middle", "(* 2 (series \"dep-bottom\"))")
            .unwrap();
        store
            .register_formula("dep-top", "(* 2 (series \"dep-middle\"))")
            .unwrap();
        store
    }

    #[test]
    fn batch_sorts_tops_first() {
        let store = chain_store();
        let mut names = vec![
            "dep-bottom".to_string(),
            "dep-top".to_string(),
            "dep-middle".to_string(),
        ];
        sort_for_refresh(&store, &mut names);
        assert_eq!(names, vec!["dep-top", "dep-middle", "dep-bottom"]);
    }

    #[test]
    fn unrelated_branches_never_split_a_dependency_pair() {
        let store = SeriesStore::with_builtins();
        ingest_ground(&store, "ground-0");
        ingest_ground(&store, "ground-1");
        // a dependency pair whose names straddle an unrelated series, every
        // member having dependents of its own
        store
            .register_formula("anchor", "(series \"ground-0\")")
            .unwrap();
        store
            .register_formula("zenith", "(* 2 (series \"anchor\"))")
            .unwrap();
        store
            .register_formula("crown", "(* 2 (series \"zenith\"))")
            .unwrap();
        store
            .register_formula("midway", "(series \"ground-1\")")
            .unwrap();
        store
            .register_formula("wrap", "(* 2 (series \"midway\"))")
            .unwrap();

        let mut names = vec![
            "anchor".to_string(),
            "midway".to_string(),
            "zenith".to_string(),
        ];
        sort_for_refresh(&store, &mut names);
        assert_eq!(names, vec!["midway", "zenith", "anchor"]);
    }
}
