// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Revision log - the insertion-date axis of one series
//!
//! Updates are patched over the previous revision, so each stored revision is
//! the full accumulated curve as of its insertion date and reads never need
//! reconstruction.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::series::{Curve, Stamp};

/// The ordered set of revisions of a single series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevisionLog {
    revisions: BTreeMap<Stamp, Curve>,
}

impl RevisionLog {
    pub fn new() -> Self {
        Self {
            revisions: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Insert a revision, patching `curve` over the latest revision strictly
    /// before `insertion_date`.
    pub fn update(&mut self, insertion_date: Stamp, curve: Curve) {
        let accumulated = match self.latest_before(insertion_date) {
            Some((_, prev)) => prev.patch(&curve),
            None => curve,
        };
        self.revisions.insert(insertion_date, accumulated);
    }

    /// Latest revision with insertion date strictly before `at`.
    fn latest_before(&self, at: Stamp) -> Option<(Stamp, &Curve)> {
        self.revisions
            .range((Bound::Unbounded, Bound::Excluded(at)))
            .next_back()
            .map(|(d, c)| (*d, c))
    }

    /// Latest revision with insertion date `<= at` (or the overall latest
    /// when `at` is `None`).
    pub fn get_at(&self, at: Option<Stamp>) -> Option<(Stamp, &Curve)> {
        match at {
            Some(rev) => self
                .revisions
                .range((Bound::Unbounded, Bound::Included(rev)))
                .next_back()
                .map(|(d, c)| (*d, c)),
            None => self.revisions.iter().next_back().map(|(d, c)| (*d, c)),
        }
    }

    pub fn last_insertion_date(&self) -> Option<Stamp> {
        self.revisions.keys().next_back().copied()
    }

    /// Ascending insertion dates within the inclusive `[from, to]` range.
    pub fn insertion_dates(&self, from: Option<Stamp>, to: Option<Stamp>) -> Vec<Stamp> {
        let lo = from.map_or(Bound::Unbounded, Bound::Included);
        let hi = to.map_or(Bound::Unbounded, Bound::Included);
        self.revisions.range((lo, hi)).map(|(d, _)| *d).collect()
    }

    /// Revisions within the inclusive insertion-date range.
    pub fn range(
        &self,
        from: Option<Stamp>,
        to: Option<Stamp>,
    ) -> BTreeMap<Stamp, Curve> {
        let lo = from.map_or(Bound::Unbounded, Bound::Included);
        let hi = to.map_or(Bound::Unbounded, Bound::Included);
        self.revisions
            .range((lo, hi))
            .map(|(d, c)| (*d, c.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn day(d: u32) -> Stamp {
        Utc.with_ymd_and_hms(2022, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn updates_accumulate() {
        let mut log = RevisionLog::new();
        log.update(day(1), Curve::from_pairs([(day(1), 1.0), (day(2), 2.0)]));
        log.update(day(2), Curve::from_pairs([(day(2), 1.0), (day(3), 2.0)]));

        let (rev, curve) = log.get_at(Some(day(2))).unwrap();
        assert_eq!(rev, day(2));
        assert_eq!(curve.len(), 3);
        assert_eq!(curve.get(&day(1)), Some(1.0));
        assert_eq!(curve.get(&day(2)), Some(1.0));
        assert_eq!(curve.get(&day(3)), Some(2.0));

        // as-of reads see the older revision untouched
        let (_, old) = log.get_at(Some(day(1))).unwrap();
        assert_eq!(old.get(&day(2)), Some(2.0));
    }

    #[test]
    fn get_at_before_first_revision_is_none() {
        let mut log = RevisionLog::new();
        log.update(day(5), Curve::from_pairs([(day(5), 1.0)]));
        assert!(log.get_at(Some(day(4))).is_none());
        assert!(log.get_at(None).is_some());
    }

    #[test]
    fn insertion_dates_ranges() {
        let mut log = RevisionLog::new();
        for d in 1..=5 {
            log.update(day(d), Curve::from_pairs([(day(d), d as f64)]));
        }
        assert_eq!(log.insertion_dates(None, None).len(), 5);
        assert_eq!(
            log.insertion_dates(Some(day(2)), Some(day(4))),
            vec![day(2), day(3), day(4)]
        );
    }
}
