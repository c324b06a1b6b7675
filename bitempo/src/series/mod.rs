// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Value curves - the value-date axis of a bitemporal series
//!
//! A [`Curve`] is an ordered map from value dates to float values. One
//! immutable revision of a series holds exactly one curve; the insertion-date
//! axis is managed by the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;

/// A point-in-time stamp on either bitemporal axis.
pub type Stamp = DateTime<Utc>;

/// An ordered value-date -> value map, the payload of one series revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    points: BTreeMap<Stamp, f64>,
}

impl Curve {
    pub fn new() -> Self {
        Self {
            points: BTreeMap::new(),
        }
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Stamp, f64)>,
    {
        Self {
            points: pairs.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn insert(&mut self, value_date: Stamp, value: f64) {
        self.points.insert(value_date, value);
    }

    pub fn get(&self, value_date: &Stamp) -> Option<f64> {
        self.points.get(value_date).copied()
    }

    pub fn first_date(&self) -> Option<Stamp> {
        self.points.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<Stamp> {
        self.points.keys().next_back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Stamp, &f64)> {
        self.points.iter()
    }

    /// Restrict the curve to the inclusive `[from, to]` value-date window.
    /// `None` bounds are open.
    pub fn window(&self, from: Option<Stamp>, to: Option<Stamp>) -> Curve {
        let lo = match from {
            Some(d) => Bound::Included(d),
            None => Bound::Unbounded,
        };
        let hi = match to {
            Some(d) => Bound::Included(d),
            None => Bound::Unbounded,
        };
        Curve {
            points: self
                .points
                .range((lo, hi))
                .map(|(d, v)| (*d, *v))
                .collect(),
        }
    }

    /// Overlay `other` on top of `self`: on overlapping value dates the
    /// value from `other` wins. This is the live-patch composition primitive.
    pub fn patch(&self, other: &Curve) -> Curve {
        let mut points = self.points.clone();
        for (d, v) in &other.points {
            points.insert(*d, *v);
        }
        Curve { points }
    }

    /// Apply a scalar function to every value.
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Curve {
        Curve {
            points: self.points.iter().map(|(d, v)| (*d, f(*v))).collect(),
        }
    }

    /// Pointwise sum over the value dates present in every input curve.
    /// Dates missing from any input are dropped, not filled.
    pub fn sum(curves: &[Curve]) -> Curve {
        let mut out = Curve::new();
        let first = match curves.first() {
            Some(c) => c,
            None => return out,
        };
        'dates: for (d, v) in first.iter() {
            let mut total = *v;
            for other in &curves[1..] {
                match other.get(d) {
                    Some(ov) => total += ov,
                    None => continue 'dates,
                }
            }
            out.insert(*d, total);
        }
        out
    }
}

impl FromIterator<(Stamp, f64)> for Curve {
    fn from_iter<I: IntoIterator<Item = (Stamp, f64)>>(iter: I) -> Self {
        Curve::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> Stamp {
        Utc.with_ymd_and_hms(2022, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn window_is_inclusive() {
        let c = Curve::from_pairs((1..=5).map(|d| (day(d), d as f64)));
        let w = c.window(Some(day(2)), Some(day(4)));
        assert_eq!(w.len(), 3);
        assert_eq!(w.first_date(), Some(day(2)));
        assert_eq!(w.last_date(), Some(day(4)));
    }

    #[test]
    fn patch_later_wins() {
        let base = Curve::from_pairs([(day(1), 1.0), (day(2), 2.0), (day(3), 3.0)]);
        let live = Curve::from_pairs([(day(3), 30.0), (day(4), 40.0)]);
        let patched = base.patch(&live);
        assert_eq!(patched.len(), 4);
        assert_eq!(patched.get(&day(3)), Some(30.0));
        assert_eq!(patched.get(&day(4)), Some(40.0));
        assert_eq!(patched.get(&day(1)), Some(1.0));
    }

    #[test]
    fn sum_intersects_value_dates() {
        let a = Curve::from_pairs([(day(1), 1.0), (day(2), 2.0)]);
        let b = Curve::from_pairs([(day(2), 10.0), (day(3), 20.0)]);
        let s = Curve::sum(&[a, b]);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(&day(2)), Some(12.0));
    }
}
