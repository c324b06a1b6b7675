// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Frequency reduction
//!
//! Collapses a cron-generated candidate sequence down to the candidates that
//! actually observe new upstream data, so a fine schedule over a coarse
//! upstream does not materialize duplicate revisions.

use crate::series::Stamp;

/// Greedy bucketing over two ascending sequences: emit a candidate whenever
/// at least one remaining insertion date is `<=` it, consuming every
/// insertion date it covers. Candidates covering no new data are dropped.
pub fn reduce_frequency(candidates: &[Stamp], idates: &[Stamp]) -> Vec<Stamp> {
    let mut reduced = Vec::new();
    let mut remaining = idates;
    for candidate in candidates {
        let covered = remaining.partition_point(|idate| idate <= candidate);
        if covered > 0 {
            reduced.push(*candidate);
            remaining = &remaining[covered..];
        }
    }
    reduced
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(d: u32, h: u32) -> Stamp {
        Utc.with_ymd_and_hms(2022, 1, d, h, 0, 0).unwrap()
    }

    #[test]
    fn one_cutoff_per_nonempty_bucket() {
        // 5 daily candidates, idates at d2.5, d4.33, d4.66, d5
        let candidates = vec![at(1, 0), at(2, 0), at(3, 0), at(4, 0), at(5, 0)];
        let idates = vec![at(2, 12), at(4, 8), at(4, 16), at(5, 0)];
        assert_eq!(reduce_frequency(&candidates, &idates), vec![at(3, 0), at(5, 0)]);
    }

    #[test]
    fn aligned_sequences_keep_every_candidate() {
        let days: Vec<Stamp> = (1..=5).map(|d| at(d, 0)).collect();
        assert_eq!(reduce_frequency(&days, &days), days);
    }

    #[test]
    fn exhausted_idates_skip_the_tail() {
        let candidates = vec![at(1, 0), at(2, 0), at(3, 0), at(4, 0)];
        let idates = vec![at(1, 0)];
        assert_eq!(reduce_frequency(&candidates, &idates), vec![at(1, 0)]);
    }

    #[test]
    fn early_idate_is_captured_by_first_covering_candidate() {
        let candidates = vec![at(3, 0), at(4, 0)];
        let idates = vec![at(1, 0)];
        assert_eq!(reduce_frequency(&candidates, &idates), vec![at(3, 0)]);
    }

    #[test]
    fn no_idates_means_no_candidates() {
        let candidates = vec![at(1, 0), at(2, 0)];
        assert_eq!(reduce_frequency(&candidates, &[]), Vec::<Stamp>::new());
    }
}
