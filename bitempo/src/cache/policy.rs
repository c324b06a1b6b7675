// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Cache policy rows and field validation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cron::CronRule;
use crate::moment;

/// A named set of materialization rules shared by any number of formula
/// series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub name: String,
    /// Moment expression anchoring the first materialized revision.
    pub initial_revdate: String,
    /// Moment expression for the left value-date bound, `now` bound to the
    /// candidate revision date.
    pub look_before: String,
    /// Same for the right value-date bound.
    pub look_after: String,
    /// Cron rule selecting candidate revision boundaries.
    pub revdate_rule: String,
    /// Cron rule consumed by the external scheduler only.
    pub schedule_rule: String,
}

impl CachePolicy {
    pub fn new(
        name: impl Into<String>,
        initial_revdate: impl Into<String>,
        look_before: impl Into<String>,
        look_after: impl Into<String>,
        revdate_rule: impl Into<String>,
        schedule_rule: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            initial_revdate: initial_revdate.into(),
            look_before: look_before.into(),
            look_after: look_after.into(),
            revdate_rule: revdate_rule.into(),
            schedule_rule: schedule_rule.into(),
        }
    }

    /// Validate every field, returning the complete field -> offending value
    /// map. Policy create/edit refuse any policy with a non-empty result.
    pub fn validate(&self) -> BTreeMap<String, String> {
        validate_policy(
            &self.initial_revdate,
            &self.look_before,
            &self.look_after,
            &self.revdate_rule,
            &self.schedule_rule,
        )
    }
}

/// Check each policy field against its grammar. Moment fields are parsed and
/// evaluated against a dummy `now`; cron fields are parsed. All failures are
/// reported together, never fail-fast.
pub fn validate_policy(
    initial_revdate: &str,
    look_before: &str,
    look_after: &str,
    revdate_rule: &str,
    schedule_rule: &str,
) -> BTreeMap<String, String> {
    let mut bad = BTreeMap::new();
    for (field, value) in [
        ("initial_revdate", initial_revdate),
        ("look_before", look_before),
        ("look_after", look_after),
    ] {
        if moment::eval_moment(value, moment::dummy_now()).is_err() {
            bad.insert(field.to_string(), value.to_string());
        }
    }
    for (field, value) in [
        ("revdate_rule", revdate_rule),
        ("schedule_rule", schedule_rule),
    ] {
        if !CronRule::is_valid(value) {
            bad.insert(field.to_string(), value.to_string());
        }
    }
    bad
}
