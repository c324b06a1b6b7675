// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Five-field cron rules
//!
//! Cache policies carry two cron rules: `revdate_rule` selects candidate
//! revision boundaries, `schedule_rule` is stored for the external scheduler.
//! The engine only needs validation and ascending candidate generation over a
//! closed range, so that is all this module implements.
//!
//! Supported grammar per field: `*`, `*/step`, `a`, `a-b`, `a-b/step` and
//! comma lists thereof. Fields are `minute hour day-of-month month
//! day-of-week` with day-of-week 0-7 (0 and 7 both Sunday).

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::series::Stamp;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CronError {
    #[error("Invalid cron rule {rule:?}: {detail}")]
    Invalid { rule: String, detail: String },
}

pub type CronResult<T> = Result<T, CronError>;

/// One parsed field: the set of accepted values, or "unrestricted".
#[derive(Debug, Clone, PartialEq)]
enum Field {
    Any,
    Values(BTreeSet<u32>),
}

impl Field {
    fn matches(&self, v: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Values(set) => set.contains(&v),
        }
    }

    fn is_restricted(&self) -> bool {
        matches!(self, Field::Values(_))
    }

    /// Concrete ascending values within the field's domain.
    fn iter(&self, lo: u32, hi: u32) -> Vec<u32> {
        match self {
            Field::Any => (lo..=hi).collect(),
            Field::Values(set) => set.iter().copied().collect(),
        }
    }
}

/// A parsed five-field cron rule.
#[derive(Debug, Clone, PartialEq)]
pub struct CronRule {
    source: String,
    minute: Field,
    hour: Field,
    dom: Field,
    month: Field,
    dow: Field,
}

impl CronRule {
    /// Parse and validate a rule.
    pub fn parse(rule: &str) -> CronResult<CronRule> {
        let fields: Vec<&str> = rule.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::Invalid {
                rule: rule.to_string(),
                detail: format!("expected 5 fields, got {}", fields.len()),
            });
        }
        let bounds = [(0u32, 59u32), (0, 23), (1, 31), (1, 12), (0, 7)];
        let mut parsed = Vec::with_capacity(5);
        for (text, (lo, hi)) in fields.iter().zip(bounds) {
            parsed.push(parse_field(text, lo, hi).map_err(|detail| CronError::Invalid {
                rule: rule.to_string(),
                detail,
            })?);
        }
        let mut it = parsed.into_iter();
        let minute = it.next().unwrap();
        let hour = it.next().unwrap();
        let dom = it.next().unwrap();
        let month = it.next().unwrap();
        let mut dow = it.next().unwrap();
        // fold 7 into 0 so both spellings of Sunday behave the same
        if let Field::Values(ref mut set) = dow {
            if set.remove(&7) {
                set.insert(0);
            }
        }
        Ok(CronRule {
            source: rule.to_string(),
            minute,
            hour,
            dom,
            month,
            dow,
        })
    }

    /// Whether `rule` parses.
    pub fn is_valid(rule: &str) -> bool {
        CronRule::parse(rule).is_ok()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the rule fires at `t` (minute precision).
    pub fn matches(&self, t: Stamp) -> bool {
        if !self.minute.matches(t.minute()) || !self.hour.matches(t.hour()) {
            return false;
        }
        if !self.month.matches(t.month()) {
            return false;
        }
        self.matches_day(t)
    }

    // Standard cron semantics: when both day fields are restricted, either
    // may match; otherwise the restricted one decides.
    fn matches_day(&self, t: Stamp) -> bool {
        let dom_ok = self.dom.matches(t.day());
        let dow_ok = self.dow.matches(t.weekday().num_days_from_sunday());
        match (self.dom.is_restricted(), self.dow.is_restricted()) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }

    /// Ascending firing times within the inclusive `[from, to]` range.
    pub fn range(&self, from: Stamp, to: Stamp) -> Vec<Stamp> {
        let mut out = Vec::new();
        if from > to {
            return out;
        }
        // walk day by day, then the explicit hour/minute sets within the day
        let mut day = from.date_naive();
        let last_day = to.date_naive();
        while day <= last_day {
            let midnight = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap());
            if self.month.matches(midnight.month()) && self.matches_day(midnight) {
                for h in self.hour.iter(0, 23) {
                    for m in self.minute.iter(0, 59) {
                        let t = midnight + Duration::minutes((h * 60 + m) as i64);
                        if t >= from && t <= to {
                            out.push(t);
                        }
                    }
                }
            }
            day = day.succ_opt().expect("date overflow");
        }
        out
    }
}

fn parse_field(text: &str, lo: u32, hi: u32) -> Result<Field, String> {
    if text == "*" {
        return Ok(Field::Any);
    }
    let mut values = BTreeSet::new();
    for part in text.split(',') {
        let (range_text, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| format!("bad step in {part:?}"))?;
                if step == 0 {
                    return Err(format!("zero step in {part:?}"));
                }
                (r, step)
            }
            None => (part, 1),
        };
        let (start, end) = if range_text == "*" {
            (lo, hi)
        } else if let Some((a, b)) = range_text.split_once('-') {
            (
                parse_value(a, lo, hi)?,
                parse_value(b, lo, hi)?,
            )
        } else {
            let v = parse_value(range_text, lo, hi)?;
            (v, v)
        };
        if start > end {
            return Err(format!("inverted range in {part:?}"));
        }
        let mut v = start;
        while v <= end {
            values.insert(v);
            v += step;
        }
    }
    if values.is_empty() {
        return Err(format!("empty field {text:?}"));
    }
    Ok(Field::Values(values))
}

fn parse_value(text: &str, lo: u32, hi: u32) -> Result<u32, String> {
    let v: u32 = text
        .parse()
        .map_err(|_| format!("not a number: {text:?}"))?;
    if v < lo || v > hi {
        return Err(format!("{v} out of range {lo}-{hi}"));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, d, h, m, 0).unwrap()
    }

    #[test]
    fn validates_rules() {
        assert!(CronRule::is_valid("0 0 * * *"));
        assert!(CronRule::is_valid("0 1 * * *"));
        assert!(CronRule::is_valid("0 8-18 * * *"));
        assert!(CronRule::is_valid("*/15 0 1,15 * 1-5"));
        assert!(!CronRule::is_valid("not a cron rule"));
        assert!(!CronRule::is_valid("you guessed it right"));
        assert!(!CronRule::is_valid("61 0 * * *"));
        assert!(!CronRule::is_valid("0 0 * *"));
    }

    #[test]
    fn daily_range_is_inclusive() {
        let rule = CronRule::parse("0 0 * * *").unwrap();
        let fires = rule.range(at(1, 0, 0), at(5, 0, 0));
        assert_eq!(
            fires,
            vec![at(1, 0, 0), at(2, 0, 0), at(3, 0, 0), at(4, 0, 0), at(5, 0, 0)]
        );
    }

    #[test]
    fn offset_start_skips_past_fires() {
        let rule = CronRule::parse("0 1 * * *").unwrap();
        let fires = rule.range(at(1, 2, 0), at(3, 23, 0));
        assert_eq!(fires, vec![at(2, 1, 0), at(3, 1, 0)]);
    }

    #[test]
    fn hour_span_fires_each_hour() {
        let rule = CronRule::parse("0 8-10 * * *").unwrap();
        let fires = rule.range(at(1, 0, 0), at(1, 23, 0));
        assert_eq!(fires, vec![at(1, 8, 0), at(1, 9, 0), at(1, 10, 0)]);
    }

    #[test]
    fn sunday_aliases() {
        let a = CronRule::parse("0 0 * * 0").unwrap();
        let b = CronRule::parse("0 0 * * 7").unwrap();
        // 2022-01-02 was a Sunday
        assert!(a.matches(at(2, 0, 0)));
        assert!(b.matches(at(2, 0, 0)));
        assert!(!a.matches(at(3, 0, 0)));
    }
}
