// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Relative-date expression evaluator
//!
//! Cache policies express their revision anchor and value-date window as small
//! lisp-ish expressions evaluated against a bound `now` variable:
//!
//! - `now`
//! - `(today)`
//! - `(date "2022-1-1")`
//! - `(shifted now #:days -10)` / `(shifted (today) #:weeks 2 #:hours 6)`

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, opt, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};
use thiserror::Error;

use crate::series::Stamp;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MomentError {
    #[error("Invalid moment expression: {0}")]
    Parse(String),
}

pub type MomentResult<T> = Result<T, MomentError>;

/// Parsed moment expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum MomentExpr {
    /// The bound `now` variable.
    Now,
    /// `now` truncated to midnight.
    Today,
    /// An absolute date literal.
    Date(Stamp),
    /// A base moment shifted by a signed amount of calendar units.
    Shifted {
        base: Box<MomentExpr>,
        minutes: i64,
        hours: i64,
        days: i64,
        weeks: i64,
    },
}

impl MomentExpr {
    /// Evaluate against a concrete `now`.
    pub fn eval(&self, now: Stamp) -> Stamp {
        match self {
            MomentExpr::Now => now,
            MomentExpr::Today => {
                let midnight = now.date_naive().and_hms_opt(0, 0, 0).unwrap();
                Utc.from_utc_datetime(&midnight)
            }
            MomentExpr::Date(d) => *d,
            MomentExpr::Shifted {
                base,
                minutes,
                hours,
                days,
                weeks,
            } => {
                base.eval(now)
                    + Duration::minutes(*minutes)
                    + Duration::hours(*hours)
                    + Duration::days(*days)
                    + Duration::weeks(*weeks)
            }
        }
    }
}

/// Parse a moment expression.
pub fn parse_moment(input: &str) -> MomentResult<MomentExpr> {
    match all_consuming(delimited(multispace0, expr, multispace0))(input) {
        Ok((_, m)) => Ok(m),
        Err(e) => Err(MomentError::Parse(format!("{input:?}: {e}"))),
    }
}

/// Parse then evaluate in one go.
pub fn eval_moment(input: &str, now: Stamp) -> MomentResult<Stamp> {
    Ok(parse_moment(input)?.eval(now))
}

/// Whether `input` is a well-formed moment expression.
pub fn is_valid(input: &str) -> bool {
    parse_moment(input).is_ok()
}

fn expr(i: &str) -> IResult<&str, MomentExpr> {
    preceded(multispace0, alt((map(tag("now"), |_| MomentExpr::Now), sexp)))(i)
}

fn sexp(i: &str) -> IResult<&str, MomentExpr> {
    delimited(
        char('('),
        preceded(multispace0, alt((today, date_lit, shifted))),
        preceded(multispace0, char(')')),
    )(i)
}

fn today(i: &str) -> IResult<&str, MomentExpr> {
    map(tag("today"), |_| MomentExpr::Today)(i)
}

fn date_lit(i: &str) -> IResult<&str, MomentExpr> {
    let (i, _) = tag("date")(i)?;
    let (i, text) = preceded(multispace0, string_lit)(i)?;
    match parse_date_literal(text) {
        Some(d) => Ok((i, MomentExpr::Date(d))),
        None => Err(nom::Err::Failure(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

fn shifted(i: &str) -> IResult<&str, MomentExpr> {
    let (i, _) = tag("shifted")(i)?;
    let (i, base) = expr(i)?;
    let (i, units) = many0(shift_unit)(i)?;
    let mut out = MomentExpr::Shifted {
        base: Box::new(base),
        minutes: 0,
        hours: 0,
        days: 0,
        weeks: 0,
    };
    if let MomentExpr::Shifted {
        ref mut minutes,
        ref mut hours,
        ref mut days,
        ref mut weeks,
        ..
    } = out
    {
        for (unit, amount) in units {
            match unit {
                "minutes" => *minutes += amount,
                "hours" => *hours += amount,
                "days" => *days += amount,
                "weeks" => *weeks += amount,
                _ => {
                    return Err(nom::Err::Failure(nom::error::Error::new(
                        i,
                        nom::error::ErrorKind::Verify,
                    )))
                }
            }
        }
    }
    Ok((i, out))
}

fn shift_unit(i: &str) -> IResult<&str, (&str, i64)> {
    let (i, unit) = preceded(
        multispace0,
        preceded(tag("#:"), take_while1(|c: char| c.is_ascii_alphabetic())),
    )(i)?;
    let (i, amount) = preceded(multispace0, signed_int)(i)?;
    Ok((i, (unit, amount)))
}

fn signed_int(i: &str) -> IResult<&str, i64> {
    let (i, text) = recognize(pair(opt(char('-')), digit1))(i)?;
    match text.parse::<i64>() {
        Ok(n) => Ok((i, n)),
        Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn string_lit(i: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c| c != '"'), char('"'))(i)
}

/// Accept `"2022-1-1"`, `"2022-01-01 12:30"` and full `"%Y-%m-%d %H:%M:%S"`.
pub(crate) fn parse_date_literal(text: &str) -> Option<Stamp> {
    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()));
    }
    None
}

/// A fixed dummy `now` used by policy validation, where only
/// well-formedness matters.
pub fn dummy_now() -> Stamp {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn parse_now_and_today() {
        let now = at(2022, 6, 15, 13);
        assert_eq!(eval_moment("now", now).unwrap(), now);
        assert_eq!(eval_moment("(today)", now).unwrap(), at(2022, 6, 15, 0));
    }

    #[test]
    fn parse_date_literals() {
        let now = dummy_now();
        assert_eq!(
            eval_moment("(date \"2022-1-1\")", now).unwrap(),
            at(2022, 1, 1, 0)
        );
        assert_eq!(
            eval_moment("(date \"2022-01-05 06:00\")", now).unwrap(),
            at(2022, 1, 5, 6)
        );
    }

    #[test]
    fn shifted_applies_every_unit() {
        let now = at(2022, 1, 10, 0);
        assert_eq!(
            eval_moment("(shifted now #:days -10)", now).unwrap(),
            at(2021, 12, 31, 0)
        );
        assert_eq!(
            eval_moment("(shifted (today) #:weeks 1 #:hours 6)", now).unwrap(),
            at(2022, 1, 17, 6)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(!is_valid("not a moment"));
        assert!(!is_valid("(shifted now #:fortnights 2)"));
        assert!(!is_valid("(date \"yesterday\")"));
        assert!(is_valid("(shifted now #:days 15)"));
    }
}
