// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Parser for the formula expression grammar using nom parsers

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, map_res},
    multi::many0,
    sequence::{delimited, preceded},
    IResult,
};

use super::{Expr, FormulaError, FormulaResult};

/// Parse a formula definition. The top level must be an operator call.
pub fn parse_formula(input: &str) -> FormulaResult<Expr> {
    match all_consuming(delimited(multispace0, sexp, multispace0))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(e) => Err(FormulaError::Parse(format!("{input:?}: {e}"))),
    }
}

fn expr(i: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            sexp,
            map(string_lit, |s| Expr::Str(s.to_string())),
            map(number, Expr::Number),
        )),
    )(i)
}

fn sexp(i: &str) -> IResult<&str, Expr> {
    let (i, _) = preceded(multispace0, char('('))(i)?;
    let (i, op) = preceded(multispace0, symbol)(i)?;
    let (i, args) = many0(expr)(i)?;
    let (i, _) = preceded(multispace0, char(')'))(i)?;
    Ok((i, normalize(op, args)))
}

/// Collapse `(series "name")` calls into the dedicated node.
fn normalize(op: &str, args: Vec<Expr>) -> Expr {
    if op == "series" && args.len() == 1 {
        if let Expr::Str(name) = &args[0] {
            return Expr::Series(name.clone());
        }
    }
    Expr::Call {
        op: op.to_string(),
        args,
    }
}

fn symbol(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || "+-*/_<>=!.".contains(c))(i)
}

fn string_lit(i: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c| c != '"'), char('"'))(i)
}

fn number(i: &str) -> IResult<&str, f64> {
    // `symbol` accepts leading digits too, so only treat the token as a
    // number when it fully parses as one
    map_res(
        take_while1(|c: char| c.is_ascii_digit() || "+-.eE".contains(c)),
        |t: &str| t.parse::<f64>(),
    )(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_series_reference() {
        assert_eq!(
            parse_formula("(series \"ground-0\")").unwrap(),
            Expr::Series("ground-0".to_string())
        );
    }

    #[test]
    fn parses_nested_arithmetic() {
        let expr = parse_formula("(+ 1 (series \"ground-1\"))").unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                op: "+".to_string(),
                args: vec![Expr::Number(1.0), Expr::Series("ground-1".to_string())],
            }
        );
    }

    #[test]
    fn parses_multi_arg_calls() {
        let expr =
            parse_formula("(add (series \"dep-middle-left\") (series \"dep-middle-right\"))")
                .unwrap();
        match expr {
            Expr::Call { op, args } => {
                assert_eq!(op, "add");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_formula("series \"x\"").is_err());
        assert!(parse_formula("(series \"x\"").is_err());
        assert!(parse_formula("").is_err());
    }

    #[test]
    fn canonical_display_round_trips() {
        let text = "(+ 1 (series \"ground-1\"))";
        let expr = parse_formula(text).unwrap();
        assert_eq!(parse_formula(&expr.to_string()).unwrap(), expr);
    }
}
