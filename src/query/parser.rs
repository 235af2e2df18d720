//! EDN-style parsers for pull patterns and index selectors

use crate::core::value::{Keyword, Value};
use crate::error::{Error, Result};
use crate::query::pull::{PullAttr, PullPattern};
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1},
    character::complete::{char, i64 as long},
    combinator::{all_consuming, map, opt, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};

/// Parse a pull pattern such as `[:movie/title {:movie/sequel [:movie/title]}]`
pub fn parse_pattern(input: &str) -> Result<PullPattern> {
    all_consuming(ws(pattern))(input)
        .map(|(_, p)| p)
        .map_err(|e| Error::InvalidArgument(format!("Invalid pull pattern {input:?}: {e}")))
}

/// Parse an index selector such as `[:movie/release-year 1985]`
pub fn parse_selector(input: &str) -> Result<Vec<Value>> {
    all_consuming(ws(vector(scalar)))(input)
        .map(|(_, v)| v)
        .map_err(|e| Error::InvalidArgument(format!("Invalid selector {input:?}: {e}")))
}

/// Parse a single scalar value (keyword, string, integer or boolean)
pub fn parse_value(input: &str) -> Result<Value> {
    all_consuming(ws(scalar))(input)
        .map(|(_, v)| v)
        .map_err(|e| Error::InvalidArgument(format!("Invalid value {input:?}: {e}")))
}

/// Commas are whitespace in EDN
fn blank(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c.is_whitespace() || c == ',')(input)
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(blank, inner, blank)
}

fn vector<'a, O, F>(item: F) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<O>>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(char('['), many0(ws(item)), char(']'))
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || "./-_?!*+<>=".contains(c)
}

fn keyword(input: &str) -> IResult<&str, Keyword> {
    map(preceded(char(':'), take_while1(is_symbol_char)), Keyword::new)(input)
}

fn string(input: &str) -> IResult<&str, String> {
    let body = escaped_transform(
        is_not("\\\""),
        '\\',
        alt((
            value("\\", tag("\\")),
            value("\"", tag("\"")),
            value("\n", tag("n")),
            value("\t", tag("t")),
        )),
    );
    map(delimited(char('"'), opt(body), char('"')), Option::unwrap_or_default)(input)
}

fn scalar(input: &str) -> IResult<&str, Value> {
    alt((
        map(keyword, Value::Keyword),
        map(string, Value::String),
        value(Value::Boolean(true), tag("true")),
        value(Value::Boolean(false), tag("false")),
        map(long, Value::Long),
    ))(input)
}

fn pattern(input: &str) -> IResult<&str, PullPattern> {
    map(vector(pattern_entry), |entries| PullPattern {
        attrs: entries.into_iter().flatten().collect(),
    })(input)
}

/// One vector element; a join map may hold several joins
fn pattern_entry(input: &str) -> IResult<&str, Vec<PullAttr>> {
    alt((
        value(vec![PullAttr::Wildcard], char('*')),
        map(keyword, |k| vec![PullAttr::Attr(k)]),
        join_map,
    ))(input)
}

fn join_map(input: &str) -> IResult<&str, Vec<PullAttr>> {
    map(
        delimited(
            char('{'),
            many0(pair(ws(keyword), ws(pattern))),
            char('}'),
        ),
        |joins| {
            joins
                .into_iter()
                .map(|(k, p)| PullAttr::Join(k, p))
                .collect()
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wildcard_and_attributes() {
        let pattern = parse_pattern("[* :movie/title]").unwrap();
        assert_eq!(
            pattern.attrs,
            vec![PullAttr::Wildcard, PullAttr::Attr(Keyword::new("movie/title"))]
        );
    }

    #[test]
    fn test_parse_nested_joins() {
        let pattern =
            parse_pattern("[:movie/title {:movie/sequel [:movie/title], :movie/cast [*]}]")
                .unwrap();
        assert_eq!(pattern.attrs.len(), 3);
        match &pattern.attrs[1] {
            PullAttr::Join(k, sub) => {
                assert_eq!(k, &Keyword::new("movie/sequel"));
                assert_eq!(sub.attrs, vec![PullAttr::Attr(Keyword::new("movie/title"))]);
            }
            other => panic!("expected a join, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_selector_scalars() {
        let selector = parse_selector(r#"[:movie/release-year 1985 "Repo Man" true]"#).unwrap();
        assert_eq!(
            selector,
            vec![
                Value::Keyword(Keyword::new("movie/release-year")),
                Value::Long(1985),
                Value::from("Repo Man"),
                Value::Boolean(true),
            ]
        );
        assert_eq!(parse_value(r#""""#).unwrap(), Value::from(""));
        assert_eq!(parse_value("-3").unwrap(), Value::Long(-3));
    }

    #[test]
    fn test_malformed_patterns_are_invalid_arguments() {
        for bad in ["[:movie/title", "movie/title", "[:a] trailing", "{:a [:b]}"] {
            let err = parse_pattern(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{bad}");
        }
    }
}
