//! Alertmanager-style filter expressions
//!
//! Parses `{label="value",other!="x",third=~"re.*"}` into field matchers
//! built from the same matcher language the rules use. `=` and `!=` go
//! through the equality form (`= value`), `=~` and `!~` through the regex
//! form (`=~ value`).

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use super::matcher::{Matcher, MatcherError};

/// One clause of a filter expression
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatcher {
    pub field: String,
    pub matcher: Matcher,
    pub negated: bool,
}

impl FieldMatcher {
    /// Test the clause against a label set. A missing label counts as the
    /// empty string, as alertmanager does.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        let value = labels.get(&self.field).map(String::as_str).unwrap_or("");
        self.matcher.matches(value) != self.negated
    }
}

/// Parse a whole filter expression; an empty expression yields no clauses
pub fn parse_filter(text: &str) -> Result<Vec<FieldMatcher>, FilterError> {
    let mut chars = text.trim().chars().peekable();
    let mut matchers = Vec::new();

    loop {
        match chars.peek() {
            None => return Ok(matchers),
            Some('{') | Some(',') | Some(' ') => {
                chars.next();
            }
            Some('}') => {
                chars.next();
                skip_whitespace(&mut chars);
                return match chars.next() {
                    None => Ok(matchers),
                    Some(c) => Err(FilterError::Trailing(c)),
                };
            }
            Some(_) => matchers.push(parse_clause(&mut chars)?),
        }
    }
}

/// Test a label set against every clause
pub fn matches_all(matchers: &[FieldMatcher], labels: &HashMap<String, String>) -> bool {
    matchers.iter().all(|m| m.matches(labels))
}

fn parse_clause(chars: &mut Peekable<Chars<'_>>) -> Result<FieldMatcher, FilterError> {
    let mut field = String::new();
    while let Some(&c) = chars.peek() {
        if c == '=' || c == '!' || c == '~' {
            break;
        }
        field.push(c);
        chars.next();
    }
    let field = field.trim().to_string();
    if field.is_empty() {
        return Err(FilterError::MissingField);
    }

    let mut operator = String::new();
    while let Some(&c) = chars.peek() {
        if c == '=' || c == '!' || c == '~' {
            operator.push(c);
            chars.next();
        } else {
            break;
        }
    }

    let value = parse_quoted(chars)?;

    let (text, negated) = match operator.as_str() {
        "=" => (format!("= {}", value), false),
        "!=" => (format!("= {}", value), true),
        "=~" => (format!("=~ {}", value), false),
        "!~" => (format!("=~ {}", value), true),
        _ => return Err(FilterError::UnknownOperator(operator)),
    };

    Ok(FieldMatcher {
        field,
        matcher: Matcher::parse(&text)?,
        negated,
    })
}

fn parse_quoted(chars: &mut Peekable<Chars<'_>>) -> Result<String, FilterError> {
    skip_whitespace(chars);
    if chars.next() != Some('"') {
        return Err(FilterError::ExpectedQuote);
    }

    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(value),
            '\\' => match chars.next() {
                Some(escaped) => value.push(escaped),
                None => break,
            },
            _ => value.push(c),
        }
    }

    Err(FilterError::UnterminatedString)
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

/// Filter expression errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum FilterError {
    #[error("Missing field name")]
    MissingField,

    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("Expected quoted value")]
    ExpectedQuote,

    #[error("Unterminated quoted value")]
    UnterminatedString,

    #[error("Unexpected trailing character '{0}'")]
    Trailing(char),

    #[error("Invalid matcher: {0}")]
    Matcher(#[from] MatcherError),
}
