//! Textual matcher language
//!
//! A matcher is written as an optional operator, a single space and an
//! operand:
//!
//! | text        | meaning                                      |
//! |-------------|----------------------------------------------|
//! | `~= re`     | regular expression (`=~ re` is accepted too) |
//! | `> 1.5`     | numeric greater than                         |
//! | `>= 1.5`    | numeric greater or equal                     |
//! | `< 1.5`     | numeric less than                            |
//! | `<= 1.5`    | numeric less or equal                        |
//! | `= 1.5`     | numeric equality if the operand is a number  |
//! | `= text`    | exact string equality otherwise              |
//! | anything    | regular expression over the whole text       |
//!
//! Numeric comparisons treat values closer than [`EPSILON`] as equal.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tolerance for numeric equality
pub const EPSILON: f64 = 1e-8;

/// Numeric comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }

    fn apply(&self, value: f64, number: f64) -> bool {
        let equal = float_equal_enough(value, number);
        match self {
            CompareOp::Eq => equal,
            CompareOp::Lt => value < number && !equal,
            CompareOp::LtEq => value < number || equal,
            CompareOp::Gt => value > number && !equal,
            CompareOp::GtEq => value > number || equal,
        }
    }
}

/// Predicate over a single string value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Matcher {
    Regex(Regex),
    Number { op: CompareOp, number: f64 },
    Equals(String),
}

impl Matcher {
    /// Parse the textual form.
    ///
    /// Invalid regular expressions and unparsable numeric operands are
    /// configuration errors and are reported here, never at match time.
    pub fn parse(text: &str) -> Result<Self, MatcherError> {
        if let Some(pattern) = text.strip_prefix("~= ").or_else(|| text.strip_prefix("=~ ")) {
            return Self::regex(pattern);
        }

        for (prefix, op) in [
            (">= ", CompareOp::GtEq),
            ("<= ", CompareOp::LtEq),
            ("> ", CompareOp::Gt),
            ("< ", CompareOp::Lt),
        ] {
            if let Some(operand) = text.strip_prefix(prefix) {
                let number = operand
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| MatcherError::InvalidNumber(text.to_string()))?;
                return Ok(Matcher::Number { op, number });
            }
        }

        if text.starts_with("= ") {
            // The operand is everything after the first two characters,
            // untrimmed. `"=  1"` is therefore the string " 1", not a number.
            let operand = &text[2..];
            return Ok(match operand.parse::<f64>() {
                Ok(number) => Matcher::Number {
                    op: CompareOp::Eq,
                    number,
                },
                Err(_) => Matcher::Equals(operand.to_string()),
            });
        }

        Self::regex(text)
    }

    fn regex(pattern: &str) -> Result<Self, MatcherError> {
        Regex::new(pattern)
            .map(Matcher::Regex)
            .map_err(|e| MatcherError::InvalidRegex {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    /// Test a value. A non-numeric value never matches a numeric matcher.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(value),
            Matcher::Number { op, number } => match value.trim().parse::<f64>() {
                Ok(v) => op.apply(v, *number),
                Err(_) => false,
            },
            Matcher::Equals(expected) => expected == value,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Regex(re) => write!(f, "~= {}", re.as_str()),
            Matcher::Number { op, number } => write!(f, "{} {}", op.symbol(), number),
            Matcher::Equals(s) => write!(f, "= {}", s),
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Matcher::Regex(a), Matcher::Regex(b)) => a.as_str() == b.as_str(),
            (
                Matcher::Number { op: a, number: x },
                Matcher::Number { op: b, number: y },
            ) => a == b && x == y,
            (Matcher::Equals(a), Matcher::Equals(b)) => a == b,
            _ => false,
        }
    }
}

impl TryFrom<String> for Matcher {
    type Error = MatcherError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Matcher::parse(&text)
    }
}

impl From<Matcher> for String {
    fn from(matcher: Matcher) -> Self {
        matcher.to_string()
    }
}

pub(crate) fn float_equal_enough(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

/// Matcher parse errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MatcherError {
    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Invalid numeric operand in '{0}'")]
    InvalidNumber(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Matcher {
        Matcher::parse(text).unwrap()
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(parse("X"), Matcher::Regex(Regex::new("X").unwrap()));
        assert_eq!(parse("~= X"), Matcher::Regex(Regex::new("X").unwrap()));
        assert_eq!(parse("=~ X"), Matcher::Regex(Regex::new("X").unwrap()));
        assert_eq!(
            parse("= 1"),
            Matcher::Number {
                op: CompareOp::Eq,
                number: 1.0
            }
        );
        assert_eq!(parse("= a"), Matcher::Equals("a".to_string()));
        assert_eq!(
            parse(">= 1"),
            Matcher::Number {
                op: CompareOp::GtEq,
                number: 1.0
            }
        );
        assert_eq!(
            parse("< 1"),
            Matcher::Number {
                op: CompareOp::Lt,
                number: 1.0
            }
        );
        assert_eq!(
            parse("> 1.2"),
            Matcher::Number {
                op: CompareOp::Gt,
                number: 1.2
            }
        );
    }

    #[test]
    fn test_greater_than() {
        let m = parse("> 1");
        assert!(m.matches("2"));
        assert!(!m.matches("1"));
        assert!(!m.matches("0.5"));
    }

    #[test]
    fn test_float_equality() {
        let m = parse("= 1.01");
        assert!(m.matches("1.01"));
        assert!(m.matches("1.010000001"));
        assert!(!m.matches("1.001"));
    }

    #[test]
    fn test_inclusive_bounds_use_tolerance() {
        assert!(parse(">= 5").matches("4.999999999"));
        assert!(parse("<= 5").matches("5.000000001"));
        assert!(!parse("< 5").matches("4.999999999"));
        assert!(parse("< 5").matches("4"));
    }

    #[test]
    fn test_string_equality() {
        let m = parse("= a");
        assert!(m.matches("a"));
        assert!(!m.matches("ab"));
        assert!(!m.matches(" a"));
    }

    #[test]
    fn test_equality_operand_skips_exactly_two_chars() {
        // the extra space belongs to the operand, making it a string
        assert_eq!(parse("=  1"), Matcher::Equals(" 1".to_string()));
        assert!(parse("=  1").matches(" 1"));
        assert!(!parse("=  1").matches("1"));
        // no space after '=' is not an operator at all
        assert!(matches!(parse("=1"), Matcher::Regex(_)));
    }

    #[test]
    fn test_implicit_regex() {
        assert!(parse("X").matches("Xavier"));
        assert!(parse("(^|,)b(,|$)").matches("a,b,c"));
        assert!(parse("(^|,)c(,|$)").matches("a,b,c"));
        assert!(parse("(^|,)a(,|$)").matches("a,b,c"));
        assert!(!parse("(^|,)d(,|$)").matches("a,b,c"));
        assert!(!parse("modality2star.*deadletter").matches("CPU wait"));
    }

    #[test]
    fn test_non_numeric_value_never_matches_numeric() {
        assert!(!parse("> 1").matches("lots"));
        assert!(!parse("= 1").matches(""));
        assert!(!parse("<= 1").matches("one"));
    }

    #[test]
    fn test_invalid_operands_fail_at_parse_time() {
        assert!(matches!(
            Matcher::parse("> many"),
            Err(MatcherError::InvalidNumber(_))
        ));
        assert!(matches!(
            Matcher::parse("~= (unclosed"),
            Err(MatcherError::InvalidRegex { .. })
        ));
        assert!(Matcher::parse("[").is_err());
    }

    #[test]
    fn test_float_equal_enough() {
        assert!(float_equal_enough(1.0, 1.0));
        assert!(float_equal_enough(1.0, 1.000000001));
        assert!(!float_equal_enough(1.0, 1.0001));
    }

    #[test]
    fn test_display_round_trips() {
        for text in ["~= ^web", "> 1.5", "<= 86400", "= abc", "= 2"] {
            let m = parse(text);
            assert_eq!(parse(&m.to_string()), m);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let m: Matcher = serde_json::from_str("\"< 86400\"").unwrap();
        assert!(m.matches("3600"));
        assert_eq!(serde_json::to_string(&m).unwrap(), "\"< 86400\"");
        assert!(serde_json::from_str::<Matcher>("\"> x\"").is_err());
    }
}
