//! Rule engine
//!
//! The matcher language, rules built from it, and the alertmanager-style
//! filter expressions that reuse it.

pub mod filter;
pub mod matcher;
pub mod rule;

pub use filter::{matches_all, parse_filter, FieldMatcher, FilterError};
pub use matcher::{CompareOp, Matcher, MatcherError, EPSILON};
pub use rule::{first_match, Rule};
