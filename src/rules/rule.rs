//! Rules: named predicate bundles over an alert's description, age and labels

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::matcher::Matcher;

/// A rule fires when every present matcher matches.
///
/// `when` is tested against the alert's age rounded to seconds, `what`
/// against its description and each entry of `labels` against the label
/// of the same name. A label matcher whose label is missing on the alert
/// never matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what: Option<Matcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Matcher>,
    #[serde(default, rename = "label", alias = "labels")]
    pub labels: BTreeMap<String, Matcher>,
}

impl Rule {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_what(mut self, what: Matcher) -> Self {
        self.what = Some(what);
        self
    }

    pub fn with_when(mut self, when: Matcher) -> Self {
        self.when = Some(when);
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, matcher: Matcher) -> Self {
        self.labels.insert(name.into(), matcher);
        self
    }

    /// Test the rule against one alert
    pub fn matches(&self, what: &str, age_secs: i64, labels: &HashMap<String, String>) -> bool {
        if let Some(m) = &self.what {
            if !m.matches(what) {
                return false;
            }
        }

        if let Some(m) = &self.when {
            if !m.matches(&age_secs.to_string()) {
                return false;
            }
        }

        self.labels.iter().all(|(name, m)| match labels.get(name) {
            Some(value) => m.matches(value),
            None => false,
        })
    }
}

/// First rule (in order) matching the alert, with its index
pub fn first_match<'a>(
    rules: &'a [Rule],
    what: &str,
    age_secs: i64,
    labels: &HashMap<String, String>,
) -> Option<(usize, &'a Rule)> {
    rules
        .iter()
        .enumerate()
        .find(|(_, rule)| rule.matches(what, age_secs, labels))
}
