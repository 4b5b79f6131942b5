//! Dashboard definitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::rules::Rule;

/// Name of the dashboard defined in the main configuration file
pub const DEFAULT_DASHBOARD: &str = "";

/// How a dashboard's rules are applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DashboardMode {
    /// Only matching alerts are shown
    Include,
    /// Matching alerts are hidden
    #[default]
    Exclude,
}

impl FromStr for DashboardMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "include" | "including" => Ok(DashboardMode::Include),
            "exclude" | "excluding" | "" => Ok(DashboardMode::Exclude),
            other => Err(format!("unknown dashboard mode '{}'", other)),
        }
    }
}

impl TryFrom<String> for DashboardMode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DashboardMode> for String {
    fn from(mode: DashboardMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for DashboardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DashboardMode::Include => write!(f, "include"),
            DashboardMode::Exclude => write!(f, "exclude"),
        }
    }
}

/// A named, rule-filtered view over the collected alerts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mode: DashboardMode,
    #[serde(default, rename = "rule", alias = "rules")]
    pub rules: Vec<Rule>,
    /// Connector tags shown on this dashboard; empty means all of them
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Dashboard {
    pub fn new(name: impl Into<String>, mode: DashboardMode) -> Self {
        Self {
            name: name.into(),
            mode,
            ..Default::default()
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether alerts of the given connector belong on this dashboard
    pub fn subscribes(&self, tag: &str) -> bool {
        self.tags.is_empty() || self.tags.iter().any(|t| t == tag)
    }
}
