//! Source connectors
//!
//! A connector turns one backend's API into normalized [`Alert`]s and,
//! when the backend knows about maintenance windows, [`Downtime`]s.
//! Connectors are polled by the aggregator; they keep no state of their own
//! between cycles.

pub mod alertmanager;

use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::Matcher;
use crate::silence::PushSilencer;

pub use alertmanager::{AlertmanagerConfig, AlertmanagerConnector};

/// Alert state as reported by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl State {
    /// Display color
    pub fn color(&self) -> &'static str {
        match self {
            State::Ok => "green",
            State::Warning => "yellow",
            State::Critical => "red",
            State::Unknown => "grey",
        }
    }

    /// Bubble-up rank; Unknown outranks Warning but not Critical
    pub fn rank(&self) -> u8 {
        match self {
            State::Ok => 0,
            State::Warning => 1,
            State::Unknown => 2,
            State::Critical => 3,
        }
    }

    /// Highest ranked state of a set, `Ok` for an empty set
    pub fn worst<I: IntoIterator<Item = State>>(states: I) -> State {
        states
            .into_iter()
            .max_by_key(State::rank)
            .unwrap_or(State::Ok)
    }
}

/// Link attached to an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub title: String,
    pub url: String,
}

/// Normalized alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Fingerprint of tag and labels, stable across cycles
    pub id: String,
    /// Tag of the connector that produced the alert
    pub tag: String,
    pub labels: HashMap<String, String>,
    pub description: String,
    pub details: String,
    pub start: DateTime<Utc>,
    pub state: State,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

impl Alert {
    /// Create an alert. Empty label values are dropped.
    pub fn new(
        tag: impl Into<String>,
        labels: HashMap<String, String>,
        description: impl Into<String>,
        start: DateTime<Utc>,
        state: State,
    ) -> Self {
        let tag = tag.into();
        let labels: HashMap<String, String> =
            labels.into_iter().filter(|(_, v)| !v.is_empty()).collect();
        let id = fingerprint(&tag, &labels);

        Self {
            id,
            tag,
            labels,
            description: description.into(),
            details: String::new(),
            start,
            state,
            links: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn with_link(mut self, title: impl Into<String>, url: impl Into<String>) -> Self {
        self.links.push(Link {
            title: title.into(),
            url: url.into(),
        });
        self
    }

    /// Age relative to `now`, rounded to the nearest second (halves to
    /// even), never negative
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        let millis = (now - self.start).num_milliseconds().max(0);
        (millis as f64 / 1000.0).round_ties_even() as i64
    }
}

/// Stable alert id derived from the source tag and the sorted label set
pub fn fingerprint(tag: &str, labels: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&String, &String> = labels.iter().collect();

    let mut hasher = fxhash::FxHasher64::default();
    hasher.write(tag.as_bytes());
    hasher.write_u8(0xff);
    for (k, v) in sorted {
        hasher.write(k.as_bytes());
        hasher.write_u8(0);
        hasher.write(v.as_bytes());
        hasher.write_u8(0xff);
    }

    format!("{:016x}", hasher.finish())
}

/// Maintenance window declared by a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Downtime {
    pub author: String,
    pub comment: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Which alerts the window covers, by label
    pub matchers: BTreeMap<String, Matcher>,
}

/// One backend
#[async_trait]
pub trait Connector: Send + Sync {
    /// Source identifier stamped on every alert
    fn tag(&self) -> &str;

    /// Human readable description for logs
    fn describe(&self) -> String {
        self.tag().to_string()
    }

    /// Fetch the current alerts
    async fn collect(&self) -> Result<Vec<Alert>, ConnectorError>;

    /// Whether [`Connector::collect_downtimes`] is meaningful
    fn supports_downtimes(&self) -> bool {
        false
    }

    /// Fetch the current maintenance windows
    async fn collect_downtimes(&self) -> Result<Vec<Downtime>, ConnectorError> {
        Ok(Vec::new())
    }

    /// Remote silencing, for sources that support it
    fn push_silencer(&self) -> Option<&dyn PushSilencer> {
        None
    }
}

/// Connector errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ConnectorError::Deserialization(e.to_string())
        } else {
            ConnectorError::Network(e.to_string())
        }
    }
}
