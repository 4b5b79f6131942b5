//! Per-dashboard classification and grouping
//!
//! Every alert of a subscribed connector lands in exactly one bucket:
//! `downtimes` when a downtime of its own connector covers it, `blocked`
//! when a silence or the dashboard rules hide it, `alerts` otherwise.
//! Active alerts sharing a location and tag are then collapsed into groups.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::downtime::downtime_rules;
use crate::config::{Dashboard, DashboardMode};
use crate::connectors::{Alert, Downtime, State};
use crate::rules::{first_match, Rule};
use crate::silence::ExternalSilencer;

/// Location of an alert whose labels name none of the location labels
pub const LOCATION_NOT_FOUND: &str = "NOT_FOUND";

/// Reason given to alerts an including dashboard does not match
pub const UNMATCHED: &str = "Unmatched";

fn default_location_labels() -> Vec<String> {
    ["Project", "Namespace", "Hostname", "job", "cluster"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Presentation settings shared by all dashboards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardLayout {
    #[serde(default)]
    pub group_alerts: bool,
    /// Labels consulted in order to derive an alert's location
    #[serde(default = "default_location_labels", rename = "where")]
    pub location_labels: Vec<String>,
}

impl Default for BoardLayout {
    fn default() -> Self {
        Self {
            group_alerts: false,
            location_labels: default_location_labels(),
        }
    }
}

/// What one connector delivered in one cycle
#[derive(Debug, Clone, Default)]
pub struct SourceResult {
    pub tag: String,
    pub alerts: Vec<Alert>,
    pub downtimes: Vec<Downtime>,
    pub error: Option<String>,
}

/// Alert as presented on a dashboard
#[derive(Debug, Clone, Serialize)]
pub struct BoardAlert {
    #[serde(flatten)]
    pub alert: Alert,
    #[serde(rename = "where")]
    pub location: String,
    pub age_secs: i64,
    pub color: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedAlert {
    #[serde(flatten)]
    pub alert: BoardAlert,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DowntimedAlert {
    #[serde(flatten)]
    pub alert: BoardAlert,
    pub downtime: String,
}

/// Active alerts sharing location and tag
#[derive(Debug, Clone, Serialize)]
pub struct AlertGroup {
    #[serde(rename = "where")]
    pub location: String,
    pub tag: String,
    pub state: State,
    pub color: &'static str,
    pub count: usize,
    /// Members youngest first; the first one represents the group
    pub alerts: Vec<BoardAlert>,
}

/// A connector that failed during the cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionFailure {
    pub tag: String,
    pub error: String,
}

/// Complete classification of one dashboard for one cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct Aggregate {
    pub dashboard: String,
    pub check_time: Option<DateTime<Utc>>,
    pub alerts: Vec<BoardAlert>,
    pub grouped_alerts: Vec<AlertGroup>,
    pub blocked: Vec<BlockedAlert>,
    pub downtimes: Vec<DowntimedAlert>,
    pub failures: Vec<CollectionFailure>,
}

impl Aggregate {
    /// Find an alert by id in any bucket
    pub fn find(&self, alert_id: &str) -> Option<&Alert> {
        self.alerts
            .iter()
            .chain(self.grouped_alerts.iter().flat_map(|g| g.alerts.iter()))
            .chain(self.blocked.iter().map(|b| &b.alert))
            .chain(self.downtimes.iter().map(|d| &d.alert))
            .map(|b| &b.alert)
            .find(|a| a.id == alert_id)
    }

    /// Find an alert by id among the shown (active or grouped) alerts
    pub fn find_active(&self, alert_id: &str) -> Option<&Alert> {
        self.alerts
            .iter()
            .chain(self.grouped_alerts.iter().flat_map(|g| g.alerts.iter()))
            .map(|b| &b.alert)
            .find(|a| a.id == alert_id)
    }

    /// All shown alerts, grouped ones included
    pub fn active(&self) -> impl Iterator<Item = &BoardAlert> {
        self.alerts
            .iter()
            .chain(self.grouped_alerts.iter().flat_map(|g| g.alerts.iter()))
    }
}

/// Location of an alert: `<Cluster>/` when known, then the first present
/// location label
pub fn where_of(labels: &HashMap<String, String>, location_labels: &[String]) -> String {
    let prefix = labels
        .get("Cluster")
        .filter(|c| !c.is_empty())
        .map(|c| format!("{}/", c))
        .unwrap_or_default();

    let place = location_labels
        .iter()
        .filter_map(|name| labels.get(name))
        .find(|v| !v.is_empty())
        .map(String::as_str)
        .unwrap_or(LOCATION_NOT_FOUND);

    format!("{}{}", prefix, place)
}

enum Outcome {
    Active,
    Blocked(String),
    Downtimed(String),
}

fn classify(
    alert: &Alert,
    age_secs: i64,
    dashboard: &Dashboard,
    downtimes: &[Rule],
    silencers: &[Arc<dyn ExternalSilencer>],
) -> Outcome {
    if let Some((_, rule)) = first_match(downtimes, &alert.description, age_secs, &alert.labels) {
        return Outcome::Downtimed(rule.description.clone());
    }

    for silencer in silencers {
        if let Some(silence) = silencer.silenced(&alert.labels).filter(|s| s.silenced) {
            let reason = match &silence.url {
                Some(url) => format!("Silenced by {} ({})", silence.external_id, url),
                None => format!("Silenced by {}", silence.external_id),
            };
            return Outcome::Blocked(reason);
        }
    }

    let matched = first_match(&dashboard.rules, &alert.description, age_secs, &alert.labels);
    match (dashboard.mode, matched) {
        (DashboardMode::Include, Some(_)) => Outcome::Active,
        (DashboardMode::Include, None) => Outcome::Blocked(UNMATCHED.to_string()),
        (DashboardMode::Exclude, Some((_, rule))) => Outcome::Blocked(rule.description.clone()),
        (DashboardMode::Exclude, None) => Outcome::Active,
    }
}

fn youngest_first(a: &BoardAlert, b: &BoardAlert) -> std::cmp::Ordering {
    a.age_secs
        .cmp(&b.age_secs)
        .then_with(|| a.alert.id.cmp(&b.alert.id))
}

/// Classify every subscribed source result for one dashboard
pub fn build_aggregate(
    dashboard: &Dashboard,
    sources: &[SourceResult],
    silencers: &[Arc<dyn ExternalSilencer>],
    layout: &BoardLayout,
    now: DateTime<Utc>,
) -> Aggregate {
    let mut aggregate = Aggregate {
        dashboard: dashboard.name.clone(),
        check_time: Some(now),
        ..Default::default()
    };

    for source in sources.iter().filter(|s| dashboard.subscribes(&s.tag)) {
        if let Some(error) = &source.error {
            aggregate.failures.push(CollectionFailure {
                tag: source.tag.clone(),
                error: error.clone(),
            });
        }

        let downtimes = downtime_rules(&source.downtimes, now);

        for alert in &source.alerts {
            let age_secs = alert.age_secs(now);
            let outcome = classify(alert, age_secs, dashboard, &downtimes, silencers);
            let shown = BoardAlert {
                location: where_of(&alert.labels, &layout.location_labels),
                age_secs,
                color: alert.state.color(),
                alert: alert.clone(),
            };

            match outcome {
                Outcome::Active => aggregate.alerts.push(shown),
                Outcome::Blocked(reason) => aggregate.blocked.push(BlockedAlert {
                    alert: shown,
                    reason,
                }),
                Outcome::Downtimed(downtime) => aggregate.downtimes.push(DowntimedAlert {
                    alert: shown,
                    downtime,
                }),
            }
        }
    }

    aggregate.alerts.sort_by(youngest_first);
    aggregate.blocked.sort_by(|a, b| youngest_first(&a.alert, &b.alert));
    aggregate.downtimes.sort_by(|a, b| youngest_first(&a.alert, &b.alert));
    aggregate.failures.sort_by(|a, b| a.tag.cmp(&b.tag));

    if layout.group_alerts {
        let (singles, groups) = group_alerts(std::mem::take(&mut aggregate.alerts));
        aggregate.alerts = singles;
        aggregate.grouped_alerts = groups;
    }

    aggregate
}

/// Collapse alerts sharing location and tag. Input must be sorted; alerts
/// without a peer are returned as they are.
fn group_alerts(alerts: Vec<BoardAlert>) -> (Vec<BoardAlert>, Vec<AlertGroup>) {
    let mut buckets: BTreeMap<(String, String), Vec<BoardAlert>> = BTreeMap::new();
    for alert in alerts {
        buckets
            .entry((alert.location.clone(), alert.alert.tag.clone()))
            .or_default()
            .push(alert);
    }

    let mut singles = Vec::new();
    let mut groups = Vec::new();
    for ((location, tag), members) in buckets {
        if members.len() < 2 {
            singles.extend(members);
            continue;
        }

        let state = State::worst(members.iter().map(|m| m.alert.state));
        groups.push(AlertGroup {
            location,
            tag,
            state,
            color: state.color(),
            count: members.len(),
            alerts: members,
        });
    }

    singles.sort_by(youngest_first);
    groups.sort_by(|a, b| youngest_first(&a.alerts[0], &b.alerts[0]));
    (singles, groups)
}
