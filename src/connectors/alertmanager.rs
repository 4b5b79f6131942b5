//! Prometheus Alertmanager connector
//!
//! Reads active alerts from `/api/v2/alerts`, treats active silences from
//! `/api/v2/silences` as downtimes and silences alerts by posting a new
//! silence back.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Alert, Connector, ConnectorError, Downtime, State};
use crate::rules::Matcher;
use crate::silence::PushSilencer;

/// Connector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AlertmanagerConfig {
    pub tag: String,
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

pub struct AlertmanagerConnector {
    config: AlertmanagerConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmAlert {
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
    starts_at: DateTime<Utc>,
    #[serde(default, rename = "generatorURL")]
    generator_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmSilence {
    #[serde(default)]
    matchers: Vec<AmMatcher>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    #[serde(default)]
    created_by: String,
    #[serde(default)]
    comment: String,
    status: AmSilenceStatus,
}

#[derive(Debug, Deserialize)]
struct AmSilenceStatus {
    state: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmMatcher {
    name: String,
    value: String,
    #[serde(default)]
    is_regex: bool,
    #[serde(default = "default_is_equal")]
    is_equal: bool,
}

fn default_is_equal() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewSilence {
    matchers: Vec<AmMatcher>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    created_by: String,
    comment: String,
}

impl AlertmanagerConnector {
    pub fn new(config: AlertmanagerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ConnectorError> {
        let url = self.endpoint(path);
        tracing::debug!(tag = %self.config.tag, url = %url, "Requesting");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Remote { status, message });
        }

        Ok(response.json().await?)
    }

    fn convert_alert(&self, alert: AmAlert) -> Alert {
        let mut labels = alert.labels;
        if !labels.contains_key("Hostname") {
            if let Some(host) = labels.get("instance").or_else(|| labels.get("host")).cloned() {
                labels.insert("Hostname".to_string(), host);
            }
        }

        let state = severity_state(labels.get("severity").map(String::as_str));
        let description = alert
            .annotations
            .get("summary")
            .or_else(|| labels.get("alertname"))
            .cloned()
            .unwrap_or_default();
        let details = alert
            .annotations
            .get("description")
            .cloned()
            .unwrap_or_default();

        let mut converted = Alert::new(
            self.config.tag.clone(),
            labels,
            description,
            alert.starts_at,
            state,
        )
        .with_details(details);

        if let Some(url) = alert.generator_url.filter(|u| !u.is_empty()) {
            converted = converted.with_link("Source", url);
        }

        converted
    }
}

fn severity_state(severity: Option<&str>) -> State {
    match severity {
        Some("critical") | Some("error") | Some("page") => State::Critical,
        Some("warning") | None => State::Warning,
        Some("info") | Some("none") => State::Ok,
        Some(_) => State::Unknown,
    }
}

/// Translate silence matchers; negative matchers cannot be expressed as
/// label matchers and are skipped
fn convert_matchers(matchers: Vec<AmMatcher>) -> BTreeMap<String, Matcher> {
    let mut converted = BTreeMap::new();
    for m in matchers.into_iter().filter(|m| m.is_equal) {
        let text = if m.is_regex {
            // alertmanager regexes are anchored
            format!("~= ^(?:{})$", m.value)
        } else {
            format!("= {}", m.value)
        };
        match Matcher::parse(&text) {
            Ok(matcher) => {
                converted.insert(m.name, matcher);
            }
            Err(e) => {
                tracing::warn!(name = %m.name, error = %e, "Skipping unparsable silence matcher");
            }
        }
    }
    converted
}

#[async_trait]
impl Connector for AlertmanagerConnector {
    fn tag(&self) -> &str {
        &self.config.tag
    }

    fn describe(&self) -> String {
        format!("Alertmanager ({})", self.config.url)
    }

    async fn collect(&self) -> Result<Vec<Alert>, ConnectorError> {
        let alerts: Vec<AmAlert> = self
            .get("/api/v2/alerts?active=true&silenced=false&inhibited=false")
            .await?;

        Ok(alerts.into_iter().map(|a| self.convert_alert(a)).collect())
    }

    fn supports_downtimes(&self) -> bool {
        true
    }

    async fn collect_downtimes(&self) -> Result<Vec<Downtime>, ConnectorError> {
        let silences: Vec<AmSilence> = self.get("/api/v2/silences").await?;

        Ok(silences
            .into_iter()
            .filter(|s| s.status.state == "active")
            .filter_map(|s| {
                let matchers = convert_matchers(s.matchers);
                if matchers.is_empty() {
                    return None;
                }
                Some(Downtime {
                    author: s.created_by,
                    comment: s.comment,
                    start_time: s.starts_at,
                    end_time: s.ends_at,
                    matchers,
                })
            })
            .collect())
    }

    fn push_silencer(&self) -> Option<&dyn PushSilencer> {
        Some(self as &dyn PushSilencer)
    }
}

#[async_trait]
impl PushSilencer for AlertmanagerConnector {
    async fn silence(
        &self,
        alert: &Alert,
        duration: Duration,
        user: &str,
    ) -> Result<(), ConnectorError> {
        let now = Utc::now();
        let mut matchers: Vec<AmMatcher> = alert
            .labels
            .iter()
            .map(|(name, value)| AmMatcher {
                name: name.clone(),
                value: value.clone(),
                is_regex: false,
                is_equal: true,
            })
            .collect();
        matchers.sort_by(|a, b| a.name.cmp(&b.name));

        let payload = NewSilence {
            matchers,
            starts_at: now,
            ends_at: now + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(1)),
            created_by: user.to_string(),
            comment: format!("{}: silenced via opsboard", user),
        };

        let response = self
            .client
            .post(self.endpoint("/api/v2/silences"))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Remote { status, message });
        }

        tracing::debug!(tag = %self.config.tag, alert_id = %alert.id, user = %user, "Silence created");
        Ok(())
    }
}
