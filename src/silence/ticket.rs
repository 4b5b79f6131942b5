//! Ticket-backed silences
//!
//! A silence is linked to a ticket in an issue tracker and holds for as long
//! as the ticket stays open.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;

use super::store::{SilenceLabels, SilenceStore};
use super::{ExternalSilencer, Silence, SilenceError};

/// State of one ticket in the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: String,
    pub open: bool,
    pub url: Option<String>,
}

/// Lookup of ticket states by id
#[async_trait]
pub trait TicketSource: Send + Sync {
    fn describe(&self) -> String;

    /// Resolve the given ids. Unknown ids are simply absent from the result.
    async fn tickets(&self, ids: &[String]) -> Result<HashMap<String, Ticket>, SilenceError>;
}

/// Tracker configuration as found in the main config file
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub state_file: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

/// Poll silencer over a [`TicketSource`]
pub struct TicketSilencer {
    source: Box<dyn TicketSource>,
    store: Option<SilenceStore>,
    /// Silence intent, authoritative
    silences: RwLock<HashMap<String, HashMap<String, String>>>,
    /// Resolved state, replaced wholesale by every refresh
    resolved: RwLock<Arc<HashMap<String, Silence>>>,
}

impl TicketSilencer {
    /// Create a silencer, loading persisted intent from `store` if given.
    /// A state file that cannot be read is logged and treated as empty.
    pub fn new(source: Box<dyn TicketSource>, store: Option<SilenceStore>) -> Self {
        let mut silences = HashMap::new();

        if let Some(store) = &store {
            match store.load() {
                Ok(data) => {
                    tracing::debug!(
                        file = %store.path().display(),
                        count = data.len(),
                        "Loaded silences"
                    );
                    silences = data
                        .into_iter()
                        .map(|(id, labels)| (id, labels.into_iter().collect()))
                        .collect();
                }
                Err(e) => {
                    tracing::warn!(
                        file = %store.path().display(),
                        error = %e,
                        "Loading silences failed"
                    );
                }
            }
        }

        Self {
            source,
            store,
            silences: RwLock::new(silences),
            resolved: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Build from configuration with the HTTP tracker client
    pub fn from_config(config: &TrackerConfig) -> Self {
        let store = config.state_file.as_ref().map(SilenceStore::new);
        Self::new(Box::new(HttpTicketSource::new(config)), store)
    }

    fn persist(&self, silences: &HashMap<String, HashMap<String, String>>) -> Result<(), SilenceError> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let data: SilenceLabels = silences
            .iter()
            .map(|(id, labels)| {
                let sorted: BTreeMap<String, String> =
                    labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                (id.clone(), sorted)
            })
            .collect();

        store.store(&data).map_err(|e| {
            tracing::warn!(file = %store.path().display(), error = %e, "Saving silences failed");
            SilenceError::from(e)
        })
    }
}

#[async_trait]
impl ExternalSilencer for TicketSilencer {
    fn describe(&self) -> String {
        format!("Ticket silencer ({})", self.source.describe())
    }

    fn identity(&self) -> String {
        match &self.store {
            Some(store) => format!("{}|{}", self.source.describe(), store.path().display()),
            None => self.source.describe(),
        }
    }

    fn silences(&self) -> Vec<Silence> {
        let resolved = self.resolved.read().clone();
        let mut silences: Vec<Silence> = resolved.values().cloned().collect();
        silences.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        silences
    }

    fn silenced(&self, labels: &HashMap<String, String>) -> Option<Silence> {
        let resolved = self.resolved.read().clone();
        let silences = self.silences.read();

        let mut candidates: Vec<(&String, &HashMap<String, String>)> = silences
            .iter()
            .filter(|(_, recorded)| {
                recorded
                    .iter()
                    .all(|(k, v)| labels.get(k).is_some_and(|value| value == v))
            })
            .collect();

        // richest first, ties broken by id for determinism
        candidates.sort_by(|(id_a, a), (id_b, b)| b.len().cmp(&a.len()).then(id_a.cmp(id_b)));

        // a matched but not yet resolved silence does not count
        candidates
            .into_iter()
            .find_map(|(id, _)| resolved.get(id).cloned())
    }

    fn set_silence(&self, id: &str, labels: HashMap<String, String>) -> Result<(), SilenceError> {
        let mut silences = self.silences.write();
        tracing::debug!(id = %id, labels = ?labels, count = silences.len(), "Adding silence");
        silences.insert(id.to_string(), labels);
        self.persist(&silences)
    }

    fn delete_silence(&self, id: &str) -> Result<(), SilenceError> {
        let mut silences = self.silences.write();
        tracing::debug!(id = %id, "Deleting silence");
        silences.remove(id);
        self.persist(&silences)
    }

    async fn refresh(&self) -> Result<(), SilenceError> {
        let tracked: Vec<(String, HashMap<String, String>)> = self
            .silences
            .read()
            .iter()
            .map(|(id, labels)| (id.clone(), labels.clone()))
            .collect();

        let ids: Vec<String> = tracked.iter().map(|(id, _)| id.clone()).collect();
        let tickets = if ids.is_empty() {
            HashMap::new()
        } else {
            self.source.tickets(&ids).await?
        };

        let mut resolved = HashMap::with_capacity(tracked.len());
        for (id, labels) in tracked {
            let Some(ticket) = tickets.get(&id) else {
                tracing::debug!(id = %id, "Ticket not found, leaving silence unresolved");
                continue;
            };

            resolved.insert(
                id.clone(),
                Silence {
                    external_id: id,
                    labels,
                    silenced: ticket.open,
                    url: ticket.url.clone(),
                },
            );
        }

        tracing::debug!(count = resolved.len(), "Refreshed silences");
        *self.resolved.write() = Arc::new(resolved);

        Ok(())
    }
}

/// Redmine-style issue tracker over HTTP
pub struct HttpTicketSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssuesResponse {
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    id: u64,
    #[serde(default)]
    closed_on: Option<String>,
}

impl HttpTicketSource {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl TicketSource for HttpTicketSource {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn tickets(&self, ids: &[String]) -> Result<HashMap<String, Ticket>, SilenceError> {
        let url = format!("{}/issues.json", self.base_url);
        tracing::debug!(url = %url, count = ids.len(), "Getting issues");

        let mut request = self.client.get(&url).query(&[
            ("issue_id", ids.join(",")),
            ("status_id", "*".to_string()),
            ("limit", "100".to_string()),
            ("offset", "0".to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("X-Redmine-API-Key", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SilenceError::Tracker(format!(
                "Tracker returned status {}",
                response.status()
            )));
        }

        let body: IssuesResponse = response.json().await?;

        Ok(body
            .issues
            .into_iter()
            .map(|issue| {
                let id = issue.id.to_string();
                let ticket = Ticket {
                    id: id.clone(),
                    open: issue.closed_on.as_deref().map_or(true, str::is_empty),
                    url: Some(format!("{}/issues/{}", self.base_url, issue.id)),
                };
                (id, ticket)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FakeTracker {
        open: Vec<&'static str>,
        closed: Vec<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeTracker {
        fn new(open: Vec<&'static str>, closed: Vec<&'static str>) -> Self {
            Self {
                open,
                closed,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl TicketSource for FakeTracker {
        fn describe(&self) -> String {
            "fake".to_string()
        }

        async fn tickets(&self, ids: &[String]) -> Result<HashMap<String, Ticket>, SilenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ids
                .iter()
                .filter_map(|id| {
                    let open = if self.open.contains(&id.as_str()) {
                        true
                    } else if self.closed.contains(&id.as_str()) {
                        false
                    } else {
                        return None;
                    };
                    Some((
                        id.clone(),
                        Ticket {
                            id: id.clone(),
                            open,
                            url: Some(format!("https://tracker/issues/{}", id)),
                        },
                    ))
                })
                .collect())
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_subset_lookup() {
        let silencer = TicketSilencer::new(Box::new(FakeTracker::new(vec!["7"], vec![])), None);
        silencer.set_silence("7", labels(&[("Hostname", "x")])).unwrap();
        silencer.refresh().await.unwrap();

        let hit = silencer.silenced(&labels(&[("Hostname", "x"), ("Extra", "y")]));
        assert!(hit.as_ref().is_some_and(|s| s.silenced));
        assert_eq!(hit.unwrap().url.as_deref(), Some("https://tracker/issues/7"));

        assert!(silencer.silenced(&labels(&[("Hostname", "z")])).is_none());
    }

    #[tokio::test]
    async fn test_unresolved_match_is_not_silenced() {
        let silencer = TicketSilencer::new(Box::new(FakeTracker::new(vec!["7"], vec![])), None);
        silencer.set_silence("7", labels(&[("Hostname", "x")])).unwrap();

        // no refresh yet
        assert!(silencer.silenced(&labels(&[("Hostname", "x")])).is_none());
    }

    #[tokio::test]
    async fn test_closed_ticket_is_not_silenced() {
        let silencer = TicketSilencer::new(Box::new(FakeTracker::new(vec![], vec!["9"])), None);
        silencer.set_silence("9", labels(&[("Hostname", "x")])).unwrap();
        silencer.refresh().await.unwrap();

        let silence = silencer.silenced(&labels(&[("Hostname", "x")])).unwrap();
        assert!(!silence.silenced);
    }

    #[tokio::test]
    async fn test_richest_silence_wins() {
        let silencer =
            TicketSilencer::new(Box::new(FakeTracker::new(vec!["1", "2"], vec![])), None);
        silencer.set_silence("1", labels(&[("Hostname", "x")])).unwrap();
        silencer
            .set_silence("2", labels(&[("Hostname", "x"), ("Service", "disk")]))
            .unwrap();
        silencer.refresh().await.unwrap();

        let silence = silencer
            .silenced(&labels(&[("Hostname", "x"), ("Service", "disk")]))
            .unwrap();
        assert_eq!(silence.external_id, "2");

        let silence = silencer
            .silenced(&labels(&[("Hostname", "x"), ("Service", "cpu")]))
            .unwrap();
        assert_eq!(silence.external_id, "1");
    }

    #[test]
    fn test_identity_covers_tracker_and_state_file() {
        let dir = TempDir::new().unwrap();
        let tracker = || Box::new(FakeTracker::new(vec![], vec![]));
        let a = TicketSilencer::new(tracker(), None);
        let b = TicketSilencer::new(tracker(), None);
        let c = TicketSilencer::new(tracker(), Some(SilenceStore::new(dir.path().join("s.json"))));

        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[tokio::test]
    async fn test_refresh_replaces_whole_map() {
        let silencer = TicketSilencer::new(Box::new(FakeTracker::new(vec!["1"], vec![])), None);
        silencer.set_silence("1", labels(&[("Hostname", "x")])).unwrap();
        silencer.refresh().await.unwrap();
        assert_eq!(silencer.silences().len(), 1);

        silencer.delete_silence("1").unwrap();
        // resolved state survives until the next refresh
        assert_eq!(silencer.silences().len(), 1);
        silencer.refresh().await.unwrap();
        assert!(silencer.silences().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_without_silences_skips_tracker() {
        let tracker = FakeTracker::new(vec![], vec![]);
        let calls = Arc::clone(&tracker.calls);
        let silencer = TicketSilencer::new(Box::new(tracker), None);
        silencer.refresh().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_silences_survive_restart() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("silences.json");

        let silencer = TicketSilencer::new(
            Box::new(FakeTracker::new(vec!["7"], vec![])),
            Some(SilenceStore::new(&path)),
        );
        silencer.set_silence("7", labels(&[("Hostname", "x")])).unwrap();
        drop(silencer);

        let restarted = TicketSilencer::new(
            Box::new(FakeTracker::new(vec!["7"], vec![])),
            Some(SilenceStore::new(&path)),
        );
        restarted.refresh().await.unwrap();
        assert!(restarted
            .silenced(&labels(&[("Hostname", "x")]))
            .is_some_and(|s| s.silenced));
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_intent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing-dir").join("silences.json");

        let silencer = TicketSilencer::new(
            Box::new(FakeTracker::new(vec!["7"], vec![])),
            Some(SilenceStore::new(&path)),
        );
        assert!(silencer.set_silence("7", labels(&[("Hostname", "x")])).is_err());

        silencer.refresh().await.unwrap();
        assert!(silencer.silenced(&labels(&[("Hostname", "x")])).is_some());
    }
}
