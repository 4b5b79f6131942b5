//! The collection loop
//!
//! Every tick the aggregator asks all connectors for their alerts at once,
//! bounded by a shared deadline, classifies the merged result for each
//! dashboard and swaps the new snapshots in. Readers always see the last
//! complete snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use super::classify::{build_aggregate, Aggregate, BoardLayout, SourceResult};
use super::watchdog::STALE_INTERVALS;
use crate::clock::Clock;
use crate::config::{Dashboard, DashboardMode, DEFAULT_DASHBOARD};
use crate::connectors::{Alert, Connector, ConnectorError};
use crate::silence::{ExternalSilencer, Silence, SilenceError};

/// Silence duration used when the caller names none
pub const DEFAULT_SILENCE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything a cycle needs, replaced as a whole on reconfiguration
#[derive(Clone, Default)]
pub struct Configuration {
    pub connectors: Vec<Arc<dyn Connector>>,
    pub silencers: Vec<Arc<dyn ExternalSilencer>>,
    pub dashboards: Vec<Dashboard>,
    pub layout: BoardLayout,
}

impl Configuration {
    /// Configured dashboards, or a single unfiltered default dashboard
    pub fn effective_dashboards(&self) -> Vec<Dashboard> {
        if self.dashboards.is_empty() {
            vec![Dashboard::new(DEFAULT_DASHBOARD, DashboardMode::Exclude)]
        } else {
            self.dashboards.clone()
        }
    }
}

/// Outcome of one collection cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub check_time: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct Aggregator {
    interval: Duration,
    clock: Arc<dyn Clock>,
    configuration: RwLock<Arc<Configuration>>,
    current: RwLock<HashMap<String, Arc<Aggregate>>>,
    check_time: RwLock<Option<DateTime<Utc>>>,
    last_access: RwLock<Option<DateTime<Utc>>>,
    /// Serializes cycles
    cycle: tokio::sync::Mutex<()>,
    reconfigured: Notify,
    updates: broadcast::Sender<DateTime<Utc>>,
    shutdown: watch::Sender<bool>,
}

impl Aggregator {
    pub fn new(configuration: Configuration, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let (updates, _) = broadcast::channel(16);
        let (shutdown, _) = watch::channel(false);

        Self {
            interval,
            clock,
            configuration: RwLock::new(Arc::new(configuration)),
            current: RwLock::new(HashMap::new()),
            check_time: RwLock::new(None),
            last_access: RwLock::new(None),
            cycle: tokio::sync::Mutex::new(()),
            reconfigured: Notify::new(),
            updates,
            shutdown,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Time the last cycle completed, `None` before the first one
    pub fn check_time(&self) -> Option<DateTime<Utc>> {
        *self.check_time.read()
    }

    /// Budget of one cycle: the interval minus a tenth, at least a second
    /// short of the interval when the interval allows it
    pub fn collection_deadline(&self) -> Duration {
        let margin = (self.interval / 10).max(Duration::from_secs(1));
        self.interval
            .checked_sub(margin)
            .filter(|d| !d.is_zero())
            .unwrap_or(self.interval)
    }

    /// Replace the configuration; takes effect with the next cycle, which
    /// is started right away by a running loop.
    ///
    /// A silencer whose identity is unchanged keeps running with its
    /// in-memory silences; the freshly built one is discarded.
    pub fn reconfigure(&self, mut configuration: Configuration) {
        let previous = self.configuration.read().clone();
        let mut kept = 0;
        for silencer in configuration.silencers.iter_mut() {
            let identity = silencer.identity();
            if let Some(running) = previous.silencers.iter().find(|s| s.identity() == identity) {
                *silencer = Arc::clone(running);
                kept += 1;
            }
        }

        tracing::info!(
            connectors = configuration.connectors.len(),
            silencers = configuration.silencers.len(),
            kept_silencers = kept,
            dashboards = configuration.dashboards.len(),
            "Reconfiguring aggregator"
        );
        *self.configuration.write() = Arc::new(configuration);
        self.reconfigured.notify_one();
    }

    pub fn dashboards(&self) -> Vec<String> {
        self.configuration
            .read()
            .effective_dashboards()
            .into_iter()
            .map(|d| d.name)
            .collect()
    }

    /// Receive the check time of every completed cycle
    pub fn subscribe(&self) -> broadcast::Receiver<DateTime<Utc>> {
        self.updates.subscribe()
    }

    /// Whether anybody is looking. True while a subscriber is connected,
    /// before the first read and for three intervals after the last read.
    pub fn is_active(&self) -> bool {
        if self.updates.receiver_count() > 0 {
            return true;
        }

        let Some(last_access) = *self.last_access.read() else {
            return true;
        };

        let window = chrono::Duration::from_std(self.interval * STALE_INTERVALS)
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.clock.now() - last_access <= window
    }

    /// Latest snapshot of a dashboard. An empty name selects the default
    /// dashboard, or the only dashboard when there is just one.
    pub fn alerts(&self, dashboard: &str) -> Result<Arc<Aggregate>, AggregatorError> {
        *self.last_access.write() = Some(self.clock.now());

        let name = self
            .resolve_dashboard(dashboard)
            .ok_or_else(|| AggregatorError::UnknownDashboard(dashboard.to_string()))?;

        let current = self.current.read();
        Ok(current.get(&name).cloned().unwrap_or_else(|| {
            Arc::new(Aggregate {
                dashboard: name,
                ..Default::default()
            })
        }))
    }

    fn resolve_dashboard(&self, name: &str) -> Option<String> {
        let dashboards = self.configuration.read().effective_dashboards();
        if dashboards.iter().any(|d| d.name == name) {
            return Some(name.to_string());
        }
        if name.is_empty() && dashboards.len() == 1 {
            return dashboards.into_iter().next().map(|d| d.name);
        }
        None
    }

    fn find_alert(&self, alert_id: &str, active_only: bool) -> Option<Alert> {
        let current = self.current.read();
        current.values().find_map(|aggregate| {
            let found = if active_only {
                aggregate.find_active(alert_id)
            } else {
                aggregate.find(alert_id)
            };
            found.cloned()
        })
    }

    /// Ask the alert's source to silence it. Failures of the source are
    /// logged, not returned.
    pub async fn silence(
        &self,
        alert_id: &str,
        user: &str,
        duration: Duration,
    ) -> Result<(), AggregatorError> {
        let alert = self
            .find_alert(alert_id, true)
            .ok_or_else(|| AggregatorError::AlertNotFound(alert_id.to_string()))?;

        let configuration = self.configuration.read().clone();
        let connector = configuration
            .connectors
            .iter()
            .find(|c| c.tag() == alert.tag)
            .cloned()
            .ok_or_else(|| AggregatorError::NotSilenceable(alert.tag.clone()))?;

        let Some(silencer) = connector.push_silencer() else {
            return Err(AggregatorError::NotSilenceable(alert.tag.clone()));
        };

        tracing::info!(alert_id = %alert_id, tag = %alert.tag, user = %user, duration = ?duration, "Silencing alert");
        if let Err(e) = silencer.silence(&alert, duration, user).await {
            tracing::warn!(alert_id = %alert_id, tag = %alert.tag, error = %e, "Silencing failed");
        }

        Ok(())
    }

    /// Record a silence for the alert's labels under an external id
    pub fn link_silence(&self, alert_id: &str, external_id: &str) -> Result<(), AggregatorError> {
        let alert = self
            .find_alert(alert_id, false)
            .ok_or_else(|| AggregatorError::AlertNotFound(alert_id.to_string()))?;

        let configuration = self.configuration.read().clone();
        let silencer = configuration
            .silencers
            .first()
            .ok_or(AggregatorError::NoSilencer)?;

        tracing::info!(alert_id = %alert_id, external_id = %external_id, silencer = %silencer.describe(), "Linking silence");
        silencer.set_silence(external_id, alert.labels)?;
        Ok(())
    }

    /// Forget a silence in every silencer
    pub fn unlink_silence(&self, external_id: &str) -> Result<(), AggregatorError> {
        let configuration = self.configuration.read().clone();
        if configuration.silencers.is_empty() {
            return Err(AggregatorError::NoSilencer);
        }

        for silencer in &configuration.silencers {
            silencer.delete_silence(external_id)?;
        }
        Ok(())
    }

    /// Resolved silences of every silencer
    pub fn silences(&self) -> Vec<Silence> {
        let configuration = self.configuration.read().clone();
        configuration
            .silencers
            .iter()
            .flat_map(|s| s.silences())
            .collect()
    }

    /// Cancel the in-flight cycle and stop the loop
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run one cycle now
    pub async fn collect(&self) -> CycleReport {
        let _cycle = self.cycle.lock().await;

        let configuration = self.configuration.read().clone();
        let deadline = Instant::now() + self.collection_deadline();

        let ((sources, cancelled), _) = tokio::join!(
            self.fan_out(&configuration.connectors, deadline),
            self.refresh_silencers(&configuration.silencers, deadline),
        );

        let now = self.clock.now();
        let aggregates: HashMap<String, Arc<Aggregate>> = configuration
            .effective_dashboards()
            .iter()
            .map(|dashboard| {
                let aggregate = build_aggregate(
                    dashboard,
                    &sources,
                    &configuration.silencers,
                    &configuration.layout,
                    now,
                );
                (dashboard.name.clone(), Arc::new(aggregate))
            })
            .collect();

        *self.current.write() = aggregates;
        *self.check_time.write() = Some(now);
        let _ = self.updates.send(now);

        let failed = sources.iter().filter(|s| s.error.is_some()).count();
        let report = CycleReport {
            check_time: now,
            succeeded: sources.len() - failed,
            failed,
            cancelled,
        };
        tracing::debug!(
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            "Collection cycle complete"
        );
        report
    }

    /// Collect from every connector concurrently. Returns one result per
    /// connector, in configuration order, and whether shutdown cut the
    /// cycle short.
    async fn fan_out(
        &self,
        connectors: &[Arc<dyn Connector>],
        deadline: Instant,
    ) -> (Vec<SourceResult>, bool) {
        let (tx, mut rx) = mpsc::channel(connectors.len().max(1));
        let mut tasks = JoinSet::new();

        for (index, connector) in connectors.iter().enumerate() {
            let connector = Arc::clone(connector);
            let tx = tx.clone();
            tasks.spawn(async move {
                let result = collect_source(connector.as_ref()).await;
                // the receiver is gone once the deadline passed
                let _ = tx.send((index, result)).await;
            });
        }
        drop(tx);

        let mut results: Vec<Option<SourceResult>> = vec![None; connectors.len()];
        let mut shutdown = self.shutdown.subscribe();
        let mut cancelled = false;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some((index, result)) => results[index] = Some(result),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        pending = results.iter().filter(|r| r.is_none()).count(),
                        "Collection deadline reached"
                    );
                    break;
                }
                _ = shutdown.wait_for(|stop| *stop) => {
                    tracing::info!("Collection cancelled");
                    cancelled = true;
                    break;
                }
            }
        }

        tasks.abort_all();

        let results = results
            .into_iter()
            .zip(connectors)
            .map(|(result, connector)| {
                result.unwrap_or_else(|| {
                    let error = if cancelled {
                        ConnectorError::Other("collection cancelled".to_string())
                    } else {
                        ConnectorError::Timeout(self.collection_deadline())
                    };
                    tracing::warn!(tag = %connector.tag(), error = %error, "Connector did not report");
                    SourceResult {
                        tag: connector.tag().to_string(),
                        error: Some(error.to_string()),
                        ..Default::default()
                    }
                })
            })
            .collect();

        (results, cancelled)
    }

    async fn refresh_silencers(&self, silencers: &[Arc<dyn ExternalSilencer>], deadline: Instant) {
        if silencers.is_empty() {
            return;
        }

        let refreshes = futures::future::join_all(silencers.iter().map(|silencer| async move {
            if let Err(e) = silencer.refresh().await {
                tracing::warn!(silencer = %silencer.describe(), error = %e, "Refreshing silences failed");
            }
        }));

        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = refreshes => {}
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!("Refreshing silences did not finish in time");
            }
            _ = shutdown.wait_for(|stop| *stop) => {}
        }
    }

    /// Drive cycles every interval until [`Aggregator::stop`]. Ticks are
    /// skipped while nobody is looking; reconfiguration triggers a cycle
    /// right away.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval = ?self.interval, "Aggregator started");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut shutdown = self.shutdown.subscribe();
            let mut was_active = true;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let active = self.is_active();
                        if active != was_active {
                            if active {
                                tracing::info!("Aggregator reactivated");
                            } else {
                                tracing::info!("Aggregator deactivated, nobody is looking");
                            }
                            was_active = active;
                        }
                        if !active {
                            continue;
                        }
                    }
                    _ = self.reconfigured.notified() => {
                        tracing::debug!("Collecting after reconfiguration");
                    }
                    _ = shutdown.wait_for(|stop| *stop) => break,
                }

                self.collect().await;
            }

            tracing::info!("Aggregator stopped");
        })
    }
}

async fn collect_source(connector: &dyn Connector) -> SourceResult {
    let tag = connector.tag().to_string();
    let collect_downtimes = async {
        if connector.supports_downtimes() {
            connector.collect_downtimes().await
        } else {
            Ok(Vec::new())
        }
    };

    let (alerts, downtimes) = tokio::join!(connector.collect(), collect_downtimes);
    let mut errors = Vec::new();

    let alerts = alerts.unwrap_or_else(|e| {
        tracing::warn!(tag = %tag, connector = %connector.describe(), error = %e, "Collecting alerts failed");
        errors.push(e.to_string());
        Vec::new()
    });
    let downtimes = downtimes.unwrap_or_else(|e| {
        tracing::warn!(tag = %tag, connector = %connector.describe(), error = %e, "Collecting downtimes failed");
        errors.push(e.to_string());
        Vec::new()
    });

    tracing::debug!(tag = %tag, alerts = alerts.len(), downtimes = downtimes.len(), "Collected");

    SourceResult {
        tag,
        alerts,
        downtimes,
        error: (!errors.is_empty()).then(|| errors.join("; ")),
    }
}

/// Aggregator errors
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Unknown dashboard: {0:?}")]
    UnknownDashboard(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Alerts of '{0}' cannot be silenced")]
    NotSilenceable(String),

    #[error("No silencer configured")]
    NoSilencer,

    #[error(transparent)]
    Silence(#[from] SilenceError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{MockClock, SystemClock};
    use crate::connectors::State;
    use crate::rules::{Matcher, Rule};
    use crate::silence::{PushSilencer, Ticket, TicketSilencer, TicketSource};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    struct FakeConnector {
        tag: String,
        alerts: Vec<Alert>,
        fail: bool,
        delay: Option<Duration>,
        silenced: Mutex<Vec<(String, String)>>,
    }

    impl FakeConnector {
        fn new(tag: &str, descriptions: &[&str]) -> Self {
            let alerts = descriptions
                .iter()
                .map(|d| {
                    Alert::new(
                        tag,
                        HashMap::from([("Hostname".to_string(), format!("{}-{}", tag, d))]),
                        *d,
                        Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap(),
                        State::Critical,
                    )
                })
                .collect();

            Self {
                tag: tag.to_string(),
                alerts,
                fail: false,
                delay: None,
                silenced: Mutex::new(Vec::new()),
            }
        }

        fn failing(tag: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(tag, &[])
            }
        }

        fn slow(tag: &str, delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new(tag, &["slow"])
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        fn tag(&self) -> &str {
            &self.tag
        }

        async fn collect(&self) -> Result<Vec<Alert>, ConnectorError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(ConnectorError::Network("connection refused".to_string()));
            }
            Ok(self.alerts.clone())
        }

        fn push_silencer(&self) -> Option<&dyn PushSilencer> {
            Some(self as &dyn PushSilencer)
        }
    }

    #[async_trait]
    impl PushSilencer for FakeConnector {
        async fn silence(
            &self,
            alert: &Alert,
            _duration: Duration,
            user: &str,
        ) -> Result<(), ConnectorError> {
            self.silenced.lock().push((alert.id.clone(), user.to_string()));
            Ok(())
        }
    }

    struct OpenTickets;

    #[async_trait]
    impl TicketSource for OpenTickets {
        fn describe(&self) -> String {
            "open".to_string()
        }

        async fn tickets(&self, ids: &[String]) -> Result<HashMap<String, Ticket>, SilenceError> {
            Ok(ids
                .iter()
                .map(|id| {
                    (
                        id.clone(),
                        Ticket {
                            id: id.clone(),
                            open: true,
                            url: None,
                        },
                    )
                })
                .collect())
        }
    }

    fn clock() -> Arc<MockClock> {
        Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()))
    }

    fn configuration(connectors: Vec<Arc<dyn Connector>>) -> Configuration {
        Configuration {
            connectors,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_failing_connector_is_isolated() {
        let aggregator = Aggregator::new(
            configuration(vec![
                Arc::new(FakeConnector::new("a", &["disk"])),
                Arc::new(FakeConnector::failing("b")),
                Arc::new(FakeConnector::new("c", &["load", "swap"])),
            ]),
            Duration::from_secs(60),
            clock(),
        );

        let report = aggregator.collect().await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.cancelled);

        let aggregate = aggregator.alerts("").unwrap();
        assert_eq!(aggregate.alerts.len(), 3);
        assert_eq!(aggregate.failures.len(), 1);
        assert_eq!(aggregate.failures[0].tag, "b");
        assert!(aggregator.check_time().is_some());
    }

    #[tokio::test]
    async fn test_check_time_follows_clock() {
        let clock = clock();
        let aggregator = Aggregator::new(configuration(vec![]), Duration::from_secs(60), clock.clone());
        assert!(aggregator.check_time().is_none());

        let first = aggregator.collect().await.check_time;
        clock.advance(Duration::from_secs(60));
        let second = aggregator.collect().await.check_time;

        assert_eq!(second - first, chrono::Duration::seconds(60));
        assert_eq!(aggregator.check_time(), Some(second));
    }

    #[tokio::test]
    async fn test_slow_connector_hits_deadline() {
        let aggregator = Aggregator::new(
            configuration(vec![
                Arc::new(FakeConnector::new("fast", &["disk"])),
                Arc::new(FakeConnector::slow("slow", Duration::from_secs(30))),
            ]),
            Duration::from_millis(200),
            SystemClock::shared(),
        );

        let started = std::time::Instant::now();
        let report = aggregator.collect().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.failed, 1);

        let aggregate = aggregator.alerts("").unwrap();
        assert_eq!(aggregate.alerts.len(), 1);
        assert_eq!(aggregate.alerts[0].alert.tag, "fast");
        assert_eq!(aggregate.failures[0].tag, "slow");
    }

    #[tokio::test]
    async fn test_stop_cancels_cycle_with_partial_results() {
        let aggregator = Arc::new(Aggregator::new(
            configuration(vec![
                Arc::new(FakeConnector::new("fast", &["disk"])),
                Arc::new(FakeConnector::slow("slow", Duration::from_secs(30))),
            ]),
            Duration::from_secs(60),
            clock(),
        ));

        let cycle = tokio::spawn({
            let aggregator = Arc::clone(&aggregator);
            async move { aggregator.collect().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        aggregator.stop();

        let report = tokio::time::timeout(Duration::from_secs(5), cycle)
            .await
            .unwrap()
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.succeeded, 1);
        assert_eq!(aggregator.alerts("").unwrap().alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_dashboards_are_classified_separately() {
        let mut config = configuration(vec![
            Arc::new(FakeConnector::new("gitlab", &["MR !1"])),
            Arc::new(FakeConnector::new("icinga", &["disk"])),
        ]);
        config.dashboards = vec![
            Dashboard::new("", DashboardMode::Exclude),
            Dashboard::new("ci", DashboardMode::Include)
                .with_tags(["gitlab"])
                .with_rule(Rule::new("all").with_what(Matcher::parse(".*").unwrap())),
        ];

        let aggregator = Aggregator::new(config, Duration::from_secs(60), clock());
        aggregator.collect().await;

        assert_eq!(aggregator.alerts("").unwrap().alerts.len(), 2);
        let ci = aggregator.alerts("ci").unwrap();
        assert_eq!(ci.alerts.len(), 1);
        assert_eq!(ci.dashboard, "ci");
        assert!(matches!(
            aggregator.alerts("nope"),
            Err(AggregatorError::UnknownDashboard(_))
        ));
        assert_eq!(aggregator.dashboards(), vec!["".to_string(), "ci".to_string()]);
    }

    #[tokio::test]
    async fn test_single_dashboard_is_the_default() {
        let mut config = configuration(vec![Arc::new(FakeConnector::new("a", &["disk"]))]);
        config.dashboards = vec![Dashboard::new("ops", DashboardMode::Exclude)];

        let aggregator = Aggregator::new(config, Duration::from_secs(60), clock());
        assert!(aggregator.alerts("").unwrap().check_time.is_none());

        aggregator.collect().await;
        assert_eq!(aggregator.alerts("").unwrap().dashboard, "ops");
        assert_eq!(aggregator.alerts("").unwrap().alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_reconfigure_applies_to_next_cycle() {
        let aggregator = Aggregator::new(
            configuration(vec![Arc::new(FakeConnector::new("a", &["disk"]))]),
            Duration::from_secs(60),
            clock(),
        );
        aggregator.collect().await;
        assert_eq!(aggregator.alerts("").unwrap().alerts.len(), 1);

        aggregator.reconfigure(configuration(vec![Arc::new(FakeConnector::new(
            "b",
            &["load", "swap"],
        ))]));
        // the old snapshot is served until the next cycle
        assert_eq!(aggregator.alerts("").unwrap().alerts.len(), 1);

        aggregator.collect().await;
        let aggregate = aggregator.alerts("").unwrap();
        assert_eq!(aggregate.alerts.len(), 2);
        assert!(aggregate.alerts.iter().all(|a| a.alert.tag == "b"));
    }

    #[tokio::test]
    async fn test_activity_window() {
        let clock = clock();
        let aggregator = Aggregator::new(configuration(vec![]), Duration::from_secs(60), clock.clone());
        assert!(aggregator.is_active());

        aggregator.alerts("").unwrap();
        clock.advance(Duration::from_secs(180));
        assert!(aggregator.is_active());

        clock.advance(Duration::from_secs(1));
        assert!(!aggregator.is_active());

        let _updates = aggregator.subscribe();
        assert!(aggregator.is_active());
    }

    #[tokio::test]
    async fn test_subscribers_are_notified() {
        let aggregator = Aggregator::new(configuration(vec![]), Duration::from_secs(60), clock());
        let mut updates = aggregator.subscribe();

        let report = aggregator.collect().await;
        assert_eq!(updates.recv().await.unwrap(), report.check_time);
    }

    #[tokio::test]
    async fn test_silence_pushes_to_source() {
        let connector = Arc::new(FakeConnector::new("am", &["disk"]));
        let aggregator = Aggregator::new(
            configuration(vec![connector.clone() as Arc<dyn Connector>]),
            Duration::from_secs(60),
            clock(),
        );
        aggregator.collect().await;

        let id = aggregator.alerts("").unwrap().alerts[0].alert.id.clone();
        aggregator
            .silence(&id, "alice", DEFAULT_SILENCE_DURATION)
            .await
            .unwrap();
        assert_eq!(connector.silenced.lock().clone(), vec![(id, "alice".to_string())]);

        assert!(matches!(
            aggregator.silence("missing", "alice", DEFAULT_SILENCE_DURATION).await,
            Err(AggregatorError::AlertNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_linked_silence_blocks_after_refresh() {
        let silencer: Arc<dyn ExternalSilencer> = Arc::new(TicketSilencer::new(Box::new(OpenTickets), None));
        let mut config = configuration(vec![Arc::new(FakeConnector::new("icinga", &["disk", "load"]))]);
        config.silencers = vec![silencer];

        let aggregator = Aggregator::new(config, Duration::from_secs(60), clock());
        aggregator.collect().await;
        assert_eq!(aggregator.alerts("").unwrap().alerts.len(), 2);

        let id = aggregator.alerts("").unwrap().alerts[0].alert.id.clone();
        aggregator.link_silence(&id, "4711").unwrap();

        aggregator.collect().await;
        let aggregate = aggregator.alerts("").unwrap();
        assert_eq!(aggregate.alerts.len(), 1);
        assert_eq!(aggregate.blocked.len(), 1);
        assert_eq!(aggregate.blocked[0].reason, "Silenced by 4711");
        assert_eq!(aggregator.silences().len(), 1);

        aggregator.unlink_silence("4711").unwrap();
        aggregator.collect().await;
        assert_eq!(aggregator.alerts("").unwrap().alerts.len(), 2);
        assert!(aggregator.silences().is_empty());
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_tracked_silences() {
        let connector: Arc<dyn Connector> = Arc::new(FakeConnector::new("icinga", &["disk", "load"]));
        let mut config = configuration(vec![connector.clone()]);
        config.silencers = vec![Arc::new(TicketSilencer::new(Box::new(OpenTickets), None))];

        let aggregator = Aggregator::new(config, Duration::from_secs(60), clock());
        aggregator.collect().await;
        let id = aggregator.alerts("").unwrap().alerts[0].alert.id.clone();
        aggregator.link_silence(&id, "4711").unwrap();

        // a reload builds a fresh silencer for the same tracker
        let mut reloaded = configuration(vec![connector]);
        reloaded.silencers = vec![Arc::new(TicketSilencer::new(Box::new(OpenTickets), None))];
        aggregator.reconfigure(reloaded);

        aggregator.collect().await;
        let aggregate = aggregator.alerts("").unwrap();
        assert_eq!(aggregate.blocked.len(), 1);
        assert_eq!(aggregate.blocked[0].reason, "Silenced by 4711");
        assert_eq!(aggregator.silences().len(), 1);
    }

    #[tokio::test]
    async fn test_link_without_silencer() {
        let aggregator = Aggregator::new(
            configuration(vec![Arc::new(FakeConnector::new("a", &["disk"]))]),
            Duration::from_secs(60),
            clock(),
        );
        aggregator.collect().await;
        let id = aggregator.alerts("").unwrap().alerts[0].alert.id.clone();

        assert!(matches!(
            aggregator.link_silence(&id, "1"),
            Err(AggregatorError::NoSilencer)
        ));
    }

    #[tokio::test]
    async fn test_loop_collects_and_stops() {
        let aggregator = Arc::new(Aggregator::new(
            configuration(vec![Arc::new(FakeConnector::new("a", &["disk"]))]),
            Duration::from_secs(3600),
            SystemClock::shared(),
        ));
        let mut updates = aggregator.subscribe();
        let handle = Arc::clone(&aggregator).start();

        // first tick fires immediately
        tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();

        aggregator.reconfigure(configuration(vec![Arc::new(FakeConnector::new("b", &["x", "y"]))]));
        tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(aggregator.alerts("").unwrap().alerts.len(), 2);

        aggregator.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_collection_deadline() {
        let aggregator = Aggregator::new(configuration(vec![]), Duration::from_secs(60), clock());
        assert_eq!(aggregator.collection_deadline(), Duration::from_secs(54));

        let short = Aggregator::new(configuration(vec![]), Duration::from_secs(5), clock());
        assert_eq!(short.collection_deadline(), Duration::from_secs(4));

        let tiny = Aggregator::new(configuration(vec![]), Duration::from_millis(200), clock());
        assert_eq!(tiny.collection_deadline(), Duration::from_millis(200));
    }
}
