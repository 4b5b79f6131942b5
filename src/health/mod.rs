//! Health reporting
//!
//! A [`HealthRegistry`] is created once by the process and handed to whoever
//! needs to report or read health. Components register a [`HealthCheck`];
//! the registry evaluates all checks periodically and bubbles the worst
//! status up to the overall status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// How often registered checks are evaluated
pub const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Component status, ordered by priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Up,
    Unknown,
    OutOfService,
    Down,
}

impl Status {
    /// Bubble-up priority: Up < Unknown < OutOfService < Down
    pub fn priority(&self) -> u8 {
        match self {
            Status::Up => 0,
            Status::Unknown => 1,
            Status::OutOfService => 2,
            Status::Down => 3,
        }
    }

    /// Highest priority status of a set, `Up` for an empty set
    pub fn bubble_up<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
        statuses
            .into_iter()
            .max_by_key(Status::priority)
            .unwrap_or(Status::Up)
    }

    /// Whether the status should be served as a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::OutOfService | Status::Down)
    }
}

/// Something that can report its own health
pub trait HealthCheck: Send + Sync {
    fn check(&self) -> (Status, String);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Overall health with per-component detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: Status,
    pub components: BTreeMap<String, ComponentStatus>,
}

impl Default for HealthReport {
    fn default() -> Self {
        Self {
            status: Status::Unknown,
            components: BTreeMap::new(),
        }
    }
}

/// Owned registry of health checks and their last results
#[derive(Default)]
pub struct HealthRegistry {
    checks: RwLock<BTreeMap<String, Arc<dyn HealthCheck>>>,
    report: RwLock<HealthReport>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check under a component name, replacing any previous one
    pub fn register(&self, component: impl Into<String>, check: Arc<dyn HealthCheck>) {
        self.checks.write().insert(component.into(), check);
    }

    /// Record a status directly
    pub fn set(&self, component: &str, status: Status, message: impl Into<String>) {
        let mut report = self.report.write();
        report.components.insert(
            component.to_string(),
            ComponentStatus {
                status,
                message: message.into(),
            },
        );
        report.status = Status::bubble_up(report.components.values().map(|c| c.status));
    }

    /// Run every registered check once
    pub fn evaluate(&self) {
        let checks: Vec<(String, Arc<dyn HealthCheck>)> = self
            .checks
            .read()
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();

        for (name, check) in checks {
            let (status, message) = check.check();
            tracing::trace!(component = %name, status = ?status, message = %message, "Health checked");
            self.set(&name, status, message);
        }
    }

    pub fn report(&self) -> HealthReport {
        self.report.read().clone()
    }

    pub fn status(&self) -> Status {
        self.report.read().status
    }

    /// Evaluate checks every `interval` until `shutdown` turns true
    pub fn start(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.evaluate(),
                    _ = shutdown.wait_for(|stop| *stop) => {
                        tracing::info!("Health checker shutting down");
                        break;
                    }
                }
            }
        })
    }
}
