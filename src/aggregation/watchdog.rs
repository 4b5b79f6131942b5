//! Staleness watchdog over the collection loop

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::Aggregator;
use crate::health::{HealthCheck, Status};

/// A snapshot older than this many intervals counts as stale
pub const STALE_INTERVALS: u32 = 3;

/// Health of the collection loop given its last completed cycle
pub fn watchdog_status(
    check_time: Option<DateTime<Utc>>,
    interval: Duration,
    active: bool,
    now: DateTime<Utc>,
) -> (Status, &'static str) {
    let Some(check_time) = check_time else {
        return (Status::OutOfService, "STARTING");
    };

    if !active {
        return (Status::Unknown, "INACTIVE");
    }

    let limit = chrono::Duration::from_std(interval * STALE_INTERVALS)
        .unwrap_or_else(|_| chrono::Duration::zero());
    if now - check_time > limit {
        (Status::Down, "OLD")
    } else {
        (Status::Up, "OK")
    }
}

/// [`HealthCheck`] reporting on an [`Aggregator`]
pub struct AggregatorHealth {
    aggregator: Arc<Aggregator>,
}

impl AggregatorHealth {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }
}

impl HealthCheck for AggregatorHealth {
    fn check(&self) -> (Status, String) {
        let (status, message) = watchdog_status(
            self.aggregator.check_time(),
            self.aggregator.interval(),
            self.aggregator.is_active(),
            self.aggregator.now(),
        );
        (status, message.to_string())
    }
}
