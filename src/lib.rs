//! Opsboard: ops status board back end
//!
//! Periodically pulls problems (alerts, tickets, pull requests, findings)
//! from many monitoring and ticketing backends, filters them through
//! rule-based dashboards and serves the result. Collection is pull-based
//! and stateless per cycle; a failing source never takes the board down.
//!
//! # Features
//!
//! - **Concurrent collection**: every source is polled in parallel under a
//!   shared deadline
//! - **Matcher language**: regex, numeric and equality matchers over
//!   descriptions, ages and labels
//! - **Dashboards**: including or excluding rule sets per board
//! - **Downtimes**: maintenance windows reported by sources suppress alerts
//! - **Silences**: pushed to the source, or tracked against tickets and
//!   persisted crash-safely
//! - **Health**: staleness watchdog behind an actuator-style endpoint
//!
//! # Example
//!
//! ```no_run
//! use opsboard::aggregation::{Aggregator, Configuration};
//! use opsboard::clock::SystemClock;
//! use std::time::Duration;
//!
//! # async fn run() {
//! let aggregator = Aggregator::new(Configuration::default(), Duration::from_secs(60), SystemClock::shared());
//! aggregator.collect().await;
//! let board = aggregator.alerts("").unwrap();
//! println!("{} active alerts", board.alerts.len());
//! # }
//! ```

pub mod aggregation;
pub mod api;
pub mod clock;
pub mod config;
pub mod connectors;
pub mod health;
pub mod rules;
pub mod silence;

// Re-export commonly used types
pub use aggregation::{Aggregate, Aggregator, AggregatorError, Configuration};
pub use connectors::{Alert, Connector, ConnectorError, State};
pub use rules::{Matcher, MatcherError, Rule};
