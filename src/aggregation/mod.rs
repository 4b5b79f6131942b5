//! Alert aggregation
//!
//! Collection, per-dashboard classification, downtime reconciliation and
//! the staleness watchdog.

pub mod aggregator;
pub mod classify;
pub mod downtime;
pub mod watchdog;

pub use aggregator::{
    Aggregator, AggregatorError, Configuration, CycleReport, DEFAULT_SILENCE_DURATION,
};
pub use classify::{
    build_aggregate, where_of, Aggregate, AlertGroup, BlockedAlert, BoardAlert, BoardLayout,
    CollectionFailure, DowntimedAlert, SourceResult,
};
pub use downtime::{downtime_description, downtime_rules, nice_date};
pub use watchdog::{watchdog_status, AggregatorHealth};
