//! Silencing
//!
//! Two flavors exist. A [`PushSilencer`] tells the source system itself to
//! suppress an alert. An [`ExternalSilencer`] keeps the silence intent
//! locally and periodically asks an outside system (a ticket tracker) whether
//! the silence still holds.

pub mod store;
pub mod ticket;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::connectors::{Alert, ConnectorError};

pub use store::{SilenceStore, StoreError};
pub use ticket::{HttpTicketSource, Ticket, TicketSilencer, TicketSource, TrackerConfig};

/// Resolved silence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Silence {
    /// Caller chosen key, e.g. a ticket number
    pub external_id: String,
    /// Label set the silence was requested against
    pub labels: HashMap<String, String>,
    /// Current truth according to the external system
    pub silenced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Remote silencing through the source's own API
#[async_trait]
pub trait PushSilencer: Send + Sync {
    async fn silence(
        &self,
        alert: &Alert,
        duration: Duration,
        user: &str,
    ) -> Result<(), ConnectorError>;
}

/// Locally tracked silences resolved against an external system
#[async_trait]
pub trait ExternalSilencer: Send + Sync {
    fn describe(&self) -> String;

    /// Key under which a running silencer is kept across reconfiguration.
    /// Two silencers with the same identity track the same silences.
    fn identity(&self) -> String {
        self.describe()
    }

    /// All resolved silences
    fn silences(&self) -> Vec<Silence>;

    /// The richest resolved silence whose labels are a subset of `labels`
    fn silenced(&self, labels: &HashMap<String, String>) -> Option<Silence>;

    /// Record a silence. The in-memory record is kept even when persisting
    /// it fails; the error is returned for reporting.
    fn set_silence(&self, id: &str, labels: HashMap<String, String>) -> Result<(), SilenceError>;

    /// Forget a silence
    fn delete_silence(&self, id: &str) -> Result<(), SilenceError>;

    /// Re-resolve every tracked silence against the external system
    async fn refresh(&self) -> Result<(), SilenceError>;
}

/// Silencing errors
#[derive(Debug, thiserror::Error)]
pub enum SilenceError {
    #[error("Persisting silences failed: {0}")]
    Store(#[from] StoreError),

    #[error("Tracker error: {0}")]
    Tracker(String),
}

impl From<reqwest::Error> for SilenceError {
    fn from(e: reqwest::Error) -> Self {
        SilenceError::Tracker(e.to_string())
    }
}
