//! Configuration
//!
//! Process settings come from the environment, board configuration from
//! TOML: one main file and a directory of dashboard files.

pub mod dashboard;
pub mod loader;

use std::path::PathBuf;
use std::time::Duration;

pub use dashboard::{Dashboard, DashboardMode, DEFAULT_DASHBOARD};
pub use loader::{ConfigLoader, FileConfig, LoadedConfig, MainSection};

/// Process settings read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub config_file: PathBuf,
    pub dashboard_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8988,
            config_file: PathBuf::from("/etc/opsboard.toml"),
            dashboard_dir: PathBuf::from("/etc/opsboard.d"),
        }
    }
}

impl Settings {
    /// Read `OPSBOARD_HOST`, `OPSBOARD_PORT`, `OPSBOARD_CONF` and
    /// `OPSBOARD_DASHBOARDS`, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            host: lookup("OPSBOARD_HOST").unwrap_or(defaults.host),
            port: lookup("OPSBOARD_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            config_file: lookup("OPSBOARD_CONF")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_file),
            dashboard_dir: lookup("OPSBOARD_DASHBOARDS")
                .map(PathBuf::from)
                .unwrap_or(defaults.dashboard_dir),
        }
    }

    pub fn loader(&self) -> ConfigLoader {
        ConfigLoader::new(&self.config_file, &self.dashboard_dir)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parsing {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Interval used when the configuration names none
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
