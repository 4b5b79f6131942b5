use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::{ConfigError, Dashboard, DashboardMode, DEFAULT_DASHBOARD, DEFAULT_INTERVAL};
use crate::aggregation::{BoardLayout, Configuration};
use crate::connectors::{AlertmanagerConfig, AlertmanagerConnector, Connector};
use crate::rules::Rule;
use crate::silence::{ExternalSilencer, TicketSilencer, TrackerConfig};

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL.as_secs()
}

/// `[main]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MainSection {
    /// Collection interval in seconds
    #[serde(default = "default_interval_secs", rename = "interval")]
    pub interval_secs: u64,
    #[serde(flatten)]
    pub layout: BoardLayout,
}

impl Default for MainSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            layout: BoardLayout::default(),
        }
    }
}

/// Main configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub main: MainSection,
    /// Mode of the default dashboard
    #[serde(default)]
    pub mode: DashboardMode,
    /// Rules of the default dashboard
    #[serde(default, rename = "rule")]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub alertmanager: Vec<AlertmanagerConfig>,
    #[serde(default)]
    pub tracker: Vec<TrackerConfig>,
}

/// Fully loaded board configuration
pub struct LoadedConfig {
    pub interval: Duration,
    pub configuration: Configuration,
}

/// Reads the main file and the dashboard directory
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    main_path: PathBuf,
    dashboard_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>, D: AsRef<Path>>(main_path: P, dashboard_dir: D) -> Self {
        Self {
            main_path: main_path.as_ref().to_path_buf(),
            dashboard_dir: dashboard_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load_main(&self) -> Result<FileConfig, ConfigError> {
        let text = read(&self.main_path)?;
        parse(&self.main_path, &text)
    }

    /// Dashboards of the dashboard directory, ordered by file name. A
    /// missing directory holds no dashboards.
    pub fn load_dashboards(&self) -> Result<Vec<Dashboard>, ConfigError> {
        if !self.dashboard_dir.exists() {
            tracing::debug!(dir = %self.dashboard_dir.display(), "No dashboard directory");
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dashboard_dir).map_err(|source| ConfigError::Io {
            path: self.dashboard_dir.clone(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut dashboards = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            let mut dashboard: Dashboard = parse(&path, &read(&path)?)?;
            dashboard.name = name;
            tracing::debug!(
                dashboard = %dashboard.name,
                mode = %dashboard.mode,
                rules = dashboard.rules.len(),
                "Loaded dashboard"
            );
            dashboards.push(dashboard);
        }

        Ok(dashboards)
    }

    /// Load and validate everything, building connectors and silencers
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let file = self.load_main()?;
        let dashboards = self.load_dashboards()?;
        build(file, dashboards)
    }
}

/// Turn parsed configuration into a runnable one
pub fn build(file: FileConfig, extra: Vec<Dashboard>) -> Result<LoadedConfig, ConfigError> {
    if file.main.interval_secs == 0 {
        return Err(ConfigError::Invalid("interval must be positive".to_string()));
    }

    let mut tags = HashSet::new();
    for am in &file.alertmanager {
        if !tags.insert(am.tag.as_str()) {
            return Err(ConfigError::Invalid(format!("duplicate connector tag '{}'", am.tag)));
        }
    }

    let mut dashboards = vec![Dashboard {
        name: DEFAULT_DASHBOARD.to_string(),
        mode: file.mode,
        rules: file.rules,
        tags: Vec::new(),
    }];
    for dashboard in extra {
        if dashboard.name == DEFAULT_DASHBOARD || dashboards.iter().any(|d| d.name == dashboard.name) {
            return Err(ConfigError::Invalid(format!(
                "duplicate dashboard '{}'",
                dashboard.name
            )));
        }
        dashboards.push(dashboard);
    }

    let connectors: Vec<Arc<dyn Connector>> = file
        .alertmanager
        .into_iter()
        .map(|config| Arc::new(AlertmanagerConnector::new(config)) as Arc<dyn Connector>)
        .collect();

    let silencers: Vec<Arc<dyn ExternalSilencer>> = file
        .tracker
        .iter()
        .map(|config| Arc::new(TicketSilencer::from_config(config)) as Arc<dyn ExternalSilencer>)
        .collect();

    Ok(LoadedConfig {
        interval: Duration::from_secs(file.main.interval_secs),
        configuration: Configuration {
            connectors,
            silencers,
            dashboards,
            layout: file.main.layout,
        },
    })
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse<T: serde::de::DeserializeOwned>(path: &Path, text: &str) -> Result<T, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MAIN: &str = r#"
mode = "excluding"

[main]
interval = 30
group_alerts = true
where = ["Hostname"]

[[rule]]
description = "Non-Escalated"
when = "< 86400"
what = ": Update"
[rule.label]
Type = "PullRequest"

[[alertmanager]]
tag = "prometheus"
url = "http://alertmanager:9093"

[[tracker]]
url = "https://redmine.example.com"
api_key = "secret"
"#;

    fn write_setup() -> (TempDir, ConfigLoader) {
        let temp_dir = TempDir::new().unwrap();
        let main = temp_dir.path().join("opsboard.toml");
        let dir = temp_dir.path().join("opsboard.d");
        fs::write(&main, MAIN).unwrap();
        fs::create_dir(&dir).unwrap();
        fs::write(
            dir.join("ci.toml"),
            "mode = \"including\"\ntags = [\"prometheus\"]\n[[rule]]\ndescription = \"builds\"\nwhat = \"build\"\n",
        )
        .unwrap();
        fs::write(dir.join("README.md"), "not a dashboard").unwrap();

        let loader = ConfigLoader::new(main, dir);
        (temp_dir, loader)
    }

    #[test]
    fn test_parse_main_file() {
        let file: FileConfig = parse(Path::new("opsboard.toml"), MAIN).unwrap();
        assert_eq!(file.main.interval_secs, 30);
        assert!(file.main.layout.group_alerts);
        assert_eq!(file.main.layout.location_labels, vec!["Hostname".to_string()]);
        assert_eq!(file.mode, DashboardMode::Exclude);
        assert_eq!(file.rules.len(), 1);
        assert_eq!(file.alertmanager[0].tag, "prometheus");
        assert_eq!(file.tracker[0].api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_defaults_for_empty_file() {
        let file: FileConfig = parse(Path::new("empty.toml"), "").unwrap();
        assert_eq!(file.main, MainSection::default());
        assert_eq!(file.main.layout.location_labels.len(), 5);
        assert!(file.alertmanager.is_empty());
    }

    #[test]
    fn test_load_builds_everything() {
        let (_temp_dir, loader) = write_setup();
        let loaded = loader.load().unwrap();

        assert_eq!(loaded.interval, Duration::from_secs(30));
        let configuration = loaded.configuration;
        assert_eq!(configuration.connectors.len(), 1);
        assert_eq!(configuration.connectors[0].tag(), "prometheus");
        assert_eq!(configuration.silencers.len(), 1);

        let names: Vec<&str> = configuration.dashboards.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["", "ci"]);
        assert_eq!(configuration.dashboards[1].mode, DashboardMode::Include);
    }

    #[test]
    fn test_missing_dashboard_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::new(temp_dir.path().join("x.toml"), temp_dir.path().join("absent"));
        assert!(loader.load_dashboards().unwrap().is_empty());
        assert!(matches!(loader.load(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_invalid_matcher_rejects_file() {
        let err = parse::<FileConfig>(
            Path::new("bad.toml"),
            "[[rule]]\ndescription = \"broken\"\nwhat = \"~= (unclosed\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_duplicate_tags_rejected() {
        let file: FileConfig = parse(
            Path::new("dup.toml"),
            "[[alertmanager]]\ntag = \"a\"\nurl = \"http://x\"\n[[alertmanager]]\ntag = \"a\"\nurl = \"http://y\"\n",
        )
        .unwrap();
        assert!(matches!(build(file, Vec::new()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let file: FileConfig = parse(Path::new("zero.toml"), "[main]\ninterval = 0\n").unwrap();
        assert!(matches!(build(file, Vec::new()), Err(ConfigError::Invalid(_))));
    }
}
