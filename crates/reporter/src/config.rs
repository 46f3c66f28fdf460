use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::plugin::PluginEntry;
use crate::report::Report;
use crate::{Error, Result};

pub const CONFIG_ENV: &str = "KPIREPORT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn default_title() -> String {
    "KPI Report".to_string()
}

fn default_interval_days() -> u32 {
    7
}

fn default_cols() -> u8 {
    6
}

/// The report configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_title")]
    pub title: String,

    /// Length of the report window when `start_date` is not given
    #[serde(default = "default_interval_days")]
    pub interval_days: u32,

    /// RFC 3339 timestamp or `YYYY-MM-DD`; defaults to `end_date - interval_days`
    #[serde(default)]
    pub start_date: Option<String>,

    /// RFC 3339 timestamp or `YYYY-MM-DD`; defaults to now
    #[serde(default)]
    pub end_date: Option<String>,

    #[serde(default)]
    pub datasources: IndexMap<String, PluginEntry>,

    #[serde(default)]
    pub views: IndexMap<String, ViewConfig>,

    #[serde(default)]
    pub outputs: IndexMap<String, PluginEntry>,
}

/// A view entry plus where and how it is laid out in the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(flatten)]
    pub entry: PluginEntry,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Width in a six column grid
    #[serde(default = "default_cols")]
    pub cols: u8,
}

impl ViewConfig {
    pub fn new(entry: PluginEntry) -> Self {
        Self {
            entry,
            title: None,
            description: None,
            cols: default_cols(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            interval_days: default_interval_days(),
            start_date: None,
            end_date: None,
            datasources: IndexMap::new(),
            views: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }
}

impl ReportConfig {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: ReportConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    /// Load the configuration from `path`, falling back to `KPIREPORT_CONFIG`
    /// and then `config.yaml`. Callers load `.env` first.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        tracing::info!(path = %path.display(), "Loading report configuration");
        Self::from_path(&path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_days == 0 {
            return Err(Error::Config("interval_days must be at least 1".to_string()));
        }
        for (name, view) in &self.views {
            if !(1..=6).contains(&view.cols) {
                return Err(Error::Config(format!(
                    "View '{}' has cols {}, must be between 1 and 6",
                    name, view.cols
                )));
            }
        }
        Ok(())
    }

    /// Resolve the report window relative to `now`.
    pub fn report(&self, now: DateTime<Utc>) -> Result<Report> {
        let end = match &self.end_date {
            Some(value) => parse_date(value)?,
            None => now,
        };
        let start = match &self.start_date {
            Some(value) => parse_date(value)?,
            None => end - Duration::days(i64::from(self.interval_days)),
        };
        Report::new(&self.title, start, end)
    }
}

/// Parse an RFC 3339 timestamp, or a plain date taken as midnight UTC.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            Error::Config(format!(
                "Invalid date '{}', expected YYYY-MM-DD or an RFC 3339 timestamp",
                value
            ))
        })
}
