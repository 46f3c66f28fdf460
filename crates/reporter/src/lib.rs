pub mod alerts;
pub mod config;
pub mod datasources;
pub mod metrics;
pub mod outputs;
pub mod plugin;
pub mod report;
pub mod template;
pub mod views;

use thiserror::Error;

pub use alerts::{AlertReport, AlertSummary, Resolution, TimelineEntry, Window};
pub use config::ReportConfig;
pub use plugin::{Capability, PluginError, PluginErrorKind, PluginManager, Registry};
pub use report::{Content, Registries, RenderSummary, Report, ReportRenderer};
pub use views::OutputFormat;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),
    #[error("No {capability} plugin named '{key}' (available: {available})")]
    UnknownCapability {
        capability: Capability,
        key: String,
        available: String,
    },
    #[error("Upstream query failed: {0}")]
    UpstreamQuery(String),
    #[error("Template error: {0}")]
    Template(String),
    #[error("Output error: {0}")]
    Output(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
