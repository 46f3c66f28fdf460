//! Views
//!
//! A view turns datasource results into a fragment of the report in one of
//! the output formats.

pub mod alert_summary;
pub mod jenkins;

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::datasources::DatasourceManager;
use crate::plugin::{Capability, PluginError, PluginManager, Registry};
use crate::report::Report;
use crate::template::Templates;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Html,
    Md,
    Slack,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Md => "md",
            OutputFormat::Slack => "slack",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "html" => Ok(OutputFormat::Html),
            "md" | "markdown" => Ok(OutputFormat::Md),
            "slack" => Ok(OutputFormat::Slack),
            other => Err(Error::Config(format!(
                "Unknown output format '{}'. Must be 'html', 'md' or 'slack'",
                other
            ))),
        }
    }
}

/// Everything a view may use while rendering
pub struct ViewContext<'a> {
    pub report: &'a Report,
    pub datasources: &'a DatasourceManager,
    pub templates: &'a Templates,
}

#[async_trait]
pub trait View: Send + Sync {
    fn supported_formats(&self) -> &[OutputFormat] {
        &[OutputFormat::Html, OutputFormat::Md]
    }

    fn can_render(&self, format: OutputFormat) -> bool {
        self.supported_formats().contains(&format)
    }

    async fn render(&self, ctx: &ViewContext<'_>, format: OutputFormat) -> anyhow::Result<String>;
}

pub type ViewManager = PluginManager<dyn View>;

impl PluginManager<dyn View> {
    /// Render the view configured as `name` in `format`.
    pub async fn render(
        &self,
        name: &str,
        ctx: &ViewContext<'_>,
        format: OutputFormat,
    ) -> Result<String, PluginError> {
        self.invoke(name, |view| async move {
            if !view.can_render(format) {
                return Err(anyhow!("View does not support the '{}' format", format));
            }
            view.render(ctx, format).await
        })
        .await
    }
}

/// Registry with every built-in view
pub fn builtin_registry() -> Registry<dyn View> {
    Registry::new(Capability::View)
        .with("prometheus.alert_summary", alert_summary::factory)
        .with("jenkins.build_summary", jenkins::factory)
}
