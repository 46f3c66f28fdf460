//! Report render pass
//!
//! Builds a plugin runtime per capability from the configuration, renders
//! every view in every format an output needs, lays the sections out, and
//! hands the result to each output driver. Broken sections render their
//! diagnostics instead of stopping the report.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::alerts::Window;
use crate::config::{ReportConfig, ViewConfig};
use crate::datasources::{self, Datasource, DatasourceManager};
use crate::metrics;
use crate::outputs::{self, OutputDriver, OutputManager};
use crate::plugin::{Capability, PluginError, PluginErrorKind, PluginManager, Registry};
use crate::template::Templates;
use crate::views::{self, OutputFormat, View, ViewContext, ViewManager};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Report {
    pub fn new(
        title: impl Into<String>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<Self> {
        if start_date >= end_date {
            return Err(Error::Config(format!(
                "Report start {} must be before its end {}",
                start_date, end_date
            )));
        }
        Ok(Self {
            title: title.into(),
            start_date,
            end_date,
        })
    }

    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }

    pub fn range(&self) -> Window {
        Window::new(self.start_date, self.end_date)
    }
}

/// The rendered report, one document per output format
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Content(BTreeMap<OutputFormat, String>);

impl Content {
    pub fn get(&self, format: OutputFormat) -> Option<&str> {
        self.0.get(&format).map(String::as_str)
    }

    pub fn insert(&mut self, format: OutputFormat, text: String) {
        self.0.insert(format, text);
    }

    pub fn formats(&self) -> impl Iterator<Item = OutputFormat> + '_ {
        self.0.keys().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionError {
    /// `configuration` when the view entry itself is wrong, otherwise `plugin`
    pub category: &'static str,
    pub message: String,
}

impl SectionError {
    fn from_plugin_error(err: &PluginError) -> Self {
        let invalid_resolution = matches!(
            err.find_cause::<Error>(),
            Some(Error::InvalidResolution(_))
        );
        let category = if invalid_resolution || err.kind() == PluginErrorKind::Configuration {
            "configuration"
        } else {
            "plugin"
        };
        Self {
            category,
            message: format!("{:#}", err.cause()),
        }
    }
}

/// One view's slot in the layout
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub cols: u8,
    pub body: Option<String>,
    pub errors: Vec<SectionError>,
    pub unsupported: bool,
}

impl Section {
    fn new(id: &str, layout: Option<&ViewConfig>) -> Self {
        Self {
            id: id.to_string(),
            title: layout.and_then(|l| l.title.clone()),
            description: layout.and_then(|l| l.description.clone()),
            cols: layout.map(|l| l.cols).unwrap_or(6),
            body: None,
            errors: Vec::new(),
            unsupported: false,
        }
    }
}

#[derive(Serialize)]
struct LayoutContext<'a> {
    report: &'a Report,
    format: OutputFormat,
    sections: &'a [Section],
}

/// The factories available to a render pass
pub struct Registries {
    pub datasources: Arc<Registry<dyn Datasource>>,
    pub views: Arc<Registry<dyn View>>,
    pub outputs: Arc<Registry<dyn OutputDriver>>,
}

impl Registries {
    pub fn builtin() -> Self {
        Self {
            datasources: Arc::new(datasources::builtin_registry()),
            views: Arc::new(views::builtin_registry()),
            outputs: Arc::new(outputs::builtin_registry()),
        }
    }
}

/// What a render pass produced and everything that went wrong along the way
#[derive(Debug)]
pub struct RenderSummary {
    pub content: Content,
    /// Outputs that delivered the report
    pub delivered: Vec<String>,
    pub errors: BTreeMap<Capability, BTreeMap<String, Vec<PluginError>>>,
}

impl RenderSummary {
    pub fn error_count(&self) -> usize {
        self.errors
            .values()
            .flat_map(|by_name| by_name.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }
}

pub struct ReportRenderer {
    report: Arc<Report>,
    templates: Templates,
    layout: IndexMap<String, ViewConfig>,
    datasources: DatasourceManager,
    views: ViewManager,
    outputs: OutputManager,
}

impl ReportRenderer {
    pub fn new(
        config: &ReportConfig,
        report: Report,
        registries: &Registries,
        templates: Templates,
    ) -> Self {
        let report = Arc::new(report);
        let view_entries = config
            .views
            .iter()
            .map(|(name, view)| (name.clone(), view.entry.clone()))
            .collect();

        Self {
            datasources: PluginManager::new(
                Arc::clone(&registries.datasources),
                Arc::clone(&report),
                config.datasources.clone(),
            ),
            views: PluginManager::new(
                Arc::clone(&registries.views),
                Arc::clone(&report),
                view_entries,
            ),
            outputs: PluginManager::new(
                Arc::clone(&registries.outputs),
                Arc::clone(&report),
                config.outputs.clone(),
            ),
            layout: config.views.clone(),
            templates,
            report,
        }
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn datasources(&self) -> &DatasourceManager {
        &self.datasources
    }

    pub fn views(&self) -> &ViewManager {
        &self.views
    }

    pub fn outputs(&self) -> &OutputManager {
        &self.outputs
    }

    /// Union of the formats supported by every output that resolves, in
    /// configuration order.
    pub fn required_formats(&self) -> Vec<OutputFormat> {
        let mut formats = Vec::new();
        for name in self.outputs.names() {
            let Ok(driver) = self.outputs.resolve(name) else {
                continue;
            };
            for format in driver.supported_formats() {
                if !formats.contains(format) {
                    formats.push(*format);
                }
            }
        }
        formats
    }

    /// Render one section of the report.
    pub async fn render_section(&self, name: &str, format: OutputFormat) -> Section {
        let mut section = Section::new(name, self.layout.get(name));

        let view = match self.views.resolve(name) {
            Ok(view) => view,
            Err(err) => {
                section.errors.push(SectionError::from_plugin_error(&err));
                metrics::VIEWS_RENDERED_TOTAL
                    .with_label_values(&[format.as_str(), "failed"])
                    .inc();
                return section;
            }
        };

        if !view.can_render(format) {
            section.unsupported = true;
            metrics::VIEWS_RENDERED_TOTAL
                .with_label_values(&[format.as_str(), "unsupported"])
                .inc();
            return section;
        }

        let ctx = ViewContext {
            report: &self.report,
            datasources: &self.datasources,
            templates: &self.templates,
        };
        match self.views.render(name, &ctx, format).await {
            Ok(body) => {
                section.body = Some(body);
                metrics::VIEWS_RENDERED_TOTAL
                    .with_label_values(&[format.as_str(), "rendered"])
                    .inc();
            }
            Err(err) => {
                section.errors.push(SectionError::from_plugin_error(&err));
                metrics::VIEWS_RENDERED_TOTAL
                    .with_label_values(&[format.as_str(), "failed"])
                    .inc();
            }
        }
        section
    }

    /// Render every view into the layout of each format.
    pub async fn render_content(&self, formats: &[OutputFormat]) -> Result<Content> {
        let mut content = Content::default();
        for &format in formats {
            let mut sections = Vec::new();
            for name in self.views.names() {
                sections.push(self.render_section(name, format).await);
            }

            let text = self.templates.render_report(
                format,
                &LayoutContext {
                    report: &self.report,
                    format,
                    sections: &sections,
                },
            )?;
            content.insert(format, text);
        }
        Ok(content)
    }

    /// Render the report and deliver it through every configured output.
    pub async fn run(&self) -> Result<RenderSummary> {
        let formats = self.required_formats();
        if formats.is_empty() {
            warn!("No output could be resolved, nothing will be rendered");
        }
        info!(
            title = %self.report.title,
            start = %self.report.start_date,
            end = %self.report.end_date,
            formats = ?formats,
            "Rendering report"
        );

        let content = self.render_content(&formats).await?;

        let mut delivered = Vec::new();
        for name in self.outputs.names() {
            if self.outputs.render_output(name, &content).await.is_ok() {
                delivered.push(name.to_string());
            }
        }

        metrics::REPORTS_RENDERED_TOTAL.inc();

        let summary = RenderSummary {
            content,
            delivered,
            errors: BTreeMap::from([
                (Capability::Datasource, self.datasources.all_errors()),
                (Capability::View, self.views.all_errors()),
                (Capability::Output, self.outputs.all_errors()),
            ]),
        };
        info!(
            delivered = summary.delivered.len(),
            errors = summary.error_count(),
            "Report rendered"
        );
        Ok(summary)
    }
}
