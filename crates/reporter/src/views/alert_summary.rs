//! Prometheus Alert Summary
//!
//! Lists the alerts that fired during the report window, longest total
//! firing time first, with an optional timeline of when they fired.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::info;

use super::{OutputFormat, View, ViewContext};
use crate::alerts::{
    build_alert_report, AggregationOptions, AlertReport, Resolution, Window, ALERTS_QUERY,
};
use crate::datasources::{DatasourceManager, Query};
use crate::plugin::{PluginArgs, PluginContext};

const TEMPLATE: &str = "prometheus_alert_summary";

fn default_datasource() -> String {
    "prometheus".to_string()
}

fn default_resolution() -> String {
    "15m".to_string()
}

fn default_ignore_labels() -> Vec<String> {
    vec!["instance".to_string(), "job".to_string()]
}

fn default_show_timeline() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AlertSummaryArgs {
    /// ID of the Prometheus datasource to query
    #[serde(default = "default_datasource")]
    datasource: String,
    #[serde(default = "default_resolution")]
    resolution: String,
    /// Labels hidden from display; alerts carrying them are still listed
    #[serde(default = "default_ignore_labels")]
    ignore_labels: Vec<String>,
    /// Labels an alert must carry to be listed
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default = "default_show_timeline")]
    show_timeline: bool,
}

pub struct PrometheusAlertSummary {
    datasource: String,
    options: AggregationOptions,
    show_timeline: bool,
    range: Window,
    report: OnceCell<AlertReport>,
}

pub fn factory(ctx: &PluginContext, args: PluginArgs) -> Result<Arc<dyn View>> {
    let args: AlertSummaryArgs = args.parse()?;
    let resolution: Resolution = args.resolution.parse()?;

    let mut options = AggregationOptions::new(resolution);
    options.ignore_labels = args.ignore_labels;
    options.labels = args.labels.unwrap_or_default();

    Ok(Arc::new(PrometheusAlertSummary::new(
        args.datasource,
        options,
        args.show_timeline,
        ctx.report.range(),
    )))
}

impl PrometheusAlertSummary {
    pub fn new(
        datasource: String,
        options: AggregationOptions,
        show_timeline: bool,
        range: Window,
    ) -> Self {
        Self {
            datasource,
            options,
            show_timeline,
            range,
            report: OnceCell::new(),
        }
    }

    /// Query and aggregate once; every format renders the same result.
    pub async fn alert_report(&self, datasources: &DatasourceManager) -> Result<&AlertReport> {
        self.report
            .get_or_try_init(|| async {
                let step = self.options.resolution.duration().to_std()?;
                let samples = datasources
                    .query(&self.datasource, Query::range(ALERTS_QUERY, step))
                    .await?
                    .into_time_series()?;

                let report =
                    build_alert_report(&samples, &self.options, &self.range, self.show_timeline);
                info!(
                    datasource = %self.datasource,
                    samples = samples.len(),
                    alerts = report.summary.len(),
                    "Aggregated alert windows"
                );
                Ok::<_, anyhow::Error>(report)
            })
            .await
    }
}

#[async_trait]
impl View for PrometheusAlertSummary {
    fn supported_formats(&self) -> &[OutputFormat] {
        &[OutputFormat::Html, OutputFormat::Md, OutputFormat::Slack]
    }

    async fn render(&self, ctx: &ViewContext<'_>, format: OutputFormat) -> Result<String> {
        let report = self.alert_report(ctx.datasources).await?;
        Ok(ctx.templates.render_view(TEMPLATE, format, report)?)
    }
}
