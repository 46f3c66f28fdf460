use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use kpi_reporter::datasources::{self, Datasource, Query, QueryResult, Sample};
use kpi_reporter::outputs::{self, OutputDriver};
use kpi_reporter::plugin::{PluginArgs, PluginContext, PluginErrorKind};
use kpi_reporter::template::Templates;
use kpi_reporter::views::{self, View, ViewContext};
use kpi_reporter::{Capability, Content, OutputFormat, ReportConfig, ReportRenderer, Registries};

const CONFIG: &str = r#"
title: Ops Weekly
start_date: 2024-01-01
end_date: 2024-01-02
datasources:
  prometheus:
    plugin: fake_prometheus
views:
  alerts:
    plugin: prometheus.alert_summary
    title: Alerts
    args:
      resolution: 1h
  bad_resolution:
    plugin: prometheus.alert_summary
    title: Bad Resolution
    args:
      resolution: fortnightly
  no_plugin:
    title: Broken
  unknown:
    plugin: does.not.exist
  builds:
    plugin: jenkins.build_summary
  html_only:
    plugin: html_only
    title: Chart
outputs:
  capture:
    plugin: capture
  broken:
    plugin: capture
    args:
      fail: true
"#;

struct FakePrometheus {
    queries: Arc<AtomicUsize>,
}

#[async_trait]
impl Datasource for FakePrometheus {
    async fn query(&self, query: &Query) -> Result<QueryResult> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        assert!(matches!(query, Query::Range { expr, .. } if expr == "ALERTS"));

        let firing = |hour: u32| Sample {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            labels: [
                ("alertname", "DiskFull"),
                ("alertstate", "firing"),
                ("device", "/dev/sda1"),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            value: 1.0,
        };
        Ok(QueryResult::TimeSeries(vec![firing(1), firing(2)]))
    }
}

struct HtmlOnly;

#[async_trait]
impl View for HtmlOnly {
    fn supported_formats(&self) -> &[OutputFormat] {
        &[OutputFormat::Html]
    }

    async fn render(&self, _ctx: &ViewContext<'_>, _format: OutputFormat) -> Result<String> {
        Ok("<svg></svg>".to_string())
    }
}

struct Capture {
    delivered: Arc<Mutex<Vec<Content>>>,
    fail: bool,
}

#[async_trait]
impl OutputDriver for Capture {
    async fn render_output(&self, content: &Content) -> Result<()> {
        if self.fail {
            return Err(anyhow!("mail server unreachable"));
        }
        self.delivered.lock().push(content.clone());
        Ok(())
    }
}

struct Harness {
    registries: Registries,
    queries: Arc<AtomicUsize>,
    delivered: Arc<Mutex<Vec<Content>>>,
}

fn harness() -> Harness {
    let queries = Arc::new(AtomicUsize::new(0));
    let delivered = Arc::new(Mutex::new(Vec::new()));

    let datasource_queries = Arc::clone(&queries);
    let datasources = datasources::builtin_registry().with(
        "fake_prometheus",
        move |_: &PluginContext, _: PluginArgs| -> Result<Arc<dyn Datasource>> {
            Ok(Arc::new(FakePrometheus {
                queries: Arc::clone(&datasource_queries),
            }))
        },
    );

    let views = views::builtin_registry().with(
        "html_only",
        |_: &PluginContext, _: PluginArgs| -> Result<Arc<dyn View>> { Ok(Arc::new(HtmlOnly)) },
    );

    let output_store = Arc::clone(&delivered);
    let outputs = outputs::builtin_registry().with(
        "capture",
        move |_: &PluginContext, args: PluginArgs| -> Result<Arc<dyn OutputDriver>> {
            let fail = args.get("fail").and_then(|v| v.as_bool()).unwrap_or(false);
            Ok(Arc::new(Capture {
                delivered: Arc::clone(&output_store),
                fail,
            }))
        },
    );

    Harness {
        registries: Registries {
            datasources: Arc::new(datasources),
            views: Arc::new(views),
            outputs: Arc::new(outputs),
        },
        queries,
        delivered,
    }
}

fn renderer(harness: &Harness) -> ReportRenderer {
    let config = ReportConfig::from_yaml(CONFIG).unwrap();
    let report = config.report(Utc::now()).unwrap();
    ReportRenderer::new(
        &config,
        report,
        &harness.registries,
        Templates::builtin().unwrap(),
    )
}

#[tokio::test]
async fn test_render_pass_with_failing_sections() {
    let harness = harness();
    let renderer = renderer(&harness);

    let summary = renderer.run().await.unwrap();

    // Both outputs want the default formats
    assert_eq!(
        summary.content.formats().collect::<Vec<_>>(),
        vec![OutputFormat::Html, OutputFormat::Md]
    );
    assert_eq!(summary.delivered, vec!["capture".to_string()]);
    assert_eq!(harness.delivered.lock().len(), 1);

    // One query serves every format of the alert summary
    assert_eq!(harness.queries.load(Ordering::SeqCst), 1);

    let md = summary.content.get(OutputFormat::Md).unwrap();
    assert!(md.contains("# Ops Weekly"));
    assert!(md.contains("2024-01-01 to 2024-01-02"));
    assert!(md.contains("## Alerts"));
    assert!(md.contains("DiskFull"));
    assert!(md.contains("device=/dev/sda1"));
    assert!(md.contains("**configuration error**: Invalid resolution"));
    assert!(md.contains("Missing required 'plugin' key"));
    assert!(md.contains("does.not.exist"));
    assert!(md.contains("**plugin error**"));
    assert!(md.contains("_This section is not available in this format._"));

    let html = summary.content.get(OutputFormat::Html).unwrap();
    assert!(html.contains("<svg></svg>"));
    assert!(html.contains("id=\"alerts\""));

    // Sections keep configuration order
    let alerts_at = md.find("## Alerts").unwrap();
    let bad_at = md.find("## Bad Resolution").unwrap();
    let broken_at = md.find("## Broken").unwrap();
    assert!(alerts_at < bad_at && bad_at < broken_at);
}

#[tokio::test]
async fn test_render_pass_attributes_errors() {
    let harness = harness();
    let renderer = renderer(&harness);
    let summary = renderer.run().await.unwrap();

    let view_errors = &summary.errors[&Capability::View];
    assert!(!view_errors.contains_key("alerts"));
    assert!(!view_errors.contains_key("html_only"));

    // Failed constructions are memoized and recorded once across formats
    assert_eq!(view_errors["bad_resolution"].len(), 1);
    assert_eq!(view_errors["bad_resolution"][0].kind(), PluginErrorKind::Construction);
    assert_eq!(view_errors["no_plugin"].len(), 1);
    assert_eq!(view_errors["no_plugin"][0].kind(), PluginErrorKind::Configuration);
    assert_eq!(view_errors["unknown"][0].kind(), PluginErrorKind::Configuration);

    // The Jenkins view has no datasource; each render attempt fails
    assert_eq!(view_errors["builds"].len(), 2);
    assert!(view_errors["builds"]
        .iter()
        .all(|e| e.kind() == PluginErrorKind::Invocation));
    let datasource_errors = &summary.errors[&Capability::Datasource];
    assert_eq!(datasource_errors["jenkins"].len(), 1);
    assert_eq!(datasource_errors["jenkins"][0].kind(), PluginErrorKind::Configuration);

    let output_errors = &summary.errors[&Capability::Output];
    assert_eq!(output_errors["broken"].len(), 1);
    assert_eq!(output_errors["broken"][0].kind(), PluginErrorKind::Invocation);
    assert!(output_errors["broken"][0].to_string().contains("mail server unreachable"));

    assert_eq!(summary.error_count(), 7);
    assert!(!summary.is_clean());
}

#[tokio::test]
async fn test_only_needed_formats_are_rendered() {
    let harness = harness();
    let config = ReportConfig::from_yaml(
        r#"
start_date: 2024-01-01
end_date: 2024-01-08
views:
  chart:
    plugin: html_only
outputs:
  chat:
    plugin: stdout
    args:
      format: slack
"#,
    )
    .unwrap();
    let report = config.report(Utc::now()).unwrap();
    let renderer = ReportRenderer::new(
        &config,
        report,
        &harness.registries,
        Templates::builtin().unwrap(),
    );

    assert_eq!(renderer.required_formats(), vec![OutputFormat::Slack]);
    let content = renderer.render_content(&[OutputFormat::Slack]).await.unwrap();
    let slack = content.get(OutputFormat::Slack).unwrap();
    assert!(slack.contains("*KPI Report*"));
    assert!(slack.contains("Not available in Slack"));
    assert!(content.get(OutputFormat::Md).is_none());
}
