//! Template rendering using Tera
//!
//! Every view and the report layout ship a template per output format. They
//! are compiled into the binary and registered under `<name>.<format>`.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tera::{Context, Tera};

use crate::views::OutputFormat;
use crate::{Error, Result};

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("report.html", include_str!("../templates/report.html")),
    ("report.md", include_str!("../templates/report.md")),
    ("report.slack", include_str!("../templates/report.slack")),
    (
        "prometheus_alert_summary.html",
        include_str!("../templates/prometheus_alert_summary.html"),
    ),
    (
        "prometheus_alert_summary.md",
        include_str!("../templates/prometheus_alert_summary.md"),
    ),
    (
        "prometheus_alert_summary.slack",
        include_str!("../templates/prometheus_alert_summary.slack"),
    ),
    (
        "jenkins_build_summary.html",
        include_str!("../templates/jenkins_build_summary.html"),
    ),
    (
        "jenkins_build_summary.md",
        include_str!("../templates/jenkins_build_summary.md"),
    ),
    (
        "jenkins_build_summary.slack",
        include_str!("../templates/jenkins_build_summary.slack"),
    ),
];

pub struct Templates {
    tera: Tera,
}

impl Templates {
    /// Templates bundled with the binary
    pub fn builtin() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(BUILTIN_TEMPLATES.iter().copied())
            .map_err(|e| Error::Template(format!("Failed to parse templates: {}", e)))?;
        tera.register_filter("duration", duration_filter);
        Ok(Self { tera })
    }

    pub fn has(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    /// Render a registered template with the fields of `value` as context
    pub fn render<T: Serialize>(&self, name: &str, value: &T) -> Result<String> {
        let context = Context::from_serialize(value)
            .map_err(|e| Error::Template(format!("Invalid context for '{}': {}", name, e)))?;
        self.tera
            .render(name, &context)
            .map_err(|e| Error::Template(format!("Failed to render '{}': {:?}", name, e)))
    }

    pub fn render_view<T: Serialize>(
        &self,
        view: &str,
        format: OutputFormat,
        value: &T,
    ) -> Result<String> {
        self.render(&format!("{}.{}", view, format), value)
    }

    pub fn render_report<T: Serialize>(&self, format: OutputFormat, value: &T) -> Result<String> {
        self.render_view("report", format, value)
    }
}

/// Format a number of seconds as e.g. `1d 2h` or `5m 30s`.
fn duration_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let seconds = value
        .as_f64()
        .ok_or_else(|| tera::Error::msg(format!("duration filter expects seconds, got {}", value)))?;
    Ok(Value::String(format_duration(seconds.max(0.0).round() as u64)))
}

fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "0s".to_string();
    }

    let units = [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)];
    let mut remaining = seconds;
    let mut parts = Vec::new();
    for (suffix, size) in units {
        let count = remaining / size;
        remaining %= size;
        if count > 0 {
            parts.push(format!("{}{}", count, suffix));
        }
        // Two units are precise enough for a summary
        if parts.len() == 2 {
            break;
        }
    }
    parts.join(" ")
}
