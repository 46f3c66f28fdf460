use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::OutputDriver;
use crate::plugin::{PluginArgs, PluginContext};
use crate::report::Content;
use crate::views::OutputFormat;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StdoutArgs {
    #[serde(default)]
    format: Option<String>,
}

/// Prints the report in one format to standard output
#[derive(Debug)]
pub struct StdoutOutput {
    format: OutputFormat,
}

pub fn factory(_ctx: &PluginContext, args: PluginArgs) -> Result<Arc<dyn OutputDriver>> {
    let args: StdoutArgs = args.parse()?;
    let format = match args.format {
        Some(format) => format.parse()?,
        None => OutputFormat::Md,
    };
    Ok(Arc::new(StdoutOutput::new(format)))
}

impl StdoutOutput {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn write_to<W: Write>(&self, content: &Content, writer: &mut W) -> Result<()> {
        let text = content
            .get(self.format)
            .ok_or_else(|| anyhow!("No {} content was rendered", self.format))?;
        writeln!(writer, "{}", text)?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl OutputDriver for StdoutOutput {
    fn supported_formats(&self) -> &[OutputFormat] {
        std::slice::from_ref(&self.format)
    }

    async fn render_output(&self, content: &Content) -> Result<()> {
        let stdout = std::io::stdout();
        self.write_to(content, &mut stdout.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Capability, PluginEntry, PluginErrorKind, PluginManager};
    use crate::report::Report;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn content() -> Content {
        let mut content = Content::default();
        content.insert(OutputFormat::Md, "# Weekly".to_string());
        content.insert(OutputFormat::Html, "<h1>Weekly</h1>".to_string());
        content
    }

    #[test]
    fn test_writes_selected_format() {
        let output = StdoutOutput::new(OutputFormat::Html);
        let mut buffer = Vec::new();
        output.write_to(&content(), &mut buffer).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "<h1>Weekly</h1>\n");
        assert_eq!(output.supported_formats(), &[OutputFormat::Html]);
    }

    #[test]
    fn test_missing_format() {
        let output = StdoutOutput::new(OutputFormat::Slack);
        let mut buffer = Vec::new();
        assert!(output.write_to(&content(), &mut buffer).is_err());
    }

    #[test]
    fn test_factory_format() {
        let report = Arc::new(
            Report::new(
                "Test",
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap(),
            )
            .unwrap(),
        );
        let manager: PluginManager<dyn OutputDriver> = PluginManager::new(
            Arc::new(crate::outputs::builtin_registry()),
            report,
            [
                ("default".to_string(), PluginEntry::new("stdout")),
                (
                    "html".to_string(),
                    PluginEntry::new("stdout").with_args(json!({"format": "html"})),
                ),
                (
                    "xml".to_string(),
                    PluginEntry::new("stdout").with_args(json!({"format": "xml"})),
                ),
            ]
            .into_iter()
            .collect(),
        );

        let default = manager.resolve("default").unwrap();
        assert_eq!(default.supported_formats(), &[OutputFormat::Md]);
        let html = manager.resolve("html").unwrap();
        assert!(html.can_render(OutputFormat::Html));

        let err = manager.resolve("xml").err().unwrap();
        assert_eq!(err.kind(), PluginErrorKind::Construction);
        assert_eq!(err.capability(), Capability::Output);
    }
}
