//! Static site output
//!
//! Writes the HTML report as `index.html` and the Markdown report as
//! `report.md` into a directory, ready to be served or archived.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::OutputDriver;
use crate::plugin::{PluginArgs, PluginContext};
use crate::report::Content;
use crate::views::OutputFormat;
use crate::Error;

const FILES: &[(OutputFormat, &str)] = &[
    (OutputFormat::Html, "index.html"),
    (OutputFormat::Md, "report.md"),
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticArgs {
    output_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct StaticOutput {
    output_path: PathBuf,
}

pub fn factory(_ctx: &PluginContext, args: PluginArgs) -> Result<Arc<dyn OutputDriver>> {
    let args: StaticArgs = args.parse()?;
    let output_path = args
        .output_path
        .ok_or_else(|| Error::Config("Missing required parameter: 'output_path'".to_string()))?;
    Ok(Arc::new(StaticOutput::new(output_path)))
}

impl StaticOutput {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

#[async_trait]
impl OutputDriver for StaticOutput {
    async fn render_output(&self, content: &Content) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_path)
            .await
            .with_context(|| format!("Failed to create {}", self.output_path.display()))?;

        for (format, file_name) in FILES {
            let Some(text) = content.get(*format) else {
                continue;
            };
            let path = self.output_path.join(file_name);
            tokio::fs::write(&path, text)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Wrote report");
        }
        Ok(())
    }
}
