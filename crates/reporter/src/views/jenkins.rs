//! Jenkins Build Summary
//!
//! Lists jobs with their recent build results and health score.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{OutputFormat, View, ViewContext};
use crate::datasources::{DatasourceManager, Query};
use crate::plugin::{PluginArgs, PluginContext};
use crate::Error;

const TEMPLATE: &str = "jenkins_build_summary";

fn default_datasource() -> String {
    "jenkins".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JenkinsBuildSummaryArgs {
    #[serde(default = "default_datasource")]
    datasource: String,
    #[serde(default)]
    filters: FilterArgs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterArgs {
    name: Option<NamePatterns>,
    #[serde(default)]
    invert: bool,
}

#[derive(Debug, Deserialize)]
#[serde(
    untagged,
    expecting = "Invalid filter type, only string or list of strings supported"
)]
enum NamePatterns {
    One(String),
    Many(Vec<String>),
}

impl NamePatterns {
    fn into_vec(self) -> Vec<String> {
        match self {
            NamePatterns::One(pattern) => vec![pattern],
            NamePatterns::Many(patterns) => patterns,
        }
    }
}

/// Decides which jobs are listed
#[derive(Debug, Default)]
pub struct JenkinsBuildFilter {
    name_filter: Option<Vec<Regex>>,
    invert: bool,
}

impl JenkinsBuildFilter {
    pub fn new(patterns: Vec<String>, invert: bool) -> crate::Result<Self> {
        let name_filter = if patterns.is_empty() {
            None
        } else {
            let compiled = patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        Error::Config(format!("Invalid job name filter '{}': {}", p, e))
                    })
                })
                .collect::<crate::Result<Vec<_>>>()?;
            Some(compiled)
        };
        Ok(Self {
            name_filter,
            invert,
        })
    }

    /// A job passes when every name pattern matches somewhere in its full name.
    pub fn filter_job(&self, job_name: &str) -> bool {
        let allow = match &self.name_filter {
            Some(filters) => filters.iter().all(|f| f.is_match(job_name)),
            None => true,
        };
        allow != self.invert
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub url: String,
    pub score: Value,
    /// Oldest first
    pub builds: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub summary: Vec<JobSummary>,
}

pub struct JenkinsBuildSummary {
    datasource: String,
    filter: JenkinsBuildFilter,
    summary: OnceCell<BuildSummary>,
}

pub fn factory(_ctx: &PluginContext, args: PluginArgs) -> Result<Arc<dyn View>> {
    let args: JenkinsBuildSummaryArgs = args.parse()?;
    let patterns = args.filters.name.map(NamePatterns::into_vec).unwrap_or_default();
    let filter = JenkinsBuildFilter::new(patterns, args.filters.invert)?;
    Ok(Arc::new(JenkinsBuildSummary::new(args.datasource, filter)))
}

impl JenkinsBuildSummary {
    pub fn new(datasource: String, filter: JenkinsBuildFilter) -> Self {
        Self {
            datasource,
            filter,
            summary: OnceCell::new(),
        }
    }

    pub async fn build_summary(&self, datasources: &DatasourceManager) -> Result<&BuildSummary> {
        self.summary
            .get_or_try_init(|| async {
                let jobs = datasources
                    .query(&self.datasource, Query::call("get_all_jobs", vec![]))
                    .await?
                    .into_records()?;

                let mut summary = Vec::new();
                for job in &jobs {
                    let name = job["fullname"]
                        .as_str()
                        .context("Jenkins job record without a 'fullname'")?;
                    if !self.filter.filter_job(name) {
                        debug!(job = name, "Job filtered out");
                        continue;
                    }

                    let mut builds = datasources
                        .query(
                            &self.datasource,
                            Query::call("get_job_info", vec![name.to_string()]),
                        )
                        .await?
                        .into_records()?;
                    let score = builds
                        .first()
                        .map(|build| build["score"].clone())
                        .unwrap_or(Value::Null);
                    builds.reverse();

                    summary.push(JobSummary {
                        name: name.to_string(),
                        url: job["url"].as_str().unwrap_or_default().to_string(),
                        score,
                        builds,
                    });
                }

                info!(
                    datasource = %self.datasource,
                    jobs = jobs.len(),
                    listed = summary.len(),
                    "Collected Jenkins build summary"
                );
                Ok::<_, anyhow::Error>(BuildSummary { summary })
            })
            .await
    }
}

#[async_trait]
impl View for JenkinsBuildSummary {
    fn supported_formats(&self) -> &[OutputFormat] {
        &[OutputFormat::Html, OutputFormat::Md, OutputFormat::Slack]
    }

    async fn render(&self, ctx: &ViewContext<'_>, format: OutputFormat) -> Result<String> {
        let summary = self.build_summary(ctx.datasources).await?;
        Ok(ctx.templates.render_view(TEMPLATE, format, summary)?)
    }
}
