//! Jenkins Datasource
//!
//! Exposes an RPC-like interface over the Jenkins JSON API: list all leaf
//! jobs, and fetch the builds and health of one job.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::{normalize_host, Datasource, Query, QueryResult};
use crate::plugin::{PluginArgs, PluginContext};
use crate::Error;

/// Folder levels walked when listing jobs. The innermost level only asks for
/// names so folders at the last walked level can be told apart from jobs.
const JOB_TREE: &str =
    "jobs[fullName,url,jobs[fullName,url,jobs[fullName,url,jobs[fullName]]]]";
const MAX_FOLDER_DEPTH: usize = 3;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JenkinsArgs {
    host: Option<String>,
    user: Option<String>,
    api_token: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

pub struct JenkinsDatasource {
    host: Url,
    client: Client,
    user: Option<String>,
    api_token: Option<String>,
    timeout: Duration,
}

pub fn factory(_ctx: &PluginContext, args: PluginArgs) -> Result<Arc<dyn Datasource>> {
    let args: JenkinsArgs = args.parse()?;
    let host = args
        .host
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| Error::Config("Missing required parameter: 'host'".to_string()))?;

    let mut datasource = JenkinsDatasource::new(&host)?;
    datasource.user = args.user;
    datasource.api_token = args.api_token;
    if let Some(secs) = args.timeout_secs {
        datasource.timeout = Duration::from_secs(secs);
    }
    Ok(Arc::new(datasource))
}

impl JenkinsDatasource {
    pub fn new(host: &str) -> crate::Result<Self> {
        let host = normalize_host(host)?;
        let host = Url::parse(&format!("{}/", host))
            .map_err(|e| Error::Config(format!("Invalid host '{}': {}", host, e)))?;
        Ok(Self {
            host,
            client: Client::new(),
            user: None,
            api_token: None,
            timeout: Duration::from_secs(30),
        })
    }

    /// List all jobs that have no child jobs
    async fn get_all_jobs(&self) -> Result<Vec<Value>> {
        let mut url = self.host.join("api/json")?;
        url.query_pairs_mut().append_pair("tree", JOB_TREE);

        let root: JobTree = self.get_json(url).await?;
        let mut leaves = Vec::new();
        flatten_jobs(root.jobs, 1, &mut leaves);
        Ok(leaves)
    }

    /// List the builds of one job, most recent first
    async fn get_job_info(&self, job_name: &str) -> Result<Vec<Value>> {
        let mut url = job_url(&self.host, job_name)?;
        url.query_pairs_mut().append_pair("depth", "1");

        let info: JobInfo = self.get_json(url).await?;
        Ok(job_info_records(info))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "Querying Jenkins");
        let response = self.authenticated(self.client.get(url)).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamQuery(format!(
                "Jenkins request failed with {}: {}",
                status, error_text
            ))
            .into());
        }

        Ok(response.json().await?)
    }

    fn authenticated(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.timeout);
        match &self.user {
            Some(user) => request.basic_auth(user, self.api_token.as_ref()),
            None => request,
        }
    }
}

#[async_trait]
impl Datasource for JenkinsDatasource {
    async fn query(&self, query: &Query) -> Result<QueryResult> {
        let Query::Call { operation, args } = query else {
            return Err(anyhow!("Jenkins datasource does not support range queries"));
        };

        let records = match (operation.as_str(), args.as_slice()) {
            ("get_all_jobs", []) => self.get_all_jobs().await?,
            ("get_job_info", [job_name]) => self.get_job_info(job_name).await?,
            ("get_all_jobs" | "get_job_info", _) => {
                return Err(anyhow!(
                    "Wrong number of arguments for {}: {}",
                    operation,
                    args.len()
                ))
            }
            _ => return Err(anyhow!("No such method {} for Jenkins client", operation)),
        };
        Ok(QueryResult::Records(records))
    }
}

#[derive(Debug, Deserialize)]
struct JobTree {
    #[serde(default)]
    jobs: Vec<JenkinsJob>,
}

#[derive(Debug, Deserialize)]
struct JenkinsJob {
    #[serde(rename = "fullName")]
    full_name: String,
    #[serde(default)]
    url: String,
    /// Only folders carry child jobs
    jobs: Option<Vec<JenkinsJob>>,
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    #[serde(default)]
    builds: Vec<Value>,
    #[serde(rename = "healthReport", default)]
    health_report: Vec<HealthReport>,
}

#[derive(Debug, Deserialize)]
struct HealthReport {
    score: Option<i64>,
    description: Option<String>,
}

fn flatten_jobs(jobs: Vec<JenkinsJob>, depth: usize, leaves: &mut Vec<Value>) {
    for job in jobs {
        match job.jobs {
            Some(children) if depth < MAX_FOLDER_DEPTH => flatten_jobs(children, depth + 1, leaves),
            Some(_) => warn!(
                folder = %job.full_name,
                max_depth = MAX_FOLDER_DEPTH,
                "Skipping folder nested too deep"
            ),
            None => leaves.push(json!({"fullname": job.full_name, "url": job.url})),
        }
    }
}

/// Address a job by its full name, one `job/<segment>` pair per folder.
fn job_url(host: &Url, job_name: &str) -> Result<Url> {
    let mut url = host.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow!("Jenkins host cannot be a base URL: {}", host))?;
        segments.pop_if_empty();
        for part in job_name.split('/').filter(|p| !p.is_empty()) {
            segments.push("job").push(part);
        }
        segments.push("api").push("json");
    }
    Ok(url)
}

/// Annotate each build with the job's health, as builds carry none of their own.
fn job_info_records(info: JobInfo) -> Vec<Value> {
    let health = info.health_report.first();
    let score = health.and_then(|h| h.score);
    let description = health.and_then(|h| h.description.clone());

    info.builds
        .into_iter()
        .map(|mut build| {
            if let Value::Object(map) = &mut build {
                map.insert("score".to_string(), json!(score));
                map.insert("health".to_string(), json!(description));
            }
            build
        })
        .collect()
}
