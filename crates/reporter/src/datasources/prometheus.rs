//! Prometheus Datasource
//!
//! Executes PromQL range queries over the report window.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{normalize_host, Datasource, Query, QueryResult, Sample};
use crate::plugin::{PluginArgs, PluginContext};
use crate::Error;

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrometheusArgs {
    host: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

/// Datasource that runs PromQL range queries against a Prometheus server
pub struct PrometheusDatasource {
    host: String,
    client: Client,
    timeout: Duration,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

pub fn factory(ctx: &PluginContext, args: PluginArgs) -> Result<Arc<dyn Datasource>> {
    let args: PrometheusArgs = args.parse()?;
    let host = args
        .host
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| Error::Config("Missing required parameter: 'host'".to_string()))?;

    let datasource = PrometheusDatasource::new(&host, ctx.report.start_date, ctx.report.end_date)?
        .with_timeout(Duration::from_secs(args.timeout_secs));
    Ok(Arc::new(datasource))
}

impl PrometheusDatasource {
    pub fn new(host: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> crate::Result<Self> {
        Ok(Self {
            host: normalize_host(host)?,
            client: Client::new(),
            timeout: Duration::from_secs(default_timeout_secs()),
            start,
            end,
        })
    }

    /// Set query timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Execute a PromQL range query over the report window
    async fn query_range(&self, query: &str, step: Duration) -> Result<PrometheusResponse> {
        let url = format!("{}/api/v1/query_range", self.host);
        let start = self.start.timestamp().to_string();
        let end = self.end.timestamp().to_string();
        let step = step.as_secs().max(1).to_string();

        debug!(host = %self.host, query, %step, "Executing range query");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query.trim()),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamQuery(format!(
                "Prometheus range query failed with {}: {}",
                status, error_text
            ))
            .into());
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Datasource for PrometheusDatasource {
    async fn query(&self, query: &Query) -> Result<QueryResult> {
        match query {
            Query::Range { expr, step } => {
                let response = self.query_range(expr, *step).await?;
                Ok(QueryResult::TimeSeries(response_to_samples(response)?))
            }
            Query::Call { operation, .. } => Err(anyhow!(
                "Prometheus datasource only supports range queries, got call to '{}'",
                operation
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PrometheusResponse {
    status: String,
    #[serde(default)]
    data: Option<PrometheusData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PrometheusData {
    result: Vec<PrometheusResult>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PrometheusResult {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Flatten a range query response into samples, one per series point.
fn response_to_samples(response: PrometheusResponse) -> Result<Vec<Sample>> {
    if response.status != "success" {
        return Err(Error::UpstreamQuery(format!(
            "Got error response from Prometheus server: {}",
            response.error.as_deref().unwrap_or("unknown error")
        ))
        .into());
    }

    let Some(data) = response.data else {
        return Ok(Vec::new());
    };

    let mut samples = Vec::new();
    for series in data.result {
        for (timestamp, value) in series.values {
            let timestamp = DateTime::from_timestamp_millis((timestamp * 1000.0).round() as i64)
                .ok_or_else(|| anyhow!("Timestamp out of range: {}", timestamp))?;
            let value: f64 = value
                .parse()
                .map_err(|_| anyhow!("Invalid sample value: {}", value))?;
            samples.push(Sample {
                timestamp,
                labels: series.metric.clone(),
                value,
            });
        }
    }
    Ok(samples)
}
