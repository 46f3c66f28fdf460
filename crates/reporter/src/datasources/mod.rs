//! Datasources
//!
//! A datasource answers queries for views. Prometheus answers range queries
//! with time series; Jenkins answers named RPC-style calls with records.

pub mod jenkins;
pub mod prometheus;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::plugin::{Capability, PluginError, PluginManager, Registry};

/// One point of a time series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// A range query over the report window, sampled every `step`
    Range { expr: String, step: Duration },
    /// A named operation with positional arguments
    Call { operation: String, args: Vec<String> },
}

impl Query {
    pub fn range(expr: impl Into<String>, step: Duration) -> Self {
        Query::Range {
            expr: expr.into(),
            step,
        }
    }

    pub fn call(operation: impl Into<String>, args: Vec<String>) -> Self {
        Query::Call {
            operation: operation.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    TimeSeries(Vec<Sample>),
    Records(Vec<Value>),
}

impl QueryResult {
    pub fn into_time_series(self) -> anyhow::Result<Vec<Sample>> {
        match self {
            QueryResult::TimeSeries(samples) => Ok(samples),
            QueryResult::Records(_) => Err(anyhow!("Expected a time series, got records")),
        }
    }

    pub fn into_records(self) -> anyhow::Result<Vec<Value>> {
        match self {
            QueryResult::Records(records) => Ok(records),
            QueryResult::TimeSeries(_) => Err(anyhow!("Expected records, got a time series")),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Datasource: Send + Sync {
    async fn query(&self, query: &Query) -> anyhow::Result<QueryResult>;
}

pub type DatasourceManager = PluginManager<dyn Datasource>;

impl PluginManager<dyn Datasource> {
    /// Run `query` against the datasource configured as `name`.
    pub async fn query(&self, name: &str, query: Query) -> Result<QueryResult, PluginError> {
        self.invoke(name, |datasource| async move { datasource.query(&query).await })
            .await
    }
}

/// Registry with every built-in datasource
pub fn builtin_registry() -> Registry<dyn Datasource> {
    Registry::new(Capability::Datasource)
        .with("prometheus", prometheus::factory)
        .with("jenkins", jenkins::factory)
}

/// Prepend `http://` to bare hosts and check the result is a valid URL.
pub(crate) fn normalize_host(host: &str) -> crate::Result<String> {
    let host = host.trim().trim_end_matches('/');
    let host = if host.starts_with("http") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };
    url::Url::parse(&host)
        .map_err(|e| crate::Error::Config(format!("Invalid host '{}': {}", host, e)))?;
    Ok(host)
}
