//! Slack output
//!
//! Posts the Slack-formatted report to an incoming webhook.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::OutputDriver;
use crate::plugin::{PluginArgs, PluginContext};
use crate::report::Content;
use crate::views::OutputFormat;
use crate::Error;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SlackArgs {
    api_url: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
}

pub struct SlackOutput {
    api_url: Url,
    client: Client,
    timeout: Duration,
}

pub fn factory(_ctx: &PluginContext, args: PluginArgs) -> Result<Arc<dyn OutputDriver>> {
    let args: SlackArgs = args.parse()?;
    let api_url = args
        .api_url
        .ok_or_else(|| Error::Config("Missing required parameter: 'api_url'".to_string()))?;

    let mut output = SlackOutput::new(&api_url)?;
    if let Some(secs) = args.timeout_secs {
        output.timeout = Duration::from_secs(secs);
    }
    Ok(Arc::new(output))
}

impl SlackOutput {
    pub fn new(api_url: &str) -> crate::Result<Self> {
        let api_url = Url::parse(api_url)
            .map_err(|e| Error::Config(format!("Invalid Slack webhook URL: {}", e)))?;
        Ok(Self {
            api_url,
            client: Client::new(),
            timeout: Duration::from_secs(30),
        })
    }
}

#[async_trait]
impl OutputDriver for SlackOutput {
    fn supported_formats(&self) -> &[OutputFormat] {
        &[OutputFormat::Slack]
    }

    async fn render_output(&self, content: &Content) -> Result<()> {
        let text = content
            .get(OutputFormat::Slack)
            .ok_or_else(|| anyhow!("No slack content was rendered"))?;

        debug!(host = ?self.api_url.host_str(), "Posting report to Slack");
        let response = self
            .client
            .post(self.api_url.clone())
            .json(&SlackMessage { text })
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Output(format!(
                "Slack webhook returned {}: {}",
                status, error_text
            ))
            .into());
        }

        info!("Posted report to Slack");
        Ok(())
    }
}
