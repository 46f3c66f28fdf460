//! Render a KPI report and deliver it through the configured outputs.
//!
//! Run with: kpireport --config config.yaml [OPTIONS]

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kpi_reporter::{metrics, ReportConfig, ReportRenderer, Registries};
use kpi_reporter::template::Templates;

#[derive(Parser)]
#[command(author, version, about = "Render a KPI report from pluggable datasources", long_about = None)]
struct Cli {
    /// Report configuration file
    #[arg(short, long, env = "KPIREPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Start of the report window (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    start_date: Option<String>,

    /// End of the report window (YYYY-MM-DD or RFC 3339), defaults to now
    #[arg(long)]
    end_date: Option<String>,

    /// Length of the report window in days when no start date is given
    #[arg(long)]
    interval_days: Option<u32>,

    /// Write plugin and render metrics to this file when done
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = ReportConfig::load(cli.config)?;
    if cli.start_date.is_some() {
        config.start_date = cli.start_date;
    }
    if cli.end_date.is_some() {
        config.end_date = cli.end_date;
    }
    if let Some(days) = cli.interval_days {
        config.interval_days = days;
    }
    config.validate()?;

    let report = config.report(Utc::now())?;
    let renderer = ReportRenderer::new(&config, report, &Registries::builtin(), Templates::builtin()?);
    let summary = renderer.run().await?;

    for (capability, by_name) in &summary.errors {
        for (name, errors) in by_name {
            for err in errors {
                error!(%capability, name = name.as_str(), kind = %err.kind(), "{:#}", err.cause());
            }
        }
    }

    if let Some(path) = cli.metrics_file {
        metrics::write_metrics(&path)?;
        info!(path = %path.display(), "Wrote metrics");
    }

    info!(
        delivered = ?summary.delivered,
        errors = summary.error_count(),
        "Done"
    );
    Ok(())
}
