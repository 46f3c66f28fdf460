use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, Encoder,
    IntCounter, IntCounterVec, Registry, TextEncoder,
};

use crate::{Error, Result};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref PLUGIN_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "kpireport_plugin_errors_total",
        "Total number of recorded plugin errors.",
        &["capability", "kind"],
        REGISTRY
    )
    .unwrap();
    pub static ref VIEWS_RENDERED_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "kpireport_views_rendered_total",
        "Total number of view sections rendered, by format and outcome.",
        &["format", "outcome"],
        REGISTRY
    )
    .unwrap();
    pub static ref REPORTS_RENDERED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "kpireport_reports_rendered_total",
        "Total number of completed report render passes.",
        REGISTRY
    )
    .unwrap();
}

/// Encode every registered metric in the text exposition format.
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| Error::Internal(format!("Failed to convert metrics to string: {}", e)))
}

/// Write the metrics to `path`, for pickup by a textfile collector.
pub fn write_metrics(path: &std::path::Path) -> Result<()> {
    std::fs::write(path, gather_metrics()?)?;
    Ok(())
}
