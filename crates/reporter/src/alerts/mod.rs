//! Alert window aggregation
//!
//! Turns the samples of a Prometheus `ALERTS` range query into per-alert
//! summaries of when each alert was firing, plus a timeline scaled to the
//! report range.

mod resolution;
mod window;

pub use resolution::Resolution;
pub use window::{
    compress_time_windows, compute_time_windows, normalize_time_windows, total_time,
    TimelineEntry, Window,
};

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::datasources::Sample;

/// The synthetic series Prometheus keeps for active alerts
pub const ALERTS_QUERY: &str = "ALERTS";

const METRIC_NAME_LABEL: &str = "__name__";
const ALERTNAME_LABEL: &str = "alertname";
const ALERTSTATE_LABEL: &str = "alertstate";
const FIRING: &str = "firing";

#[derive(Debug, Clone)]
pub struct AggregationOptions {
    pub resolution: Resolution,
    /// Labels left out of a group's identity
    pub ignore_labels: Vec<String>,
    /// Only samples carrying all of these label values are kept
    pub labels: BTreeMap<String, String>,
}

impl AggregationOptions {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            ignore_labels: Vec::new(),
            labels: BTreeMap::new(),
        }
    }
}

/// Firing times of one distinct label combination within an alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelGroup {
    pub labels: BTreeMap<String, String>,
    /// Rounded firing timestamps, ascending
    #[serde(skip)]
    pub timestamps: Vec<DateTime<Utc>>,
    pub windows: Vec<Window>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub alertname: String,
    /// Union of all label groups' windows
    pub windows: Vec<Window>,
    #[serde(serialize_with = "serialize_seconds")]
    pub total_time: Duration,
    /// Raw samples that contributed to the windows
    pub num_firings: usize,
    /// Per-group windows before they were merged across groups
    pub num_windows: usize,
    pub groups: Vec<LabelGroup>,
}

/// Everything the alert summary templates need
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertReport {
    /// Ranked by total firing time, longest first
    pub summary: Vec<AlertSummary>,
    pub timeline: Vec<TimelineEntry>,
    pub show_timeline: bool,
}

/// Summarize firing samples per alert name, in order of first appearance.
pub fn summarize_alerts(samples: &[Sample], options: &AggregationOptions) -> Vec<AlertSummary> {
    let dropped: BTreeSet<&str> = [METRIC_NAME_LABEL, ALERTSTATE_LABEL, ALERTNAME_LABEL]
        .into_iter()
        .chain(options.ignore_labels.iter().map(String::as_str))
        .collect();

    let mut by_alert: IndexMap<&str, Vec<&Sample>> = IndexMap::new();
    for sample in samples
        .iter()
        .filter(|s| is_firing(s) && matches_labels(s, &options.labels))
    {
        if let Some(alertname) = sample.labels.get(ALERTNAME_LABEL) {
            by_alert.entry(alertname.as_str()).or_default().push(sample);
        }
    }

    by_alert
        .into_iter()
        .map(|(alertname, rows)| summarize_alert(alertname, &rows, &dropped, &options.resolution))
        .collect()
}

fn summarize_alert(
    alertname: &str,
    rows: &[&Sample],
    dropped: &BTreeSet<&str>,
    resolution: &Resolution,
) -> AlertSummary {
    // Only labels that occur on at least one row take part in grouping
    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.labels.keys().map(String::as_str))
        .filter(|label| !dropped.contains(label))
        .collect();

    let mut by_labels: BTreeMap<Vec<Option<&str>>, Vec<DateTime<Utc>>> = BTreeMap::new();
    for row in rows {
        let key = columns
            .iter()
            .map(|column| row.labels.get(*column).map(String::as_str))
            .collect();
        by_labels
            .entry(key)
            .or_default()
            .push(resolution.round(row.timestamp));
    }

    let groups: Vec<LabelGroup> = by_labels
        .into_iter()
        .map(|(values, mut timestamps)| {
            timestamps.sort();
            let windows = compute_time_windows(&timestamps, resolution.duration());
            let labels = columns
                .iter()
                .zip(values)
                .filter_map(|(column, value)| value.map(|v| (column.to_string(), v.to_string())))
                .collect();
            LabelGroup {
                labels,
                timestamps,
                windows,
            }
        })
        .collect();

    let all_windows: Vec<Window> = groups
        .iter()
        .flat_map(|group| group.windows.iter().copied())
        .collect();
    let windows = compress_time_windows(&all_windows);

    debug!(
        alertname,
        groups = groups.len(),
        windows = windows.len(),
        "Summarized alert"
    );

    AlertSummary {
        alertname: alertname.to_string(),
        total_time: total_time(&windows),
        num_firings: groups.iter().map(|g| g.timestamps.len()).sum(),
        num_windows: all_windows.len(),
        windows,
        groups,
    }
}

/// Sort by total firing time, longest first; ties keep their order.
pub fn rank_by_total_time(summaries: &mut [AlertSummary]) {
    summaries.sort_by(|a, b| b.total_time.cmp(&a.total_time));
}

/// Build the full alert report for a report range.
///
/// The timeline covers every alert's merged windows in order of first
/// appearance; windows of different alerts are not merged with each other.
pub fn build_alert_report(
    samples: &[Sample],
    options: &AggregationOptions,
    range: &Window,
    show_timeline: bool,
) -> AlertReport {
    let mut summary = summarize_alerts(samples, options);

    let all_windows: Vec<Window> = summary
        .iter()
        .flat_map(|alert| alert.windows.iter().copied())
        .collect();
    let timeline = normalize_time_windows(&all_windows, range);

    rank_by_total_time(&mut summary);

    AlertReport {
        summary,
        timeline,
        show_timeline,
    }
}

fn is_firing(sample: &Sample) -> bool {
    sample.labels.get(ALERTSTATE_LABEL).map(String::as_str) == Some(FIRING)
}

fn matches_labels(sample: &Sample, filter: &BTreeMap<String, String>) -> bool {
    filter
        .iter()
        .all(|(key, value)| sample.labels.get(key) == Some(value))
}

fn serialize_seconds<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(duration.num_seconds())
}
