//! Interval algebra over alert firing times.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// A contiguous period during which an alert was firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// A window scaled onto the report's [0, 100] timeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub offset_pct: f64,
    pub width_pct: f64,
}

/// Merge ascending firing timestamps into resolution-bridged windows.
///
/// Each timestamp covers `[t, t + resolution]`. A timestamp that lands
/// inside the running window extends it, one past its end opens a new one.
/// Window ends saturate at the latest representable time.
pub fn compute_time_windows(timestamps: &[DateTime<Utc>], resolution: Duration) -> Vec<Window> {
    let Some(&first) = timestamps.first() else {
        return Vec::new();
    };

    let mut windows = vec![Window::new(first, window_end(first, resolution))];
    for &ts in &timestamps[1..] {
        // Non-empty from the start, the last window always exists
        let last = windows.len() - 1;
        if ts > windows[last].end {
            windows.push(Window::new(ts, window_end(ts, resolution)));
        } else {
            windows[last].end = window_end(ts, resolution);
        }
    }
    windows
}

fn window_end(ts: DateTime<Utc>, resolution: Duration) -> DateTime<Utc> {
    ts.checked_add_signed(resolution).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Union overlapping windows.
///
/// Windows that only touch (`next.start == running.end`) are kept apart.
pub fn compress_time_windows(windows: &[Window]) -> Vec<Window> {
    let mut sorted = windows.to_vec();
    sorted.sort_by_key(|w| w.start);

    let mut compressed: Vec<Window> = Vec::with_capacity(sorted.len());
    for window in sorted {
        match compressed.last_mut() {
            Some(running) if window.start < running.end => {
                running.end = running.end.max(window.end);
            }
            _ => compressed.push(window),
        }
    }
    compressed
}

pub fn total_time(windows: &[Window]) -> Duration {
    windows
        .iter()
        .fold(Duration::zero(), |total, w| total + w.duration())
}

/// Scale windows against `range`.
///
/// Offsets are clamped at 0 for windows that began before the range. Widths
/// are not clamped at the other end, so `offset + width` can exceed 100 for a
/// window running past the range's end.
pub fn normalize_time_windows(windows: &[Window], range: &Window) -> Vec<TimelineEntry> {
    let span = range.duration().num_milliseconds() as f64;
    if span <= 0.0 {
        return Vec::new();
    }

    windows
        .iter()
        .map(|w| {
            let offset = (w.start - range.start).num_milliseconds() as f64;
            let width = w.duration().num_milliseconds() as f64;
            TimelineEntry {
                offset_pct: round2(100.0 * offset / span).max(0.0),
                width_pct: round2(100.0 * width / span),
            }
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
