//! Trial configurations and result rows.
//!
//! A [`TrialSpec`] is one cell of the sweep matrix. A [`TrialResult`] is the
//! immutable row produced for it; which optional columns it carries is decided
//! by the [`MetricSet`] the session was configured with, so a header derived
//! from the same set always lines up with the row's cells.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::stats::Metric;

/// Decimals for millisecond means, latencies and rates.
pub const MS_DECIMALS: usize = 1;

/// Decimals for sub-millisecond draw costs.
pub const DRAW_DECIMALS: usize = 3;

/// Frame geometry in pixels. Serialized as a `[width, height]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Create a resolution.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(r: Resolution) -> Self {
        (r.width, r.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One (resolution, frame rate) configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialSpec {
    /// Requested width in pixels
    pub width: u32,
    /// Requested height in pixels
    pub height: u32,
    /// Requested frame rate
    pub frame_rate: u32,
}

impl TrialSpec {
    /// Create a trial configuration.
    pub const fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }

    /// Requested geometry.
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// `"{width}x{height}"`, the label used in result rows.
    pub fn resolution_label(&self) -> String {
        self.resolution().to_string()
    }

    /// Nominal inter-frame interval, `1000 / frame_rate` milliseconds.
    pub fn nominal_interval_ms(&self) -> f64 {
        1000.0 / f64::from(self.frame_rate)
    }

    /// Interval above which a frame counts as dropped.
    ///
    /// Computed as `factor * 1000 / frame_rate` rather than scaling the
    /// nominal interval, which keeps thresholds such as 100 ms at 15 fps exact.
    pub fn drop_threshold_ms(&self, factor: f64) -> f64 {
        factor * 1000.0 / f64::from(self.frame_rate)
    }

    /// Cross product in sweep order: resolutions outer, frame rates inner.
    pub fn matrix(resolutions: &[Resolution], frame_rates: &[u32]) -> Vec<TrialSpec> {
        resolutions
            .iter()
            .flat_map(|r| {
                frame_rates
                    .iter()
                    .map(move |&fps| TrialSpec::new(r.width, r.height, fps))
            })
            .collect()
    }
}

impl fmt::Display for TrialSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.frame_rate)
    }
}

/// Optional metrics a capture session collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSet {
    /// Time the acquisition request takes
    pub acquisition_time: bool,
    /// Acquire/release cycles per trial for the acquisition sample
    pub acquisition_repeats: u32,
    /// Pause between repeated acquisitions
    pub acquisition_settle_ms: u64,
    /// Per-frame draw cost into an off-screen surface
    pub draw_time: bool,
    /// Threshold count of long intervals
    pub dropped_frames: bool,
    /// Population standard deviation next to the acquisition and draw means
    pub spread: bool,
}

impl Default for MetricSet {
    fn default() -> Self {
        Self {
            acquisition_time: true,
            acquisition_repeats: 1,
            acquisition_settle_ms: 500,
            draw_time: true,
            dropped_frames: false,
            spread: false,
        }
    }
}

impl MetricSet {
    /// Only the always-present columns.
    pub fn minimal() -> Self {
        Self {
            acquisition_time: false,
            acquisition_repeats: 1,
            acquisition_settle_ms: 0,
            draw_time: false,
            dropped_frames: false,
            spread: false,
        }
    }

    /// Every optional metric enabled.
    pub fn full() -> Self {
        Self {
            acquisition_time: true,
            acquisition_repeats: 1,
            acquisition_settle_ms: 500,
            draw_time: true,
            dropped_frames: true,
            spread: true,
        }
    }
}

/// One row of the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    /// `"{width}x{height}"`
    pub resolution: String,
    /// Requested frame rate
    pub fps: u32,
    /// Mean inter-frame interval (ms)
    pub frame_time_mean: Metric,
    /// Time to the first rendered frame (ms)
    pub onset_latency: Metric,
    /// Mean acquisition latency (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquisition_time_mean: Option<Metric>,
    /// Acquisition latency spread (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquisition_time_stddev: Option<Metric>,
    /// Mean per-frame draw cost (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draw_time_mean: Option<Metric>,
    /// Draw cost spread (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draw_time_stddev: Option<Metric>,
    /// Intervals above the drop threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped_frames: Option<Metric>,
    /// Frames delivered per second of sampling window
    pub actual_fps: Metric,
}

impl TrialResult {
    /// Row for a trial whose session failed: every metric is the error
    /// sentinel and the achieved rate is zero.
    pub fn failed(spec: &TrialSpec, metrics: &MetricSet) -> Self {
        let optional = |enabled: bool| enabled.then_some(Metric::Error);
        Self {
            resolution: spec.resolution_label(),
            fps: spec.frame_rate,
            frame_time_mean: Metric::Error,
            onset_latency: Metric::Error,
            acquisition_time_mean: optional(metrics.acquisition_time),
            acquisition_time_stddev: optional(metrics.acquisition_time && metrics.spread),
            draw_time_mean: optional(metrics.draw_time),
            draw_time_stddev: optional(metrics.draw_time && metrics.spread),
            dropped_frames: optional(metrics.dropped_frames),
            actual_fps: Metric::Value(0.0),
        }
    }

    /// Row substituted when a trial did not return at all.
    pub fn substitute(spec: &TrialSpec, metrics: &MetricSet) -> Self {
        Self {
            actual_fps: Metric::Error,
            ..Self::failed(spec, metrics)
        }
    }

    /// Formatted cells, in the same order as the report header.
    pub fn cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.resolution.clone(),
            self.fps.to_string(),
            self.frame_time_mean.display(MS_DECIMALS),
        ];
        if let Some(m) = self.acquisition_time_mean {
            cells.push(m.display(MS_DECIMALS));
        }
        if let Some(m) = self.acquisition_time_stddev {
            cells.push(m.display(MS_DECIMALS));
        }
        cells.push(self.onset_latency.display(MS_DECIMALS));
        if let Some(m) = self.draw_time_mean {
            cells.push(m.display(DRAW_DECIMALS));
        }
        if let Some(m) = self.draw_time_stddev {
            cells.push(m.display(DRAW_DECIMALS));
        }
        cells.push(self.actual_fps.display(MS_DECIMALS));
        if let Some(m) = self.dropped_frames {
            cells.push(m.display(0));
        }
        cells
    }

    /// True when no field holds a measured value other than the rate.
    pub fn is_failure(&self) -> bool {
        !self.frame_time_mean.is_value() && !self.onset_latency.is_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_order_is_resolution_major() {
        let specs = TrialSpec::matrix(
            &[Resolution::new(640, 360), Resolution::new(1280, 720)],
            &[15, 30],
        );
        let labels: Vec<String> = specs.iter().map(ToString::to_string).collect();
        assert_eq!(
            labels,
            ["640x360@15", "640x360@30", "1280x720@15", "1280x720@30"]
        );
    }

    #[test]
    fn test_empty_inputs_give_empty_matrix() {
        assert!(TrialSpec::matrix(&[], &[15]).is_empty());
        assert!(TrialSpec::matrix(&[Resolution::new(640, 360)], &[]).is_empty());
    }

    #[test]
    fn test_drop_threshold() {
        assert_eq!(TrialSpec::new(640, 360, 15).drop_threshold_ms(1.5), 100.0);
        assert_eq!(TrialSpec::new(640, 360, 30).drop_threshold_ms(1.5), 50.0);
        assert_eq!(TrialSpec::new(640, 360, 20).nominal_interval_ms(), 50.0);
    }

    #[test]
    fn test_failed_row_sentinels() {
        let spec = TrialSpec::new(1920, 1080, 30);
        let row = TrialResult::failed(&spec, &MetricSet::full());
        assert_eq!(
            row.cells(),
            ["1920x1080", "30", "Error", "Error", "Error", "Error", "Error", "Error", "0.0", "Error"]
        );
        assert!(row.is_failure());

        let row = TrialResult::substitute(&spec, &MetricSet::minimal());
        assert_eq!(row.cells(), ["1920x1080", "30", "Error", "Error", "Error"]);
    }

    #[test]
    fn test_cell_precision() {
        let spec = TrialSpec::new(640, 360, 30);
        let row = TrialResult {
            frame_time_mean: Metric::Value(33.333),
            onset_latency: Metric::Value(101.26),
            acquisition_time_mean: Some(Metric::Value(40.04)),
            draw_time_mean: Some(Metric::Value(0.01234)),
            actual_fps: Metric::Value(30.0),
            dropped_frames: Some(Metric::Unsupported),
            ..TrialResult::failed(&spec, &MetricSet::default())
        };
        assert_eq!(
            row.cells(),
            ["640x360", "30", "33.3", "40.0", "101.3", "0.012", "30.0", "N/A"]
        );
    }

    #[test]
    fn test_json_omits_disabled_columns() {
        let row = TrialResult::failed(&TrialSpec::new(320, 180, 15), &MetricSet::minimal());
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["resolution"], "320x180");
        assert_eq!(json["frameTimeMean"], "Error");
        assert_eq!(json["actualFps"], 0.0);
        assert!(json.get("drawTimeMean").is_none());
    }

    #[test]
    fn test_resolution_serde_pair() {
        let r: Resolution = serde_json::from_str("[1280, 720]").unwrap();
        assert_eq!(r, Resolution::new(1280, 720));
        assert_eq!(serde_json::to_string(&r).unwrap(), "[1280,720]");
    }
}
