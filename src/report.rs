//! Report sinks for sweep results.
//!
//! A [`ReportSink`] receives every row as soon as its trial finishes. Two
//! sinks are provided: [`TableReport`], an aligned text table, and
//! [`CsvReport`], a CSV file writer behind the `storage_csv` feature. Both
//! derive their header from the same [`MetricSet`] as the session that
//! produced the rows, so header and cells always line up.

#[cfg(feature = "storage_csv")]
use std::fs::File;
use std::path::{Path, PathBuf};
#[cfg(feature = "storage_csv")]
use tracing::info;

use crate::error::{BenchError, BenchResult};
use crate::result::{MetricSet, TrialResult};

/// Consumer of the ordered row sequence.
pub trait ReportSink: Send {
    /// Called once before the first row.
    fn begin(&mut self, _metrics: &MetricSet) -> BenchResult<()> {
        Ok(())
    }

    /// Called once per row, in sweep order.
    fn record(&mut self, row: &TrialResult) -> BenchResult<()>;

    /// Called once after the last row.
    fn finish(&mut self) -> BenchResult<()> {
        Ok(())
    }
}

impl ReportSink for Vec<TrialResult> {
    fn record(&mut self, row: &TrialResult) -> BenchResult<()> {
        self.push(row.clone());
        Ok(())
    }
}

/// Forwards every call to each borrowed sink, in order.
///
/// A failing sink does not starve the ones after it; the first error is
/// returned once every sink has been called.
#[derive(Default)]
pub struct ReportFanout<'a> {
    sinks: Vec<&'a mut dyn ReportSink>,
}

impl<'a> ReportFanout<'a> {
    /// Empty fan-out.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Append a sink.
    pub fn push(&mut self, sink: &'a mut dyn ReportSink) {
        self.sinks.push(sink);
    }
}

impl ReportFanout<'_> {
    fn each(&mut self, mut call: impl FnMut(&mut dyn ReportSink) -> BenchResult<()>) -> BenchResult<()> {
        let mut first = None;
        for sink in self.sinks.iter_mut() {
            if let Err(err) = call(&mut **sink) {
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl ReportSink for ReportFanout<'_> {
    fn begin(&mut self, metrics: &MetricSet) -> BenchResult<()> {
        self.each(|s| s.begin(metrics))
    }

    fn record(&mut self, row: &TrialResult) -> BenchResult<()> {
        self.each(|s| s.record(row))
    }

    fn finish(&mut self) -> BenchResult<()> {
        self.each(|s| s.finish())
    }
}

/// Column layout for a metric set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportColumns {
    metrics: MetricSet,
}

impl From<&MetricSet> for ReportColumns {
    fn from(metrics: &MetricSet) -> Self {
        Self { metrics: *metrics }
    }
}

impl ReportColumns {
    /// Header row, in the same order as [`TrialResult::cells`].
    pub fn header(&self) -> Vec<&'static str> {
        let m = &self.metrics;
        let mut header = vec!["Resolution", "FPS", "Frame Time (ms)"];
        if m.acquisition_time {
            header.push("getUserMedia CPU Time (ms)");
            if m.spread {
                header.push("getUserMedia CPU Time StdDev (ms)");
            }
        }
        header.push("Onset Latency (ms)");
        if m.draw_time {
            header.push("Canvas Draw Time (ms)");
            if m.spread {
                header.push("Canvas Draw Time StdDev (ms)");
            }
        }
        header.push("Actual FPS");
        if m.dropped_frames {
            header.push("Dropped Frames");
        }
        header
    }
}

/// Aligned plain-text table.
#[derive(Debug, Default)]
pub struct TableReport {
    header: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl TableReport {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows recorded so far.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no row was recorded.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render header and rows with columns padded to their widest cell.
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.header.iter().map(|h| h.len()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                match widths.get_mut(i) {
                    Some(w) => *w = (*w).max(cell.len()),
                    None => widths.push(cell.len()),
                }
            }
        }

        let mut out = String::new();
        out.push_str(&render_line(self.header.iter().copied(), &widths));
        out.push('\n');
        let rule: usize = widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1);
        out.push_str(&"-".repeat(rule));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&render_line(row.iter().map(String::as_str), &widths));
            out.push('\n');
        }
        out
    }
}

fn render_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, &w)| format!("{cell:<w$}"))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}

impl ReportSink for TableReport {
    fn begin(&mut self, metrics: &MetricSet) -> BenchResult<()> {
        self.header = ReportColumns::from(metrics).header();
        self.rows.clear();
        Ok(())
    }

    fn record(&mut self, row: &TrialResult) -> BenchResult<()> {
        self.rows.push(row.cells());
        Ok(())
    }
}

/// CSV export.
///
/// The file is only created once the first row arrives; a sweep that produced
/// no rows leaves no file behind.
#[cfg(feature = "storage_csv")]
pub struct CsvReport {
    path: PathBuf,
    header: Vec<&'static str>,
    writer: Option<csv::Writer<File>>,
    rows: usize,
}

#[cfg(feature = "storage_csv")]
impl CsvReport {
    /// Writer targeting `path`.
    pub fn new(path: impl Into<PathBuf>) -> BenchResult<Self> {
        Ok(Self {
            path: path.into(),
            header: ReportColumns::from(&MetricSet::default()).header(),
            writer: None,
            rows: 0,
        })
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> BenchResult<&mut csv::Writer<File>> {
        if self.writer.is_none() {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let mut writer = csv::Writer::from_path(&self.path)?;
            writer.write_record(&self.header)?;
            self.writer = Some(writer);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| BenchError::Configuration("CSV writer unavailable".into()))
    }
}

#[cfg(feature = "storage_csv")]
impl ReportSink for CsvReport {
    fn begin(&mut self, metrics: &MetricSet) -> BenchResult<()> {
        self.header = ReportColumns::from(metrics).header();
        Ok(())
    }

    fn record(&mut self, row: &TrialResult) -> BenchResult<()> {
        self.open()?.write_record(row.cells())?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> BenchResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!(path = %self.path.display(), rows = self.rows, "CSV report written");
        } else {
            info!("No rows recorded; CSV report skipped");
        }
        Ok(())
    }
}

/// CSV export placeholder when the `storage_csv` feature is disabled.
#[cfg(not(feature = "storage_csv"))]
pub struct CsvReport;

#[cfg(not(feature = "storage_csv"))]
impl CsvReport {
    /// Always fails: CSV support was compiled out.
    pub fn new(_path: impl Into<PathBuf>) -> BenchResult<Self> {
        Err(BenchError::FeatureNotEnabled("storage_csv".to_string()))
    }

    /// Never reachable.
    pub fn path(&self) -> &Path {
        Path::new("")
    }
}

#[cfg(not(feature = "storage_csv"))]
impl ReportSink for CsvReport {
    fn record(&mut self, _row: &TrialResult) -> BenchResult<()> {
        Err(BenchError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

/// Rows as pretty-printed JSON; sentinels serialize as strings.
pub fn to_json(rows: &[TrialResult]) -> BenchResult<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}
