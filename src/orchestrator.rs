//! Trial Orchestrator
//!
//! Sweeps the configuration matrix one trial at a time. Trials never overlap:
//! each awaits the previous one, including its stream release, because the
//! capture device is exclusive.
//!
//! Before the recorded sweep the first configuration is run once as a warm-up
//! and its result thrown away. Every trial runs under `catch_unwind`; a
//! trial that panics is replaced with an all-sentinel row and the sweep moves
//! on, so the number of rows always equals the number of configurations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{BenchError, BenchResult};
use crate::report::ReportSink;
use crate::result::{MetricSet, Resolution, TrialResult, TrialSpec};

/// Anything that can run one trial and tell which columns its rows carry.
#[async_trait]
pub trait TrialRunner: Send {
    /// Run a single trial to completion.
    async fn run_trial(&mut self, spec: &TrialSpec) -> TrialResult;

    /// Metrics the runner collects, used to shape substitute rows.
    fn metrics(&self) -> MetricSet;
}

/// Sweep behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// Run a discarded warm-up trial on the first configuration
    pub warmup: bool,
    /// Pause between consecutive trials
    pub inter_trial_pause: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            warmup: true,
            inter_trial_pause: Duration::ZERO,
        }
    }
}

/// Sweep lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SweepState {
    /// No sweep started
    Idle,
    /// Running the discarded warm-up trial
    WarmingUp,
    /// Running recorded trials
    Running,
    /// All configurations have a row
    Complete,
}

/// Progress of the current or last sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepStatus {
    /// Unique sweep identifier
    pub run_id: Option<Uuid>,
    /// Lifecycle state
    pub state: SweepState,
    /// Recorded trials finished
    pub completed: usize,
    /// Recorded trials in the matrix
    pub total: usize,
    /// Trials that panicked, warm-up included
    pub substituted: usize,
    /// Sweep start
    pub started_at: Option<DateTime<Utc>>,
    /// Sweep end
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for SweepStatus {
    fn default() -> Self {
        Self {
            run_id: None,
            state: SweepState::Idle,
            completed: 0,
            total: 0,
            substituted: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Rows of a streamed sweep and the first report failure, if any.
#[derive(Debug)]
pub struct SweepOutcome {
    /// One row per configuration, in sweep order
    pub rows: Vec<TrialResult>,
    /// First error raised by the report sink
    pub report_error: Option<BenchError>,
}

impl SweepOutcome {
    /// The rows, or the report error when the sink failed.
    pub fn into_result(self) -> BenchResult<Vec<TrialResult>> {
        match self.report_error {
            Some(err) => Err(err),
            None => Ok(self.rows),
        }
    }
}

/// Sequential sweep executor.
///
/// # Example
///
/// ```rust,ignore
/// let mut orchestrator = TrialOrchestrator::new(session, SweepConfig::default());
/// let rows = orchestrator.sweep(&resolutions, &[15, 30]).await;
/// assert_eq!(rows.len(), resolutions.len() * 2);
/// ```
pub struct TrialOrchestrator<R> {
    runner: R,
    config: SweepConfig,
    status: SweepStatus,
}

impl<R: TrialRunner> TrialOrchestrator<R> {
    /// Create an orchestrator over a trial runner.
    pub fn new(runner: R, config: SweepConfig) -> Self {
        Self {
            runner,
            config,
            status: SweepStatus::default(),
        }
    }

    /// Current sweep status.
    pub fn status(&self) -> &SweepStatus {
        &self.status
    }

    /// The wrapped runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Give back the wrapped runner.
    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Run the whole matrix and return its rows in sweep order.
    pub async fn sweep(&mut self, resolutions: &[Resolution], frame_rates: &[u32]) -> Vec<TrialResult> {
        let specs = TrialSpec::matrix(resolutions, frame_rates);
        self.run_specs(&specs, |_| {}).await
    }

    /// Run the whole matrix, streaming each row to `report` as it completes.
    ///
    /// A failing sink never stops the sweep: every configuration still runs,
    /// every row is still offered to the sink, and the first sink error comes
    /// back alongside the complete row set.
    pub async fn sweep_into(
        &mut self,
        resolutions: &[Resolution],
        frame_rates: &[u32],
        report: &mut dyn ReportSink,
    ) -> SweepOutcome {
        let specs = TrialSpec::matrix(resolutions, frame_rates);
        let mut report_error: Option<BenchError> = None;

        if let Err(err) = report.begin(&self.runner.metrics()) {
            warn!(error = %err, "Report sink failed to start; sweep continues");
            report_error = Some(err);
        }
        let rows = self
            .run_specs(&specs, |row| {
                if let Err(err) = report.record(row) {
                    warn!(
                        error = %err,
                        resolution = %row.resolution,
                        fps = row.fps,
                        "Report sink rejected row; sweep continues"
                    );
                    report_error.get_or_insert(err);
                }
            })
            .await;
        if let Err(err) = report.finish() {
            warn!(error = %err, "Report sink failed to finish");
            report_error.get_or_insert(err);
        }

        SweepOutcome { rows, report_error }
    }

    async fn run_specs<F>(&mut self, specs: &[TrialSpec], mut on_row: F) -> Vec<TrialResult>
    where
        F: FnMut(&TrialResult) + Send,
    {
        let run_id = Uuid::new_v4();
        self.status = SweepStatus {
            run_id: Some(run_id),
            total: specs.len(),
            started_at: Some(Utc::now()),
            ..SweepStatus::default()
        };

        let span = info_span!("sweep", %run_id, trials = specs.len());
        async {
            info!("Sweep started");
            let mut rows = Vec::with_capacity(specs.len());
            let mut previous_trial = false;

            if let (true, Some(first)) = (self.config.warmup, specs.first()) {
                self.status.state = SweepState::WarmingUp;
                let discarded = self.guarded_trial(first).await;
                debug!(spec = %first, ?discarded, "Warm-up trial discarded");
                previous_trial = true;
            }

            self.status.state = SweepState::Running;
            for spec in specs {
                if previous_trial && !self.config.inter_trial_pause.is_zero() {
                    tokio::time::sleep(self.config.inter_trial_pause).await;
                }
                let row = self.guarded_trial(spec).await;
                previous_trial = true;

                on_row(&row);
                rows.push(row);
                self.status.completed += 1;
            }

            self.status.state = SweepState::Complete;
            self.status.finished_at = Some(Utc::now());
            info!(
                rows = rows.len(),
                substituted = self.status.substituted,
                "Sweep complete"
            );
            rows
        }
        .instrument(span)
        .await
    }

    async fn guarded_trial(&mut self, spec: &TrialSpec) -> TrialResult {
        let metrics = self.runner.metrics();
        match AssertUnwindSafe(self.runner.run_trial(spec)).catch_unwind().await {
            Ok(row) => row,
            Err(panic) => {
                error!(
                    %spec,
                    reason = panic_message(panic.as_ref()),
                    "Trial panicked; substituting error row"
                );
                self.status.substituted += 1;
                TrialResult::substitute(spec, &metrics)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Metric;
    use tokio::time::Instant;

    /// Records every spec it runs; panics on one configuration if asked.
    struct ScriptedRunner {
        ran: Vec<TrialSpec>,
        panic_on: Option<TrialSpec>,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self {
                ran: Vec::new(),
                panic_on: None,
            }
        }
    }

    #[async_trait]
    impl TrialRunner for ScriptedRunner {
        async fn run_trial(&mut self, spec: &TrialSpec) -> TrialResult {
            self.ran.push(*spec);
            if self.panic_on == Some(*spec) {
                panic!("driver crashed");
            }
            TrialResult {
                frame_time_mean: Metric::Value(spec.nominal_interval_ms()),
                onset_latency: Metric::Value(0.0),
                actual_fps: Metric::Value(f64::from(spec.frame_rate)),
                ..TrialResult::failed(spec, &MetricSet::minimal())
            }
        }

        fn metrics(&self) -> MetricSet {
            MetricSet::minimal()
        }
    }

    fn resolutions() -> Vec<Resolution> {
        vec![Resolution::new(640, 360), Resolution::new(1280, 720)]
    }

    #[tokio::test]
    async fn test_sweep_order_and_warmup() {
        let mut orchestrator = TrialOrchestrator::new(ScriptedRunner::new(), SweepConfig::default());
        let rows = orchestrator.sweep(&resolutions(), &[15, 30]).await;

        let labels: Vec<(String, u32)> = rows.iter().map(|r| (r.resolution.clone(), r.fps)).collect();
        assert_eq!(
            labels,
            [
                ("640x360".to_string(), 15),
                ("640x360".to_string(), 30),
                ("1280x720".to_string(), 15),
                ("1280x720".to_string(), 30),
            ]
        );

        // Warm-up ran the first configuration once more, up front
        let ran = &orchestrator.runner().ran;
        assert_eq!(ran.len(), 5);
        assert_eq!(ran[0], ran[1]);

        let status = orchestrator.status();
        assert_eq!(status.state, SweepState::Complete);
        assert_eq!((status.completed, status.total), (4, 4));
        assert!(status.run_id.is_some());
    }

    #[tokio::test]
    async fn test_warmup_can_be_disabled() {
        let config = SweepConfig {
            warmup: false,
            ..SweepConfig::default()
        };
        let mut orchestrator = TrialOrchestrator::new(ScriptedRunner::new(), config);
        let rows = orchestrator.sweep(&resolutions(), &[30]).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(orchestrator.runner().ran.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_matrix_runs_nothing() {
        let mut orchestrator = TrialOrchestrator::new(ScriptedRunner::new(), SweepConfig::default());
        let rows = orchestrator.sweep(&resolutions(), &[]).await;
        assert!(rows.is_empty());
        assert!(orchestrator.runner().ran.is_empty());
        assert_eq!(orchestrator.status().state, SweepState::Complete);
    }

    #[tokio::test]
    async fn test_panicking_trial_is_substituted() {
        let mut runner = ScriptedRunner::new();
        runner.panic_on = Some(TrialSpec::new(640, 360, 30));
        let mut orchestrator = TrialOrchestrator::new(runner, SweepConfig::default());

        let rows = orchestrator.sweep(&resolutions(), &[15, 30]).await;

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1], TrialResult::substitute(&TrialSpec::new(640, 360, 30), &MetricSet::minimal()));
        assert_eq!(rows[1].actual_fps, Metric::Error);
        assert_eq!(rows[2].actual_fps, Metric::Value(15.0));
        assert_eq!(orchestrator.status().substituted, 1);
    }

    #[tokio::test]
    async fn test_panicking_warmup_is_discarded() {
        let mut runner = ScriptedRunner::new();
        runner.panic_on = Some(TrialSpec::new(640, 360, 15));
        let mut orchestrator = TrialOrchestrator::new(runner, SweepConfig::default());

        let rows = orchestrator.sweep(&[Resolution::new(640, 360)], &[15, 30]).await;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].actual_fps, Metric::Value(30.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_trial_pause() {
        let config = SweepConfig {
            warmup: true,
            inter_trial_pause: Duration::from_millis(1000),
        };
        let mut orchestrator = TrialOrchestrator::new(ScriptedRunner::new(), config);

        let started = Instant::now();
        let rows = orchestrator.sweep(&[Resolution::new(640, 360)], &[15, 20, 30]).await;

        assert_eq!(rows.len(), 3);
        // Pauses after the warm-up and between each recorded trial
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(started.elapsed() < Duration::from_millis(3100));
    }

    #[tokio::test]
    async fn test_sweep_into_streams_rows() {
        let mut orchestrator = TrialOrchestrator::new(ScriptedRunner::new(), SweepConfig::default());
        let mut report: Vec<TrialResult> = Vec::new();

        let rows = orchestrator
            .sweep_into(&resolutions(), &[30], &mut report)
            .await
            .into_result()
            .unwrap();

        assert_eq!(rows, report);
    }

    /// Accepts rows except the configured one, which fails like a full disk.
    #[derive(Default)]
    struct FlakySink {
        fail_on: usize,
        offered: usize,
        kept: Vec<TrialResult>,
        finished: bool,
    }

    impl ReportSink for FlakySink {
        fn record(&mut self, row: &TrialResult) -> BenchResult<()> {
            self.offered += 1;
            if self.offered == self.fail_on {
                return Err(BenchError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "no space left on device",
                )));
            }
            self.kept.push(row.clone());
            Ok(())
        }

        fn finish(&mut self) -> BenchResult<()> {
            self.finished = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_report_failure_does_not_stop_sweep() {
        let config = SweepConfig {
            warmup: false,
            ..SweepConfig::default()
        };
        let mut orchestrator = TrialOrchestrator::new(ScriptedRunner::new(), config);
        let mut sink = FlakySink {
            fail_on: 2,
            ..FlakySink::default()
        };

        let outcome = orchestrator.sweep_into(&resolutions(), &[15, 30], &mut sink).await;

        assert_eq!(outcome.rows.len(), 4);
        assert_eq!(orchestrator.runner().ran.len(), 4);
        let status = orchestrator.status();
        assert_eq!(status.state, SweepState::Complete);
        assert_eq!(status.completed, 4);

        // Rows after the failure still reach the sink
        assert_eq!(sink.offered, 4);
        assert_eq!(sink.kept.len(), 3);
        assert_eq!(sink.kept[1], outcome.rows[2]);
        assert!(sink.finished);
        assert!(matches!(outcome.report_error, Some(BenchError::Io(_))));
        assert!(outcome.into_result().is_err());
    }
}
