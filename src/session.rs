//! Capture Session
//!
//! One trial against one capture device: acquire under exact constraints,
//! attach, wait for the first rendered frame, sample for a fixed window,
//! reduce, release.
//!
//! All optional measurements (repeated acquisition timing, draw cost,
//! dropped-frame counting, stddev columns) are switched by the session's
//! [`MetricSet`] rather than separate session types.
//!
//! # Failure policy
//!
//! `run` never returns an error. Acquisition, attach and onset failures are
//! logged and turn the whole row into error sentinels with an achieved rate of
//! zero. A sink without any frame callbacks is not fatal: the trial keeps its
//! latency metrics and reports zero samples. The acquired stream is released
//! on every path, including a panic unwinding through the trial.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::clock::Clock;
use crate::error::{BenchError, BenchResult};
use crate::hardware::capabilities::{CaptureConstraints, CaptureDevice, MediaSink};
use crate::hardware::stream_guard::StreamGuard;
use crate::orchestrator::TrialRunner;
use crate::result::{MetricSet, TrialResult, TrialSpec};
use crate::sampler::{FrameDelivery, FrameProcessor, FrameSampler, SampleSet, SamplerConfig};
use crate::stats::{self, Metric};
use crate::surface::OffscreenSurface;

/// Default multiple of the nominal interval above which a frame is dropped.
pub const DEFAULT_DROP_THRESHOLD: f64 = 1.5;

/// Start point of the onset-latency measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnsetReference {
    /// From the acquisition request
    #[default]
    AcquisitionStart,
    /// From attaching the stream to the sink
    Attach,
}

/// Per-session measurement settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Optional metrics to collect
    pub metrics: MetricSet,
    /// Sampling window and margin
    pub sampling: SamplerConfig,
    /// Bound on the first-frame wait; `None` waits indefinitely
    pub onset_timeout: Option<Duration>,
    /// Where onset latency is measured from
    pub onset_reference: OnsetReference,
    /// Dropped-frame threshold as a multiple of the nominal interval
    pub drop_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            metrics: MetricSet::default(),
            sampling: SamplerConfig::default(),
            onset_timeout: None,
            onset_reference: OnsetReference::default(),
            drop_threshold: DEFAULT_DROP_THRESHOLD,
        }
    }
}

/// Runs trials against one device and one sink.
pub struct CaptureSession {
    device: Arc<dyn CaptureDevice>,
    sink: Box<dyn MediaSink>,
    surface: OffscreenSurface,
    clock: Arc<dyn Clock>,
    sampler: FrameSampler,
    config: SessionConfig,
}

impl CaptureSession {
    /// Create a session.
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        sink: Box<dyn MediaSink>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let sampler = FrameSampler::new(Arc::clone(&clock), config.sampling.margin);
        Self {
            device,
            sink,
            surface: OffscreenSurface::default(),
            clock,
            sampler,
            config,
        }
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one trial. Failures become sentinel values; nothing escapes.
    pub async fn run(&mut self, spec: &TrialSpec) -> TrialResult {
        let span = info_span!("trial", %spec);
        async {
            let mut slot: Option<StreamGuard> = None;
            let outcome = self.measure(spec, &mut slot).await;

            if let Some(guard) = slot.take() {
                guard.release();
            }
            self.sink.detach();

            match outcome {
                Ok(row) => {
                    info!(
                        frame_time_ms = %row.frame_time_mean,
                        onset_ms = %row.onset_latency,
                        actual_fps = %row.actual_fps,
                        "Trial complete"
                    );
                    row
                }
                Err(err) => {
                    warn!(error = %err, "Trial failed; recording error sentinels");
                    TrialResult::failed(spec, &self.config.metrics)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn measure(
        &mut self,
        spec: &TrialSpec,
        slot: &mut Option<StreamGuard>,
    ) -> BenchResult<TrialResult> {
        let metrics = self.config.metrics;
        let constraints = CaptureConstraints::exact(spec);
        let mut row = TrialResult::failed(spec, &metrics);

        // Acquisition: the last cycle's stream is kept for the trial
        let repeats = if metrics.acquisition_time {
            metrics.acquisition_repeats.max(1)
        } else {
            1
        };
        let mut acquisition_ms = Vec::with_capacity(repeats as usize);
        let mut acquisition_started = self.clock.now_ms();
        for cycle in 0..repeats {
            if cycle > 0 {
                tokio::time::sleep(Duration::from_millis(metrics.acquisition_settle_ms)).await;
            }
            acquisition_started = self.clock.now_ms();
            let stream = self
                .device
                .acquire(&constraints)
                .await
                .map_err(|e| BenchError::Acquisition(format!("{e:#}")))?;
            acquisition_ms.push(self.clock.now_ms() - acquisition_started);

            let guard = StreamGuard::new(stream);
            if cycle + 1 < repeats {
                guard.release();
            } else {
                *slot = Some(guard);
            }
        }
        debug!(samples = ?acquisition_ms, "Acquisition timed");

        if metrics.acquisition_time {
            row.acquisition_time_mean = Some(stats::mean(&acquisition_ms));
            if metrics.spread {
                row.acquisition_time_stddev = Some(stats::stddev(&acquisition_ms));
            }
        }

        // Attach and the one-shot first-frame wait
        let guard = slot
            .as_ref()
            .ok_or_else(|| BenchError::Acquisition("no stream acquired".into()))?;
        let attached_at = self.clock.now_ms();
        self.sink
            .attach(guard.stream())
            .await
            .map_err(|e| BenchError::Attach(format!("{e:#}")))?;

        let first_frame = match self.config.onset_timeout {
            Some(limit) => tokio::time::timeout(limit, self.sink.first_frame_rendered())
                .await
                .map_err(|_| BenchError::OnsetTimeout(limit))?,
            None => self.sink.first_frame_rendered().await,
        }
        .map_err(|e| BenchError::Attach(format!("{e:#}")))?;

        let reference = match self.config.onset_reference {
            OnsetReference::AcquisitionStart => acquisition_started,
            OnsetReference::Attach => attached_at,
        };
        row.onset_latency = Metric::from_value(first_frame - reference);

        // Sampling window
        let window = self.config.sampling.window;
        self.surface.resize(spec.width, spec.height);
        let samples = match FrameSampler::select_source(self.sink.as_ref()) {
            Ok(mut source) => {
                let processor: Option<&mut dyn FrameProcessor> = if metrics.draw_time {
                    Some(&mut self.surface)
                } else {
                    None
                };
                self.sampler
                    .sample_for(source.as_mut(), processor, window)
                    .await
            }
            Err(err) => {
                warn!(error = %err, "Trial yields zero samples");
                SampleSet::empty(window)
            }
        };

        row.frame_time_mean = stats::mean(&samples.intervals_ms);
        row.actual_fps = samples.actual_fps();
        if metrics.draw_time {
            row.draw_time_mean = Some(stats::mean(&samples.processing_ms));
            if metrics.spread {
                row.draw_time_stddev = Some(stats::stddev(&samples.processing_ms));
            }
        }
        if metrics.dropped_frames {
            row.dropped_frames = Some(self.dropped_frames(spec, &samples));
        }
        Ok(row)
    }

    fn dropped_frames(&self, spec: &TrialSpec, samples: &SampleSet) -> Metric {
        match samples.delivery {
            // Refresh cadence says nothing about device drops
            Some(FrameDelivery::DisplayRefresh) => Metric::Unsupported,
            _ if samples.intervals_ms.is_empty() => Metric::Error,
            _ => {
                let threshold = spec.drop_threshold_ms(self.config.drop_threshold);
                Metric::Value(stats::count_above(&samples.intervals_ms, threshold) as f64)
            }
        }
    }
}

#[async_trait]
impl TrialRunner for CaptureSession {
    async fn run_trial(&mut self, spec: &TrialSpec) -> TrialResult {
        self.run(spec).await
    }

    fn metrics(&self) -> MetricSet {
        self.config.metrics
    }
}
