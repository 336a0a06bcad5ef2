//! Multi-Stream Aggregator
//!
//! Measures frame cadence across several concurrently playing pre-recorded
//! streams instead of one live capture. All sinks play the same asset at the
//! same geometry; their sampling loops share one deadline and run interleaved
//! on the calling task, each waiting only on its own frame events. Every
//! stream's intervals are pooled into one population before reduction.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{BenchError, BenchResult};
use crate::hardware::capabilities::{MediaSink, PlaybackRequest, PlaybackSource};
use crate::hardware::stream_guard::StreamGuard;
use crate::result::{Resolution, TrialSpec};
use crate::sampler::{FrameSampler, DEFAULT_MARGIN};
use crate::stats::{self, Metric};

/// Number of playbacks opened when not configured otherwise.
pub const DEFAULT_STREAM_COUNT: usize = 5;

/// Decimals used when printing aggregate statistics.
pub const AGGREGATE_DECIMALS: usize = 3;

/// Aggregator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiStreamConfig {
    /// Playbacks to open
    pub streams: usize,
    /// Asset every playback loops over
    pub asset: String,
    /// Bound on the wait for every sink to report playing
    pub ready_timeout: Option<Duration>,
    /// Grace period after the sampling duration
    pub margin: Duration,
}

impl Default for MultiStreamConfig {
    fn default() -> Self {
        Self {
            streams: DEFAULT_STREAM_COUNT,
            asset: "participant.webm".to_string(),
            ready_timeout: None,
            margin: DEFAULT_MARGIN,
        }
    }
}

/// Pooled statistics over every stream's intervals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    /// Mean interval (ms)
    pub mean: Metric,
    /// Population stddev of the intervals (ms)
    pub stddev: Metric,
    /// Intervals in the pooled population
    pub sample_count: usize,
    /// Streams that contributed samples
    pub streams: usize,
}

impl fmt::Display for AggregateStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mean: {} ms, StdDev: {} ms ({} samples from {} streams)",
            self.mean.display(AGGREGATE_DECIMALS),
            self.stddev.display(AGGREGATE_DECIMALS),
            self.sample_count,
            self.streams
        )
    }
}

struct ActivePlayback {
    sink: Box<dyn MediaSink>,
    guard: StreamGuard,
}

/// Opens, samples and tears down a set of playbacks.
pub struct MultiStreamAggregator {
    source: Arc<dyn PlaybackSource>,
    sampler: FrameSampler,
    config: MultiStreamConfig,
    active: Vec<ActivePlayback>,
    spec: Option<TrialSpec>,
}

impl MultiStreamAggregator {
    /// Create an aggregator over a playback source.
    pub fn new(source: Arc<dyn PlaybackSource>, clock: Arc<dyn Clock>, config: MultiStreamConfig) -> Self {
        let sampler = FrameSampler::new(clock, config.margin);
        Self {
            source,
            sampler,
            config,
            active: Vec::new(),
            spec: None,
        }
    }

    /// Playbacks currently open.
    pub fn active_streams(&self) -> usize {
        self.active.len()
    }

    /// Geometry and rate of the current set, if any.
    pub fn current(&self) -> Option<TrialSpec> {
        self.spec
    }

    /// Open a fresh set of playbacks, releasing any previous set first.
    pub async fn setup(&mut self, resolution: Resolution, frame_rate: u32) -> BenchResult<()> {
        self.teardown();

        let request = PlaybackRequest {
            asset: self.config.asset.clone(),
            width: resolution.width,
            height: resolution.height,
            frame_rate,
            looped: true,
            muted: true,
        };
        for index in 0..self.config.streams {
            match self.source.open(&request).await {
                Ok(playback) => self.active.push(ActivePlayback {
                    sink: playback.sink,
                    guard: StreamGuard::new(playback.stream),
                }),
                Err(e) => {
                    self.teardown();
                    return Err(BenchError::Playback(format!("stream {index}: {e:#}")));
                }
            }
        }

        let spec = TrialSpec::new(resolution.width, resolution.height, frame_rate);
        info!(%spec, streams = self.active.len(), asset = %self.config.asset, "Playbacks ready");
        self.spec = Some(spec);
        Ok(())
    }

    /// Wait for every sink to play, sample them together for `duration`, and
    /// reduce the pooled intervals.
    pub async fn measure(&mut self, duration: Duration) -> BenchResult<AggregateStats> {
        if self.active.is_empty() {
            return Err(BenchError::NotReady);
        }

        let playing = futures::future::join_all(self.active.iter_mut().map(|p| p.sink.playing()));
        let readiness = match self.config.ready_timeout {
            Some(limit) => tokio::time::timeout(limit, playing).await.map_err(|_| {
                BenchError::Playback(format!("streams not playing within {limit:?}"))
            })?,
            None => playing.await,
        };
        for (index, ready) in readiness.into_iter().enumerate() {
            ready.map_err(|e| BenchError::Playback(format!("stream {index}: {e:#}")))?;
        }

        let mut sources = Vec::with_capacity(self.active.len());
        for (index, playback) in self.active.iter().enumerate() {
            match FrameSampler::select_source(playback.sink.as_ref()) {
                Ok(source) => sources.push(source),
                Err(err) => warn!(stream = index, error = %err, "Stream excluded from sampling"),
            }
        }

        let deadline = self.sampler.deadline(duration);
        let sampler = &self.sampler;
        let sets = futures::future::join_all(
            sources
                .iter_mut()
                .map(|source| sampler.sample(source.as_mut(), None, &deadline)),
        )
        .await;

        let streams = sets.iter().filter(|s| s.frame_count > 0).count();
        let pooled: Vec<f64> = sets.into_iter().flat_map(|s| s.intervals_ms).collect();
        let aggregate = AggregateStats {
            mean: stats::mean(&pooled),
            stddev: stats::stddev(&pooled),
            sample_count: pooled.len(),
            streams,
        };
        info!(%aggregate, "Multi-stream measurement complete");
        Ok(aggregate)
    }

    /// Stop every playback; returns how many were released.
    pub fn teardown(&mut self) -> usize {
        let released = self.active.len();
        for mut playback in self.active.drain(..) {
            playback.guard.release();
            playback.sink.detach();
        }
        if released > 0 {
            debug!(released, "Playbacks torn down");
        }
        self.spec = None;
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::hardware::mock::{MockPlaybackProfile, MockPlaybackSource, MockSinkProfile};

    fn aggregator(config: MultiStreamConfig) -> (Arc<MockPlaybackSource>, MultiStreamAggregator) {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let source = Arc::new(MockPlaybackSource::new(
            MockPlaybackProfile::default(),
            MockSinkProfile::default(),
            Arc::clone(&clock),
        ));
        let aggregator = MultiStreamAggregator::new(
            Arc::clone(&source) as Arc<dyn PlaybackSource>,
            clock,
            config,
        );
        (source, aggregator)
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_streams_pool_to_zero_spread() {
        let (_, mut aggregator) = aggregator(MultiStreamConfig::default());
        aggregator.setup(Resolution::new(640, 360), 25).await.unwrap();

        let stats = aggregator.measure(Duration::from_millis(2000)).await.unwrap();

        assert_eq!(stats.mean, Metric::Value(40.0));
        assert_eq!(stats.stddev, Metric::Value(0.0));
        assert_eq!(stats.streams, 5);
        assert!(stats.sample_count >= 5 * 45, "{stats:?}");
        assert!(stats.to_string().starts_with("Mean: 40.000 ms, StdDev: 0.000 ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_before_setup_is_not_ready() {
        let (_, mut aggregator) = aggregator(MultiStreamConfig::default());
        let err = aggregator.measure(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, BenchError::NotReady));
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_replaces_previous_set() {
        let config = MultiStreamConfig {
            streams: 3,
            ..MultiStreamConfig::default()
        };
        let (source, mut aggregator) = aggregator(config);

        aggregator.setup(Resolution::new(320, 180), 30).await.unwrap();
        aggregator.setup(Resolution::new(640, 360), 15).await.unwrap();

        assert_eq!(aggregator.active_streams(), 3);
        assert_eq!(aggregator.current(), Some(TrialSpec::new(640, 360, 15)));
        assert_eq!(source.stop_counts(), vec![1, 1, 1, 0, 0, 0]);

        assert_eq!(aggregator.teardown(), 3);
        assert_eq!(source.stop_counts(), vec![1; 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_asset_fails_setup() {
        let config = MultiStreamConfig {
            asset: String::new(),
            ..MultiStreamConfig::default()
        };
        let (_, mut aggregator) = aggregator(config);
        let err = aggregator.setup(Resolution::new(640, 360), 30).await.unwrap_err();
        assert!(matches!(err, BenchError::Playback(_)));
        assert_eq!(aggregator.active_streams(), 0);
    }
}
