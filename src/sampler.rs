//! Frame Sampler
//!
//! Deadline-bounded collection of frame-arrival timestamps from a sink.
//!
//! Two delivery mechanisms sit behind the [`FrameSource`] trait:
//!
//! - [`VideoFrameSource`]: one event per captured frame, stamped with the
//!   producer's timestamp. Preferred because it follows capture cadence.
//! - [`RefreshFrameSource`]: one event per display refresh, carrying whatever
//!   frame the sink currently shows. Fallback only; it samples display cadence
//!   and may over- or under-count relative to the device.
//!
//! [`FrameSampler::sample`] drives a source in an explicit loop. Every event
//! is checked against the window deadline before any work is done: an event
//! arriving after the deadline is discarded and the loop does not ask for
//! another. The whole loop additionally runs under an outer timer of
//! `window + margin`, and the sampler always waits for that timer before
//! returning, so a stalled source still yields (possibly zero) samples and no
//! in-flight event can land after the counts are read.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::error::{BenchError, BenchResult};
use crate::hardware::capabilities::{Frame, FrameEvent, MediaSink};
use crate::stats::Metric;

/// Default sampling window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(2000);

/// Default grace period after the window before counts are read.
pub const DEFAULT_MARGIN: Duration = Duration::from_millis(100);

/// How a source is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDelivery {
    /// Once per captured or decoded frame
    DeviceFrame,
    /// Once per display refresh
    DisplayRefresh,
}

/// A stream of frame-arrival events.
///
/// Each call to `next_frame` re-arms the source for exactly one more event.
/// `None` means the source has closed and will deliver nothing further.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next event.
    async fn next_frame(&mut self) -> Option<FrameEvent>;

    /// Delivery mechanism behind this source.
    fn delivery(&self) -> FrameDelivery;
}

/// Per-frame work whose cost is measured during sampling.
pub trait FrameProcessor: Send {
    /// Handle one delivered frame.
    fn process(&mut self, event: &FrameEvent);
}

/// Device-frame callbacks backed by a broadcast subscription.
pub struct VideoFrameSource {
    rx: broadcast::Receiver<FrameEvent>,
}

impl VideoFrameSource {
    /// Wrap a subscription to a stream's frame feed.
    pub fn new(rx: broadcast::Receiver<FrameEvent>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl FrameSource for VideoFrameSource {
    async fn next_frame(&mut self) -> Option<FrameEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Frame callback lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn delivery(&self) -> FrameDelivery {
        FrameDelivery::DeviceFrame
    }
}

/// Display-refresh callbacks: ticks at the refresh rate and reports the most
/// recent frame seen on the feed.
pub struct RefreshFrameSource {
    rx: broadcast::Receiver<FrameEvent>,
    period: Duration,
    ticker: Option<Interval>,
    clock: Arc<dyn Clock>,
    current: Option<Arc<Frame>>,
}

impl RefreshFrameSource {
    /// Refresh callbacks at `refresh_hz` over the given feed subscription.
    pub fn new(rx: broadcast::Receiver<FrameEvent>, refresh_hz: u32, clock: Arc<dyn Clock>) -> Self {
        let period = Duration::from_secs_f64(1.0 / f64::from(refresh_hz.max(1)));
        Self {
            rx,
            period,
            ticker: None,
            clock,
            current: None,
        }
    }

    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if event.frame.is_some() {
                        self.current = event.frame;
                    }
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}

#[async_trait]
impl FrameSource for RefreshFrameSource {
    async fn next_frame(&mut self) -> Option<FrameEvent> {
        let period = self.period;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        ticker.tick().await;
        self.drain();
        Some(FrameEvent {
            timestamp_ms: self.clock.now_ms(),
            frame: self.current.clone(),
            metadata: None,
        })
    }

    fn delivery(&self) -> FrameDelivery {
        FrameDelivery::DisplayRefresh
    }
}

/// Stop conditions for one sampling window.
#[derive(Debug, Clone, Copy)]
pub struct SamplingDeadline {
    /// Clock time after which events are discarded
    pub stop_at_ms: f64,
    /// Instant at which the sampler stops waiting
    pub outer: Instant,
    /// Nominal window length
    pub window: Duration,
}

/// Samples collected in one window.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    /// Events accepted inside the window
    pub frame_count: usize,
    /// Intervals between consecutive accepted events (ms)
    pub intervals_ms: Vec<f64>,
    /// Processing cost of each accepted event (ms)
    pub processing_ms: Vec<f64>,
    /// Delivery mechanism, `None` when no source was available
    pub delivery: Option<FrameDelivery>,
    /// Nominal window length
    pub window: Duration,
}

impl SampleSet {
    /// No samples at all.
    pub fn empty(window: Duration) -> Self {
        Self {
            frame_count: 0,
            intervals_ms: Vec::new(),
            processing_ms: Vec::new(),
            delivery: None,
            window,
        }
    }

    /// `frame_count / window seconds`, independent of the interval series.
    pub fn actual_fps(&self) -> Metric {
        let secs = self.window.as_secs_f64();
        if secs <= 0.0 {
            return Metric::Error;
        }
        Metric::from_value(self.frame_count as f64 / secs)
    }
}

/// Sampling window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Window length
    pub window: Duration,
    /// Extra wait after the window before counts are read
    pub margin: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            margin: DEFAULT_MARGIN,
        }
    }
}

/// Drives frame sources within deadlines read from an injected clock.
#[derive(Clone)]
pub struct FrameSampler {
    clock: Arc<dyn Clock>,
    margin: Duration,
}

impl FrameSampler {
    /// Create a sampler with the given grace margin.
    pub fn new(clock: Arc<dyn Clock>, margin: Duration) -> Self {
        Self { clock, margin }
    }

    /// Probe the sink: device-frame callbacks when supported, otherwise
    /// display-refresh callbacks.
    pub fn select_source(sink: &dyn MediaSink) -> BenchResult<Box<dyn FrameSource>> {
        sink.frame_callbacks()
            .or_else(|| sink.refresh_callbacks())
            .ok_or(BenchError::SamplingUnsupported)
    }

    /// Deadline for a window starting now.
    pub fn deadline(&self, window: Duration) -> SamplingDeadline {
        SamplingDeadline {
            stop_at_ms: self.clock.now_ms() + window.as_secs_f64() * 1000.0,
            outer: Instant::now() + window + self.margin,
            window,
        }
    }

    /// Sample a source for `window` starting now.
    pub async fn sample_for(
        &self,
        source: &mut dyn FrameSource,
        processor: Option<&mut dyn FrameProcessor>,
        window: Duration,
    ) -> SampleSet {
        let deadline = self.deadline(window);
        self.sample(source, processor, &deadline).await
    }

    /// Sample a source until `deadline`, then wait out the outer timer.
    ///
    /// Several calls may share one deadline; they then all return at the
    /// same outer instant.
    pub async fn sample(
        &self,
        source: &mut dyn FrameSource,
        mut processor: Option<&mut dyn FrameProcessor>,
        deadline: &SamplingDeadline,
    ) -> SampleSet {
        let mut set = SampleSet {
            delivery: Some(source.delivery()),
            ..SampleSet::empty(deadline.window)
        };
        let clock = Arc::clone(&self.clock);

        let collect = async {
            let mut previous: Option<f64> = None;
            while let Some(event) = source.next_frame().await {
                if clock.now_ms() > deadline.stop_at_ms {
                    trace!("Suppressed frame after deadline");
                    break;
                }
                set.frame_count += 1;
                if let Some(prev) = previous {
                    set.intervals_ms.push(event.timestamp_ms - prev);
                }
                previous = Some(event.timestamp_ms);

                if let Some(p) = processor.as_deref_mut() {
                    let started = clock.now_ms();
                    p.process(&event);
                    set.processing_ms.push(clock.now_ms() - started);
                }
            }
        };
        let finished = tokio::time::timeout_at(deadline.outer, collect).await.is_ok();
        tokio::time::sleep_until(deadline.outer).await;

        debug!(
            frames = set.frame_count,
            intervals = set.intervals_ms.len(),
            loop_finished = finished,
            "Sampling window complete"
        );
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::hardware::capabilities::FrameFeed;

    /// Emits `frames` events `period` apart, then stalls forever.
    struct ScriptedSource {
        period: Duration,
        remaining: Option<usize>,
        clock: Arc<dyn Clock>,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Option<FrameEvent> {
            match self.remaining.as_mut() {
                Some(0) => std::future::pending::<()>().await,
                Some(n) => *n -= 1,
                None => {}
            }
            tokio::time::sleep(self.period).await;
            Some(FrameEvent {
                timestamp_ms: self.clock.now_ms(),
                frame: None,
                metadata: None,
            })
        }

        fn delivery(&self) -> FrameDelivery {
            FrameDelivery::DeviceFrame
        }
    }

    #[derive(Default)]
    struct CountingProcessor {
        calls: usize,
    }

    impl FrameProcessor for CountingProcessor {
        fn process(&mut self, _event: &FrameEvent) {
            self.calls += 1;
        }
    }

    fn setup() -> (Arc<dyn Clock>, FrameSampler) {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let sampler = FrameSampler::new(Arc::clone(&clock), DEFAULT_MARGIN);
        (clock, sampler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_actual_fps_is_count_over_window() {
        let (clock, sampler) = setup();
        let mut source = ScriptedSource {
            period: Duration::from_millis(40),
            remaining: Some(10),
            clock,
        };

        let started = Instant::now();
        let set = sampler.sample_for(&mut source, None, DEFAULT_WINDOW).await;

        assert_eq!(set.frame_count, 10);
        assert_eq!(set.actual_fps(), Metric::Value(5.0));
        assert_eq!(set.intervals_ms, vec![40.0; 9]);
        assert!(started.elapsed() >= DEFAULT_WINDOW + DEFAULT_MARGIN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_source_returns_at_outer_deadline() {
        let (clock, sampler) = setup();
        let mut source = ScriptedSource {
            period: Duration::from_millis(40),
            remaining: Some(0),
            clock,
        };

        let started = Instant::now();
        let set = sampler.sample_for(&mut source, None, DEFAULT_WINDOW).await;

        assert_eq!(set.frame_count, 0);
        assert!(set.intervals_ms.is_empty());
        assert_eq!(set.actual_fps(), Metric::Value(0.0));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(2100));
        assert!(waited < Duration::from_millis(2150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_deadline_frame_does_no_work() {
        let (clock, sampler) = setup();
        let mut source = ScriptedSource {
            period: Duration::from_millis(40),
            remaining: None,
            clock,
        };
        let mut processor = CountingProcessor::default();

        let set = sampler
            .sample_for(&mut source, Some(&mut processor), DEFAULT_WINDOW)
            .await;

        // 50 frames fit in 2000 ms at 40 ms; the one at 2040 ms is discarded
        assert!((49..=50).contains(&set.frame_count), "{}", set.frame_count);
        assert_eq!(processor.calls, set.frame_count);
        assert_eq!(set.processing_ms.len(), set.frame_count);
        assert_eq!(set.intervals_ms.len(), set.frame_count - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_deadline_bounds_concurrent_loops() {
        let (clock, sampler) = setup();
        let mut sources: Vec<ScriptedSource> = [20u64, 40, 50]
            .iter()
            .map(|&ms| ScriptedSource {
                period: Duration::from_millis(ms),
                remaining: None,
                clock: Arc::clone(&clock),
            })
            .collect();

        let deadline = sampler.deadline(Duration::from_millis(1000));
        let started = Instant::now();
        let sets = futures::future::join_all(
            sources
                .iter_mut()
                .map(|s| sampler.sample(s, None, &deadline)),
        )
        .await;

        assert!(started.elapsed() >= Duration::from_millis(1100));
        let counts: Vec<usize> = sets.iter().map(|s| s.frame_count).collect();
        assert!((49..=50).contains(&counts[0]), "{counts:?}");
        assert!((24..=25).contains(&counts[1]), "{counts:?}");
        assert!((19..=20).contains(&counts[2]), "{counts:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_source_reports_latest_frame() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let feed = FrameFeed::new(8);
        let mut source = RefreshFrameSource::new(feed.subscribe(), 60, Arc::clone(&clock));
        assert_eq!(source.delivery(), FrameDelivery::DisplayRefresh);

        let first = source.next_frame().await.unwrap();
        assert!(first.frame.is_none());

        feed.publish(FrameEvent {
            timestamp_ms: clock.now_ms(),
            frame: Some(Arc::new(Frame::test_pattern(4, 2))),
            metadata: None,
        });
        let second = source.next_frame().await.unwrap();
        assert_eq!(second.frame.map(|f| f.width), Some(4));
        assert!(second.timestamp_ms > first.timestamp_ms);

        // Refresh keeps firing without new frames, showing the same frame
        let third = source.next_frame().await.unwrap();
        assert!(third.frame.is_some());
    }

    #[tokio::test]
    async fn test_video_source_closes_with_feed() {
        let feed = FrameFeed::new(4);
        let mut source = VideoFrameSource::new(feed.subscribe());
        feed.publish(FrameEvent {
            timestamp_ms: 1.0,
            frame: None,
            metadata: None,
        });
        drop(feed);

        assert_eq!(source.next_frame().await.map(|e| e.timestamp_ms), Some(1.0));
        assert!(source.next_frame().await.is_none());
    }
}
