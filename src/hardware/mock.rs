//! Mock Hardware Implementations
//!
//! Simulated capture devices, sinks and playback sources for running sweeps
//! without a physical camera. All timing uses tokio timers, so under a paused
//! test runtime every latency and interval is deterministic.
//!
//! # Available Mocks
//!
//! - `MockCaptureDevice` - exclusive camera with exact-mode validation
//! - `MockSink` - playable sink with device-frame and display-refresh callbacks
//! - `MockPlaybackSource` - looping playback of a named asset
//!
//! # Fault Injection
//!
//! Profiles can add a one-off warm-up penalty to the first acquisition, jitter
//! frame timestamps, drop frames at random (seeded), reject modes, stall the
//! stream so no frame is ever delivered, and disable either callback form.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval_at, sleep, Duration, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::hardware::capabilities::{
    CaptureConstraints, CaptureDevice, CaptureStream, Frame, FrameEvent, FrameFeed,
    FrameMetadata, MediaSink, MediaTrack, Playback, PlaybackRequest, PlaybackSource, TrackKind,
};
use crate::result::TrialSpec;
use crate::sampler::{FrameSource, RefreshFrameSource, VideoFrameSource};

/// Events buffered per frame-feed subscriber.
const FEED_CAPACITY: usize = 64;

// =============================================================================
// Profiles
// =============================================================================

/// Timing and fault behaviour of a simulated camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockCameraProfile {
    /// Latency of every acquisition request
    pub acquisition_delay_ms: u64,
    /// Extra latency of the very first acquisition
    pub warmup_penalty_ms: u64,
    /// Delay from acquisition to the first delivered frame
    pub first_frame_delay_ms: u64,
    /// Uniform timestamp jitter, +/- this many ms
    pub jitter_ms: f64,
    /// Probability that any given frame is never delivered
    pub drop_probability: f64,
    /// Largest supported width
    pub max_width: u32,
    /// Largest supported height
    pub max_height: u32,
    /// Supported frame rates
    pub frame_rates: Vec<u32>,
    /// Modes rejected even though they are within limits
    pub reject: Vec<TrialSpec>,
    /// Acquire successfully but never deliver a frame
    pub stall: bool,
    /// RNG seed for jitter and drops
    pub seed: u64,
}

impl Default for MockCameraProfile {
    fn default() -> Self {
        Self {
            acquisition_delay_ms: 40,
            warmup_penalty_ms: 250,
            first_frame_delay_ms: 60,
            jitter_ms: 0.5,
            drop_probability: 0.0,
            max_width: 1920,
            max_height: 1080,
            frame_rates: vec![15, 20, 30],
            reject: Vec::new(),
            stall: false,
            seed: 7,
        }
    }
}

impl MockCameraProfile {
    /// Zero latency, zero jitter, every mode up to 1080p at 1-60 fps.
    pub fn ideal() -> Self {
        Self {
            acquisition_delay_ms: 0,
            warmup_penalty_ms: 0,
            first_frame_delay_ms: 0,
            jitter_ms: 0.0,
            frame_rates: (1..=60).collect(),
            ..Self::default()
        }
    }

    fn supports(&self, c: &CaptureConstraints) -> bool {
        let requested = TrialSpec::new(c.exact_width, c.exact_height, c.exact_frame_rate);
        c.exact_width > 0
            && c.exact_height > 0
            && c.exact_width <= self.max_width
            && c.exact_height <= self.max_height
            && self.frame_rates.contains(&c.exact_frame_rate)
            && !self.reject.contains(&requested)
    }
}

/// Capabilities and render timing of a simulated sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockSinkProfile {
    /// Offer per-frame callbacks
    pub frame_callbacks: bool,
    /// Offer display-refresh callbacks
    pub refresh_callbacks: bool,
    /// Display refresh rate
    pub refresh_hz: u32,
    /// Delay between frame arrival and first render
    pub render_delay_ms: u64,
}

impl Default for MockSinkProfile {
    fn default() -> Self {
        Self {
            frame_callbacks: true,
            refresh_callbacks: true,
            refresh_hz: 60,
            render_delay_ms: 8,
        }
    }
}

/// Timing of simulated playbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockPlaybackProfile {
    /// Delay before the first decoded frame
    pub startup_delay_ms: u64,
    /// Uniform timestamp jitter, +/- this many ms
    pub jitter_ms: f64,
    /// Probability that any given frame is skipped
    pub drop_probability: f64,
    /// Base RNG seed, offset per opened playback
    pub seed: u64,
}

impl Default for MockPlaybackProfile {
    fn default() -> Self {
        Self {
            startup_delay_ms: 30,
            jitter_ms: 0.0,
            drop_probability: 0.0,
            seed: 11,
        }
    }
}

/// Every simulated collaborator's profile, as carried in configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Camera behaviour
    pub camera: MockCameraProfile,
    /// Sink behaviour
    pub sink: MockSinkProfile,
    /// Playback behaviour
    pub playback: MockPlaybackProfile,
}

// =============================================================================
// Tracks, streams and the frame emitter
// =============================================================================

/// A simulated track that counts how often it was stopped.
#[derive(Debug)]
pub struct MockTrack {
    label: String,
    live: AtomicBool,
    stop_calls: AtomicUsize,
}

impl MockTrack {
    fn new(label: String) -> Self {
        Self {
            label,
            live: AtomicBool::new(true),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// Number of `stop()` calls received
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// A simulated stream with a single video track.
pub struct MockStream {
    id: String,
    track: Arc<MockTrack>,
    feed: FrameFeed,
}

impl CaptureStream for MockStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        vec![Arc::clone(&self.track) as Arc<dyn MediaTrack>]
    }

    fn frame_feed(&self) -> FrameFeed {
        self.feed.clone()
    }
}

#[derive(Debug, Clone, Copy)]
struct EmitterSettings {
    width: u32,
    height: u32,
    frame_rate: u32,
    first_frame_delay: Duration,
    jitter_ms: f64,
    drop_probability: f64,
    seed: u64,
}

/// Publish frames at the nominal rate until the track is stopped or dropped.
fn spawn_emitter(
    settings: EmitterSettings,
    feed: FrameFeed,
    track: Weak<MockTrack>,
    clock: Arc<dyn Clock>,
) {
    tokio::spawn(async move {
        let period = Duration::from_secs_f64(1.0 / f64::from(settings.frame_rate.max(1)));
        let mut ticker = interval_at(Instant::now() + settings.first_frame_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut rng = StdRng::seed_from_u64(settings.seed);
        let drop_probability = settings.drop_probability.clamp(0.0, 1.0);
        let frame = Arc::new(Frame::test_pattern(settings.width, settings.height));
        let mut presented = 0u64;

        loop {
            ticker.tick().await;
            match track.upgrade() {
                Some(t) if t.is_live() => {}
                _ => break,
            }
            if drop_probability > 0.0 && rng.gen_bool(drop_probability) {
                trace!("Mock emitter dropped a frame");
                continue;
            }
            presented += 1;
            let jitter = if settings.jitter_ms > 0.0 {
                rng.gen_range(-settings.jitter_ms..=settings.jitter_ms)
            } else {
                0.0
            };
            feed.publish(FrameEvent {
                timestamp_ms: clock.now_ms() + jitter,
                frame: Some(Arc::clone(&frame)),
                metadata: Some(FrameMetadata {
                    presented_frames: presented,
                    width: settings.width,
                    height: settings.height,
                }),
            });
        }
        debug!(presented, "Mock emitter stopped");
    });
}

// =============================================================================
// MockCaptureDevice
// =============================================================================

/// Simulated exclusive camera.
///
/// Keeps a ledger of every track it hands out so tests can assert how often
/// each one was stopped.
///
/// # Example
///
/// ```rust,ignore
/// let device = MockCaptureDevice::new(MockCameraProfile::default(), clock);
/// let stream = device.acquire(&constraints).await?;
/// stream.tracks()[0].stop();
/// assert_eq!(device.stop_counts(), vec![1]);
/// ```
pub struct MockCaptureDevice {
    profile: MockCameraProfile,
    clock: Arc<dyn Clock>,
    acquisitions: AtomicUsize,
    ledger: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockCaptureDevice {
    /// Create a device with the given behaviour.
    pub fn new(profile: MockCameraProfile, clock: Arc<dyn Clock>) -> Self {
        Self {
            profile,
            clock,
            acquisitions: AtomicUsize::new(0),
            ledger: Mutex::new(Vec::new()),
        }
    }

    /// Acquisition requests seen, successful or not.
    pub fn acquisition_attempts(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Stop calls per handed-out track, in acquisition order.
    pub fn stop_counts(&self) -> Vec<usize> {
        self.ledger.lock().iter().map(|t| t.stop_calls()).collect()
    }

    /// Tracks still live.
    pub fn live_tracks(&self) -> usize {
        self.ledger.lock().iter().filter(|t| t.is_live()).count()
    }
}

#[async_trait]
impl CaptureDevice for MockCaptureDevice {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>> {
        let attempt = self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let mut delay = self.profile.acquisition_delay_ms;
        if attempt == 0 {
            delay += self.profile.warmup_penalty_ms;
        }
        sleep(Duration::from_millis(delay)).await;

        if self.live_tracks() > 0 {
            bail!("NotReadableError: device busy");
        }
        if !self.profile.supports(constraints) {
            bail!(
                "OverconstrainedError: {}x{}@{} not supported",
                constraints.exact_width,
                constraints.exact_height,
                constraints.exact_frame_rate
            );
        }

        let id = format!("mock-camera-{attempt}");
        let track = Arc::new(MockTrack::new(format!("{id}:video")));
        self.ledger.lock().push(Arc::clone(&track));

        let feed = FrameFeed::new(FEED_CAPACITY);
        if !self.profile.stall {
            spawn_emitter(
                EmitterSettings {
                    width: constraints.exact_width,
                    height: constraints.exact_height,
                    frame_rate: constraints.exact_frame_rate,
                    first_frame_delay: Duration::from_millis(self.profile.first_frame_delay_ms),
                    jitter_ms: self.profile.jitter_ms,
                    drop_probability: self.profile.drop_probability,
                    seed: self.profile.seed.wrapping_add(attempt as u64),
                },
                feed.clone(),
                Arc::downgrade(&track),
                Arc::clone(&self.clock),
            );
        }
        debug!(stream = %id, delay_ms = delay, "Mock camera acquired");

        Ok(Box::new(MockStream { id, track, feed }))
    }
}

// =============================================================================
// MockSink
// =============================================================================

/// Simulated video element.
pub struct MockSink {
    profile: MockSinkProfile,
    clock: Arc<dyn Clock>,
    feed: Option<FrameFeed>,
    first_frame_rx: Option<broadcast::Receiver<FrameEvent>>,
    first_frame_at: Option<f64>,
}

impl MockSink {
    /// Create an empty sink.
    pub fn new(profile: MockSinkProfile, clock: Arc<dyn Clock>) -> Self {
        Self {
            profile,
            clock,
            feed: None,
            first_frame_rx: None,
            first_frame_at: None,
        }
    }

    /// Whether a stream is attached.
    pub fn is_attached(&self) -> bool {
        self.feed.is_some()
    }
}

#[async_trait]
impl MediaSink for MockSink {
    async fn attach(&mut self, stream: &dyn CaptureStream) -> Result<()> {
        let feed = stream.frame_feed();
        self.first_frame_rx = Some(feed.subscribe());
        self.feed = Some(feed);
        self.first_frame_at = None;
        Ok(())
    }

    async fn first_frame_rendered(&mut self) -> Result<f64> {
        if let Some(at) = self.first_frame_at {
            return Ok(at);
        }
        let rx = self
            .first_frame_rx
            .as_mut()
            .ok_or_else(|| anyhow!("no stream attached"))?;
        match rx.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => bail!("stream ended before its first frame"),
        }
        self.first_frame_rx = None;

        if self.profile.render_delay_ms > 0 {
            sleep(Duration::from_millis(self.profile.render_delay_ms)).await;
        }
        let at = self.clock.now_ms();
        self.first_frame_at = Some(at);
        Ok(at)
    }

    fn frame_callbacks(&self) -> Option<Box<dyn FrameSource>> {
        if !self.profile.frame_callbacks {
            return None;
        }
        self.feed
            .as_ref()
            .map(|f| Box::new(VideoFrameSource::new(f.subscribe())) as Box<dyn FrameSource>)
    }

    fn refresh_callbacks(&self) -> Option<Box<dyn FrameSource>> {
        if !self.profile.refresh_callbacks {
            return None;
        }
        self.feed.as_ref().map(|f| {
            Box::new(RefreshFrameSource::new(
                f.subscribe(),
                self.profile.refresh_hz,
                Arc::clone(&self.clock),
            )) as Box<dyn FrameSource>
        })
    }

    fn detach(&mut self) {
        self.feed = None;
        self.first_frame_rx = None;
        self.first_frame_at = None;
    }
}

// =============================================================================
// MockPlaybackSource
// =============================================================================

/// Opens looping, muted playbacks that run until their track is stopped.
pub struct MockPlaybackSource {
    profile: MockPlaybackProfile,
    sink_profile: MockSinkProfile,
    clock: Arc<dyn Clock>,
    ledger: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockPlaybackSource {
    /// Create a playback source.
    pub fn new(
        profile: MockPlaybackProfile,
        sink_profile: MockSinkProfile,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            profile,
            sink_profile,
            clock,
            ledger: Mutex::new(Vec::new()),
        }
    }

    /// Stop calls per opened playback, in open order.
    pub fn stop_counts(&self) -> Vec<usize> {
        self.ledger.lock().iter().map(|t| t.stop_calls()).collect()
    }
}

#[async_trait]
impl PlaybackSource for MockPlaybackSource {
    async fn open(&self, request: &PlaybackRequest) -> Result<Playback> {
        if request.asset.trim().is_empty() {
            bail!("no playback asset given");
        }
        if request.frame_rate == 0 {
            bail!("playback frame rate must be positive");
        }

        let index = {
            let ledger = self.ledger.lock();
            ledger.len()
        };
        let id = format!("playback-{index}:{}", request.asset);
        let track = Arc::new(MockTrack::new(format!("{id}:video")));
        self.ledger.lock().push(Arc::clone(&track));

        let feed = FrameFeed::new(FEED_CAPACITY);
        spawn_emitter(
            EmitterSettings {
                width: request.width,
                height: request.height,
                frame_rate: request.frame_rate,
                first_frame_delay: Duration::from_millis(self.profile.startup_delay_ms),
                jitter_ms: self.profile.jitter_ms,
                drop_probability: self.profile.drop_probability,
                seed: self.profile.seed.wrapping_add(index as u64),
            },
            feed.clone(),
            Arc::downgrade(&track),
            Arc::clone(&self.clock),
        );

        let stream = MockStream { id, track, feed };
        let mut sink = MockSink::new(self.sink_profile.clone(), Arc::clone(&self.clock));
        sink.attach(&stream).await?;

        Ok(Playback {
            sink: Box::new(sink),
            stream: Box::new(stream),
        })
    }
}
