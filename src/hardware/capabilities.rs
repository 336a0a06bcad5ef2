//! Capture Collaborator Capabilities
//!
//! Small, focused traits for the external collaborators a benchmark trial talks
//! to. The harness never touches a concrete camera or video element; it only
//! sees these seams:
//!
//! - `CaptureDevice`: acquires a stream under exact constraints
//! - `CaptureStream` / `MediaTrack`: the acquired stream and its stoppable tracks
//! - `MediaSink`: a playable sink that renders an attached stream and exposes
//!   one-shot "first frame rendered" / "playing" notifications plus the two
//!   frame-arrival callback forms
//! - `PlaybackSource`: opens looping pre-recorded streams for multi-stream runs
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async where the collaborator suspends (uses #[async_trait])
//! - Is thread-safe (requires Send, and Sync where shared by reference)
//! - Uses anyhow::Result for errors; the capture session classifies them
//!
//! # Example
//!
//! ```rust,ignore
//! let stream = device.acquire(&CaptureConstraints::exact(&spec)).await?;
//! sink.attach(stream.as_ref()).await?;
//! let first_frame_ms = sink.first_frame_rendered().await?;
//!
//! let source = sink
//!     .frame_callbacks()
//!     .or_else(|| sink.refresh_callbacks());
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::result::TrialSpec;
use crate::sampler::FrameSource;

// =============================================================================
// Frames
// =============================================================================

/// A single 8-bit luma image as delivered by a capture or playback stream.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major pixel data, `width * height` bytes
    pub pixels: Arc<[u8]>,
}

impl Frame {
    /// Create a frame from raw row-major pixels.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }

    /// Diagonal gradient test pattern.
    pub fn test_pattern(width: u32, height: u32) -> Self {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| ((x + y) % 256) as u8))
            .collect();
        Self::new(width, height, pixels)
    }
}

/// Optional per-frame metadata carried by device-frame callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    /// Frames presented by the producer since the stream started
    pub presented_frames: u64,
    /// Width of the delivered frame
    pub width: u32,
    /// Height of the delivered frame
    pub height: u32,
}

/// One frame-arrival notification.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    /// Arrival timestamp in clock milliseconds
    pub timestamp_ms: f64,
    /// The frame currently shown by the sink, when the delivery path has one
    pub frame: Option<Arc<Frame>>,
    /// Producer metadata (device-frame callbacks only)
    pub metadata: Option<FrameMetadata>,
}

/// Fan-out handle for a stream's frame events.
///
/// Cloning shares the same channel; every `subscribe` gets an independent
/// receiver that only sees frames sent after it subscribed.
#[derive(Debug, Clone)]
pub struct FrameFeed {
    tx: broadcast::Sender<FrameEvent>,
}

impl FrameFeed {
    /// Create a feed buffering at most `capacity` undelivered events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; returns the number of receivers that got it.
    pub fn publish(&self, event: FrameEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<FrameEvent> {
        self.tx.subscribe()
    }
}

// =============================================================================
// Acquisition
// =============================================================================

/// Exact capture constraints. There is no negotiation: a device that cannot
/// satisfy all three values must fail the acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    /// Exact frame width in pixels
    pub exact_width: u32,
    /// Exact frame height in pixels
    pub exact_height: u32,
    /// Exact frame rate in frames per second
    pub exact_frame_rate: u32,
}

impl CaptureConstraints {
    /// Constraints requesting exactly the trial's geometry and rate.
    pub fn exact(spec: &TrialSpec) -> Self {
        Self {
            exact_width: spec.width,
            exact_height: spec.height,
            exact_frame_rate: spec.frame_rate,
        }
    }
}

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Video frames
    Video,
    /// Audio samples
    Audio,
}

/// One stoppable constituent of an acquired stream.
///
/// # Contract
/// - `stop()` releases the underlying device resource
/// - after `stop()`, `is_live()` returns false and no further frames flow
pub trait MediaTrack: Send + Sync {
    /// Human-readable track label
    fn label(&self) -> &str;

    /// Media kind
    fn kind(&self) -> TrackKind;

    /// Stop the track and release its device resource.
    fn stop(&self);

    /// Whether the track is still delivering media
    fn is_live(&self) -> bool;
}

/// An acquired capture (or playback) stream.
pub trait CaptureStream: Send + Sync {
    /// Stream identifier
    fn id(&self) -> &str;

    /// All constituent tracks
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    /// Video tracks only
    fn video_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks()
            .into_iter()
            .filter(|t| t.kind() == TrackKind::Video)
            .collect()
    }

    /// Frame events produced by this stream
    fn frame_feed(&self) -> FrameFeed;
}

/// Capability: Stream Acquisition
///
/// Devices that can open a capture stream (webcams, capture cards).
///
/// # Contract
/// - Constraints are exact; unsatisfiable constraints return Err
/// - The device is exclusive; acquiring while another stream is live may
///   return Err (device busy)
/// - The caller owns the returned stream and must stop its tracks
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Acquire a stream under exact constraints
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>>;
}

// =============================================================================
// Sinks
// =============================================================================

/// Capability: Playable Sink
///
/// The element a stream is rendered into.
///
/// # Contract
/// - `attach()` replaces any previously attached stream
/// - `first_frame_rendered()` resolves once per attachment with the clock time
///   of the first frame actually rendered; later calls return the same time
/// - `playing()` resolves once playback is running
/// - `frame_callbacks()` is capability-gated: `None` when the sink cannot
///   notify per decoded/captured frame
/// - `refresh_callbacks()` fires once per display refresh; `None` only when
///   nothing is attached
#[async_trait]
pub trait MediaSink: Send {
    /// Attach a stream as the sink's source
    async fn attach(&mut self, stream: &dyn CaptureStream) -> Result<()>;

    /// Wait for the first rendered frame (clock milliseconds)
    async fn first_frame_rendered(&mut self) -> Result<f64>;

    /// Wait until the sink reports it is playing
    async fn playing(&mut self) -> Result<()> {
        self.first_frame_rendered().await.map(|_| ())
    }

    /// Device-frame callbacks with capture timestamps, when supported
    fn frame_callbacks(&self) -> Option<Box<dyn FrameSource>>;

    /// Display-refresh callbacks
    fn refresh_callbacks(&self) -> Option<Box<dyn FrameSource>>;

    /// Drop the attached stream
    fn detach(&mut self);
}

/// Request for one looping, muted playback of a pre-recorded asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackRequest {
    /// Asset path or identifier
    pub asset: String,
    /// Display width in pixels
    pub width: u32,
    /// Display height in pixels
    pub height: u32,
    /// Playback frame rate
    pub frame_rate: u32,
    /// Restart from the beginning at end of asset
    pub looped: bool,
    /// Silence audio
    pub muted: bool,
}

/// A running playback: its sink plus the stream feeding it.
pub struct Playback {
    /// Sink rendering the playback
    pub sink: Box<dyn MediaSink>,
    /// Stream backing the sink
    pub stream: Box<dyn CaptureStream>,
}

/// Capability: Pre-recorded Playback
///
/// Sources that can open a looping playback of a recorded asset.
#[async_trait]
pub trait PlaybackSource: Send + Sync {
    /// Open one playback, already attached to its sink
    async fn open(&self, request: &PlaybackRequest) -> Result<Playback>;
}
