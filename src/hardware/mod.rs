//! Capture Hardware Abstractions
//!
//! Capability traits for cameras, sinks and playback sources, the RAII guard
//! that stops acquired tracks, and a simulated device used by the CLI and
//! tests.

pub mod capabilities;
pub mod mock;
pub mod stream_guard;

pub use capabilities::{
    CaptureConstraints, CaptureDevice, CaptureStream, Frame, FrameEvent, FrameFeed,
    FrameMetadata, MediaSink, MediaTrack, Playback, PlaybackRequest, PlaybackSource, TrackKind,
};
pub use stream_guard::StreamGuard;
