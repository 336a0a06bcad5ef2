//! Guaranteed Stream Release
//!
//! A capture device is a process-wide exclusive resource, so every acquired
//! stream must be released on every exit path of a trial: success, error,
//! timeout and panic. [`StreamGuard`] owns the stream for the trial's lifetime
//! and stops each of its tracks exactly once, either through an explicit
//! [`StreamGuard::release`] or, failing that, when it is dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let guard = StreamGuard::new(device.acquire(&constraints).await?);
//! sink.attach(guard.stream()).await?;
//! // ... sampling ...
//! let stopped = guard.release();
//! ```

use std::fmt;

use tracing::{debug, warn};

use super::capabilities::CaptureStream;

/// RAII owner of one acquired stream.
pub struct StreamGuard {
    stream: Box<dyn CaptureStream>,
    released: bool,
}

impl StreamGuard {
    /// Take ownership of an acquired stream.
    pub fn new(stream: Box<dyn CaptureStream>) -> Self {
        Self {
            stream,
            released: false,
        }
    }

    /// The guarded stream.
    pub fn stream(&self) -> &dyn CaptureStream {
        self.stream.as_ref()
    }

    /// Stop every track now; returns how many tracks were stopped.
    pub fn release(mut self) -> usize {
        self.stop_tracks()
    }

    fn stop_tracks(&mut self) -> usize {
        if self.released {
            return 0;
        }
        self.released = true;

        let tracks = self.stream.tracks();
        for track in &tracks {
            track.stop();
        }
        debug!(
            stream = self.stream.id(),
            tracks = tracks.len(),
            "Released capture stream"
        );
        tracks.len()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if std::thread::panicking() {
            warn!(
                stream = self.stream.id(),
                "Releasing capture stream during panic unwind"
            );
        }
        self.stop_tracks();
    }
}

impl fmt::Debug for StreamGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamGuard")
            .field("stream", &self.stream.id())
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::{FrameFeed, MediaTrack, TrackKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTrack {
        stops: AtomicUsize,
    }

    impl MediaTrack for CountingTrack {
        fn label(&self) -> &str {
            "counting"
        }
        fn kind(&self) -> TrackKind {
            TrackKind::Video
        }
        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        fn is_live(&self) -> bool {
            self.stops.load(Ordering::SeqCst) == 0
        }
    }

    struct TwoTrackStream {
        tracks: Vec<Arc<CountingTrack>>,
    }

    impl CaptureStream for TwoTrackStream {
        fn id(&self) -> &str {
            "two-track"
        }
        fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
            self.tracks
                .iter()
                .map(|t| Arc::clone(t) as Arc<dyn MediaTrack>)
                .collect()
        }
        fn frame_feed(&self) -> FrameFeed {
            FrameFeed::new(1)
        }
    }

    fn two_tracks() -> (Vec<Arc<CountingTrack>>, Box<dyn CaptureStream>) {
        let tracks: Vec<_> = (0..2)
            .map(|_| {
                Arc::new(CountingTrack {
                    stops: AtomicUsize::new(0),
                })
            })
            .collect();
        let stream = Box::new(TwoTrackStream {
            tracks: tracks.clone(),
        });
        (tracks, stream)
    }

    #[test]
    fn test_release_stops_each_track_once() {
        let (tracks, stream) = two_tracks();
        let guard = StreamGuard::new(stream);
        assert_eq!(guard.release(), 2);
        for track in &tracks {
            assert_eq!(track.stops.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_drop_releases_unreleased_stream() {
        let (tracks, stream) = two_tracks();
        {
            let _guard = StreamGuard::new(stream);
        }
        for track in &tracks {
            assert_eq!(track.stops.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_release_during_panic() {
        let (tracks, stream) = two_tracks();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = StreamGuard::new(stream);
            panic!("sampling blew up");
        }));
        assert!(result.is_err());
        for track in &tracks {
            assert_eq!(track.stops.load(Ordering::SeqCst), 1);
        }
    }
}
