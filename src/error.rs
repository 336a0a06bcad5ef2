//! Error types for the benchmarking harness.
//!
//! `BenchError` is the single error type surfaced by the harness. Collaborator
//! traits (devices, sinks, playback sources) report failures as
//! `anyhow::Error`; the capture session classifies those into the variants
//! below at its boundary.
//!
//! ## Trial-level errors
//!
//! - **`Acquisition`**: the device could not satisfy the exact constraints or
//!   is busy.
//! - **`Attach`**: the acquired stream could not be attached to the sink, or
//!   the sink failed while waiting for its first frame.
//! - **`OnsetTimeout`**: the first rendered frame did not arrive within the
//!   configured bound.
//! - **`SamplingUnsupported`**: the sink offers neither frame-arrival callback.
//!
//! None of these escape a trial. They are logged and turned into sentinel
//! values in the trial's result row.
//!
//! ## Harness errors
//!
//! `Config`/`Configuration` cover loading and semantic validation, `Io`/`Csv`/`Json`
//! cover report export, `Playback`/`NotReady` cover the multi-stream entry
//! point, and `FeatureNotEnabled` is returned when an export format was
//! compiled out.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the harness error type.
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Every failure the harness can report.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Device rejected the exact constraints or is busy
    #[error("Acquisition failed: {0}")]
    Acquisition(String),

    /// Sink could not attach the stream or render its first frame
    #[error("Attaching stream to sink failed: {0}")]
    Attach(String),

    /// First rendered frame missed the onset bound
    #[error("First frame not rendered within {0:?}")]
    OnsetTimeout(Duration),

    /// Sink offers no frame-arrival callback
    #[error("Sink supports neither device-frame nor display-refresh callbacks")]
    SamplingUnsupported,

    /// A multi-stream playback failed to open or start
    #[error("Playback error: {0}")]
    Playback(String),

    /// Multi-stream measurement requested before setup
    #[error("Playback streams have not been set up")]
    NotReady,

    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds unusable values
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File system failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON export failure
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export failure
    #[cfg(feature = "storage_csv")]
    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    /// Requested export format was compiled out
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for BenchError {
    fn from(err: figment::Error) -> Self {
        BenchError::Config(Box::new(err))
    }
}

impl BenchError {
    /// True for errors that only affect the trial that raised them.
    pub fn is_trial_local(&self) -> bool {
        matches!(
            self,
            BenchError::Acquisition(_)
                | BenchError::Attach(_)
                | BenchError::OnsetTimeout(_)
                | BenchError::SamplingUnsupported
        )
    }
}
