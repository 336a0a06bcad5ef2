//! # Capture Bench Core Library
//!
//! Benchmarks a capture device across a matrix of resolutions and frame
//! rates. For every configuration the harness acquires a stream under exact
//! constraints, attaches it to a sink, waits for the first rendered frame and
//! samples frame arrivals for a fixed window, producing one result row.
//!
//! ## Crate Structure
//!
//! - **`stats`**: mean, population standard deviation, threshold counts and
//!   the [`stats::Metric`] cell type with its `Error` / `N/A` sentinels.
//! - **`clock`**: the monotonic millisecond clock every timestamp comes from.
//! - **`hardware`**: capability traits for devices, streams, sinks and
//!   playback sources, the [`hardware::StreamGuard`] release guard, and a
//!   simulated device.
//! - **`sampler`**: the window-bounded frame sampling loop and its two frame
//!   sources (per-frame callbacks and display-refresh fallback).
//! - **`surface`**: the off-screen surface that draw time is measured against.
//! - **`session`**: one trial from acquisition to teardown.
//! - **`orchestrator`**: warm-up, ordered sweep and per-trial panic isolation.
//! - **`multi_stream`**: pooled cadence over concurrent pre-recorded streams.
//! - **`report`**: table, CSV and JSON sinks for the row sequence.
//! - **`config`** / **`logging`**: figment-layered configuration and tracing
//!   initialization.
//! - **`error`**: the crate-wide [`error::BenchError`].

pub mod clock;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod multi_stream;
pub mod orchestrator;
pub mod report;
pub mod result;
pub mod sampler;
pub mod session;
pub mod stats;
pub mod surface;

pub use clock::{Clock, MonotonicClock};
pub use config::BenchConfig;
pub use error::{BenchError, BenchResult};
pub use multi_stream::{AggregateStats, MultiStreamAggregator};
pub use orchestrator::{TrialOrchestrator, TrialRunner};
pub use report::{ReportSink, TableReport};
pub use result::{MetricSet, Resolution, TrialResult, TrialSpec};
pub use session::CaptureSession;
pub use stats::Metric;
