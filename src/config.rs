//! Configuration System using Figment
//!
//! Strongly-typed configuration for sweeps, sampling, optional metrics, the
//! multi-stream entry point, report export and the simulated device.
//! Configuration is layered:
//! 1. Built-in defaults
//! 2. `config/capture_bench.toml` (or the file given with `--config`)
//! 3. Environment variables prefixed with `CAPTURE_BENCH_`, nested keys
//!    separated by `__`
//!
//! # Example
//! ```no_run
//! use capture_bench::config::BenchConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // CAPTURE_BENCH_SAMPLING__WINDOW_MS=1500 overrides the sampling window
//! let config = BenchConfig::load()?;
//! config.validate()?;
//! println!("Sweeping {} configurations", config.sweep.trial_count());
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BenchError, BenchResult};
use crate::hardware::mock::DeviceProfile;
use crate::multi_stream::{MultiStreamConfig, DEFAULT_STREAM_COUNT};
use crate::orchestrator::SweepConfig;
use crate::result::{MetricSet, Resolution};
use crate::sampler::SamplerConfig;
use crate::session::{OnsetReference, SessionConfig, DEFAULT_DROP_THRESHOLD};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/capture_bench.toml";

/// Prefix of overriding environment variables.
pub const ENV_PREFIX: &str = "CAPTURE_BENCH_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Configuration matrix and pacing
    pub sweep: SweepSettings,
    /// Sampling window and onset handling
    pub sampling: SamplingSettings,
    /// Optional metrics
    pub metrics: MetricSet,
    /// Multi-stream entry point
    pub multi_stream: MultiStreamSettings,
    /// Report export
    pub report: ReportSettings,
    /// Simulated device behaviour
    pub device: DeviceProfile,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Capture Bench".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Configuration matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    /// Resolutions as `[width, height]` pairs, swept in order
    pub resolutions: Vec<Resolution>,
    /// Frame rates, swept in order for each resolution
    pub frame_rates: Vec<u32>,
    /// Run a discarded warm-up trial first
    pub warmup: bool,
    /// Pause between trials in milliseconds
    pub inter_trial_pause_ms: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            resolutions: default_resolutions(),
            frame_rates: vec![15, 20, 30],
            warmup: true,
            inter_trial_pause_ms: 0,
        }
    }
}

impl SweepSettings {
    /// Number of recorded trials.
    pub fn trial_count(&self) -> usize {
        self.resolutions.len() * self.frame_rates.len()
    }
}

/// The eight 16:9 sizes from 192x108 to 1920x1080.
pub fn default_resolutions() -> Vec<Resolution> {
    [
        (192, 108),
        (320, 180),
        (384, 216),
        (512, 288),
        (640, 360),
        (1024, 576),
        (1280, 720),
        (1920, 1080),
    ]
    .into_iter()
    .map(Resolution::from)
    .collect()
}

/// Sampling window and onset handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    /// Sampling window in milliseconds
    pub window_ms: u64,
    /// Wait after the window before reading counts, in milliseconds
    pub margin_ms: u64,
    /// Dropped-frame threshold as a multiple of the nominal interval
    pub drop_threshold: f64,
    /// Bound on the first-frame wait; absent waits indefinitely
    pub onset_timeout_ms: Option<u64>,
    /// Start point of onset latency
    pub onset_reference: OnsetReference,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            window_ms: 2000,
            margin_ms: 100,
            drop_threshold: DEFAULT_DROP_THRESHOLD,
            onset_timeout_ms: None,
            onset_reference: OnsetReference::AcquisitionStart,
        }
    }
}

/// Multi-stream entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiStreamSettings {
    /// Playbacks to open
    pub streams: usize,
    /// Pre-recorded asset
    pub asset: String,
    /// Sampling duration in milliseconds
    pub duration_ms: u64,
    /// Bound on the wait for every playback to start
    pub ready_timeout_ms: Option<u64>,
}

impl Default for MultiStreamSettings {
    fn default() -> Self {
        Self {
            streams: DEFAULT_STREAM_COUNT,
            asset: "participant.webm".to_string(),
            duration_ms: 5000,
            ready_timeout_ms: None,
        }
    }
}

/// Report export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Directory receiving exported files
    pub output_dir: PathBuf,
    /// CSV file name
    pub file_name: String,
    /// Export CSV after a sweep
    pub write_csv: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_name: "camera_test_results.csv".to_string(),
            write_csv: true,
        }
    }
}

impl ReportSettings {
    /// Full CSV destination.
    pub fn csv_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }
}

impl BenchConfig {
    /// Load from the default file and environment.
    pub fn load() -> BenchResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        Self::figment(path.as_ref(), ENV_PREFIX)
            .extract()
            .map_err(BenchError::from)
    }

    fn figment(path: &Path, env_prefix: &str) -> Figment {
        Figment::from(Serialized::defaults(BenchConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"))
    }

    /// Reject values that parse but cannot drive a run.
    pub fn validate(&self) -> BenchResult<()> {
        let invalid = |msg: String| Err(BenchError::Configuration(msg));

        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if self.sweep.resolutions.is_empty() || self.sweep.frame_rates.is_empty() {
            return invalid("sweep needs at least one resolution and one frame rate".into());
        }
        if let Some(r) = self.sweep.resolutions.iter().find(|r| r.width == 0 || r.height == 0) {
            return invalid(format!("Invalid resolution {r}: dimensions must be positive"));
        }
        if self.sweep.frame_rates.contains(&0) {
            return invalid("frame rates must be positive".into());
        }

        if self.sampling.window_ms == 0 {
            return invalid("sampling.window_ms must be positive".into());
        }
        let threshold = self.sampling.drop_threshold;
        if !threshold.is_finite() || threshold <= 1.0 {
            return invalid(format!(
                "sampling.drop_threshold {threshold} must be greater than 1"
            ));
        }
        if self.sampling.onset_timeout_ms == Some(0) {
            return invalid("sampling.onset_timeout_ms must be positive when set".into());
        }

        if self.metrics.acquisition_repeats == 0 {
            return invalid("metrics.acquisition_repeats must be at least 1".into());
        }

        if self.multi_stream.streams == 0 {
            return invalid("multi_stream.streams must be at least 1".into());
        }
        if self.multi_stream.duration_ms == 0 {
            return invalid("multi_stream.duration_ms must be positive".into());
        }
        if self.multi_stream.asset.trim().is_empty() {
            return invalid("multi_stream.asset must not be empty".into());
        }

        if self.report.write_csv && self.report.file_name.trim().is_empty() {
            return invalid("report.file_name must not be empty".into());
        }
        Ok(())
    }

    /// Settings for each capture session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            metrics: self.metrics,
            sampling: SamplerConfig {
                window: Duration::from_millis(self.sampling.window_ms),
                margin: Duration::from_millis(self.sampling.margin_ms),
            },
            onset_timeout: self.sampling.onset_timeout_ms.map(Duration::from_millis),
            onset_reference: self.sampling.onset_reference,
            drop_threshold: self.sampling.drop_threshold,
        }
    }

    /// Settings for the orchestrator.
    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            warmup: self.sweep.warmup,
            inter_trial_pause: Duration::from_millis(self.sweep.inter_trial_pause_ms),
        }
    }

    /// Settings for the multi-stream aggregator.
    pub fn multi_stream_config(&self) -> MultiStreamConfig {
        MultiStreamConfig {
            streams: self.multi_stream.streams,
            asset: self.multi_stream.asset.clone(),
            ready_timeout: self.multi_stream.ready_timeout_ms.map(Duration::from_millis),
            margin: Duration::from_millis(self.sampling.margin_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BenchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sweep.trial_count(), 24);
        let labels: Vec<String> = config.sweep.resolutions.iter().map(ToString::to_string).collect();
        assert_eq!(
            labels,
            ["192x108", "320x180", "384x216", "512x288", "640x360", "1024x576", "1280x720", "1920x1080"]
        );
        assert_eq!(config.report.csv_path(), PathBuf::from("./camera_test_results.csv"));
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = BenchConfig::load_from(path).unwrap();
        assert_eq!(config.sweep.resolutions, default_resolutions());
        assert_eq!(config.sweep.frame_rates, BenchConfig::default().sweep.frame_rates);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[sweep]
resolutions = [[640, 360], [1280, 720]]
frame_rates = [15, 30]
warmup = false

[sampling]
window_ms = 1500
onset_timeout_ms = 3000
onset_reference = "attach"

[metrics]
dropped_frames = true

[device.camera]
jitter_ms = 0.0
"#
        )
        .unwrap();

        let config = BenchConfig::load_from(file.path()).unwrap();
        assert_eq!(
            config.sweep.resolutions,
            vec![Resolution::new(640, 360), Resolution::new(1280, 720)]
        );
        assert!(!config.sweep.warmup);
        assert_eq!(config.sampling.onset_reference, OnsetReference::Attach);
        assert!(config.metrics.dropped_frames);
        // Unset keys keep their defaults
        assert!(config.metrics.draw_time);
        assert_eq!(config.sampling.margin_ms, 100);
        assert_eq!(config.device.camera.jitter_ms, 0.0);
        assert_eq!(config.device.camera.acquisition_delay_ms, 40);

        let session = config.session_config();
        assert_eq!(session.sampling.window, Duration::from_millis(1500));
        assert_eq!(session.onset_timeout, Some(Duration::from_millis(3000)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, BenchConfig::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sampling]\nwindow_ms = 1500").unwrap();

        // Prefix unique to this test so parallel tests never see it
        std::env::set_var("CAPTURE_BENCH_ENVTEST_SAMPLING__WINDOW_MS", "900");
        std::env::set_var("CAPTURE_BENCH_ENVTEST_MULTI_STREAM__STREAMS", "3");
        let config: BenchConfig = BenchConfig::figment(file.path(), "CAPTURE_BENCH_ENVTEST_")
            .extract()
            .unwrap();
        std::env::remove_var("CAPTURE_BENCH_ENVTEST_SAMPLING__WINDOW_MS");
        std::env::remove_var("CAPTURE_BENCH_ENVTEST_MULTI_STREAM__STREAMS");

        assert_eq!(config.sampling.window_ms, 900);
        assert_eq!(config.multi_stream.streams, 3);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sampling]\nwindow_ms = \"soon\"").unwrap();
        assert!(matches!(
            BenchConfig::load_from(file.path()),
            Err(BenchError::Config(_))
        ));
    }

    #[test]
    fn test_validation_rejections() {
        let cases: Vec<(&str, Box<dyn Fn(&mut BenchConfig)>)> = vec![
            ("log level", Box::new(|c| c.application.log_level = "loud".into())),
            ("empty matrix", Box::new(|c| c.sweep.frame_rates.clear())),
            ("zero fps", Box::new(|c| c.sweep.frame_rates.push(0))),
            ("zero width", Box::new(|c| c.sweep.resolutions.push(Resolution::new(0, 10)))),
            ("zero window", Box::new(|c| c.sampling.window_ms = 0)),
            ("threshold", Box::new(|c| c.sampling.drop_threshold = 1.0)),
            ("streams", Box::new(|c| c.multi_stream.streams = 0)),
            ("repeats", Box::new(|c| c.metrics.acquisition_repeats = 0)),
        ];
        for (name, mutate) in cases {
            let mut config = BenchConfig::default();
            mutate(&mut config);
            assert!(
                matches!(config.validate(), Err(BenchError::Configuration(_))),
                "{name} should be rejected"
            );
        }
    }
}
