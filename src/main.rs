//! CLI Entry Point for capture-bench
//!
//! Runs the benchmark against the simulated capture device described by the
//! `[device]` configuration section:
//! - `sweep`: every resolution and frame rate of the configured matrix
//! - `multi-stream`: pooled cadence over concurrent looping playbacks
//! - `config`: print the effective configuration
//!
//! # Usage
//!
//! ```bash
//! capture-bench sweep --json
//! capture-bench multi-stream --width 640 --height 360 --fps 30 --streams 5
//! CAPTURE_BENCH_SAMPLING__WINDOW_MS=1000 capture-bench --config bench.toml sweep
//! ```

use anyhow::{Context, Result};
use capture_bench::config::BenchConfig;
use capture_bench::hardware::mock::{MockCaptureDevice, MockPlaybackSource, MockSink};
use capture_bench::logging::{self, OutputFormat, TracingConfig};
use capture_bench::multi_stream::MultiStreamAggregator;
use capture_bench::report::{self, CsvReport, ReportFanout, TableReport};
use capture_bench::{CaptureSession, Clock, MonotonicClock, Resolution, TrialOrchestrator};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "capture-bench")]
#[command(about = "Capture-device latency and throughput benchmark", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/capture_bench.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep the configured resolution and frame-rate matrix
    Sweep {
        /// Also print the rows as JSON
        #[arg(long)]
        json: bool,

        /// Skip the CSV export
        #[arg(long)]
        no_csv: bool,
    },

    /// Measure pooled cadence over concurrent looping playbacks
    MultiStream {
        /// Playback width
        #[arg(long)]
        width: u32,

        /// Playback height
        #[arg(long)]
        height: u32,

        /// Playback frame rate
        #[arg(long)]
        fps: u32,

        /// Sampling duration (defaults to multi_stream.duration_ms)
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Playbacks to open (defaults to multi_stream.streams)
        #[arg(long)]
        streams: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BenchConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BenchConfig::load()?,
    };
    config.validate()?;

    logging::init(TracingConfig::from_bench_config(&config)?.with_format(cli.log_format))?;

    match cli.command {
        Commands::Sweep { json, no_csv } => run_sweep(&config, json, !no_csv).await,
        Commands::MultiStream {
            width,
            height,
            fps,
            duration_ms,
            streams,
        } => {
            let duration = Duration::from_millis(duration_ms.unwrap_or(config.multi_stream.duration_ms));
            run_multi_stream(&config, Resolution::new(width, height), fps, duration, streams).await
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_sweep(config: &BenchConfig, json: bool, csv: bool) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let device = Arc::new(MockCaptureDevice::new(
        config.device.camera.clone(),
        Arc::clone(&clock),
    ));
    let sink = Box::new(MockSink::new(config.device.sink.clone(), Arc::clone(&clock)));
    let session = CaptureSession::new(device, sink, clock, config.session_config());
    let mut orchestrator = TrialOrchestrator::new(session, config.sweep_config());

    info!(
        trials = config.sweep.trial_count(),
        warmup = config.sweep.warmup,
        "Starting capture sweep"
    );

    let mut table = TableReport::new();
    let mut csv_report = if csv && config.report.write_csv {
        Some(CsvReport::new(config.report.csv_path())?)
    } else {
        None
    };

    let outcome = {
        let mut fanout = ReportFanout::new();
        fanout.push(&mut table);
        if let Some(report) = csv_report.as_mut() {
            fanout.push(report);
        }
        orchestrator
            .sweep_into(&config.sweep.resolutions, &config.sweep.frame_rates, &mut fanout)
            .await
    };
    let rows = outcome.rows;

    println!("{}", table.render());
    let status = orchestrator.status();
    println!(
        "{} of {} trials completed ({} panicked)",
        status.completed, status.total, status.substituted
    );
    if let Some(report) = csv_report.as_ref().filter(|_| !rows.is_empty()) {
        if outcome.report_error.is_none() {
            println!("CSV written to {}", report.path().display());
        }
    }
    if json {
        println!("{}", report::to_json(&rows)?);
    }
    match outcome.report_error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

async fn run_multi_stream(
    config: &BenchConfig,
    resolution: Resolution,
    frame_rate: u32,
    duration: Duration,
    streams: Option<usize>,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let source = Arc::new(MockPlaybackSource::new(
        config.device.playback.clone(),
        config.device.sink.clone(),
        Arc::clone(&clock),
    ));

    let mut ms_config = config.multi_stream_config();
    if let Some(count) = streams {
        anyhow::ensure!(count > 0, "--streams must be at least 1");
        ms_config.streams = count;
    }

    let mut aggregator = MultiStreamAggregator::new(source, clock, ms_config);
    aggregator.setup(resolution, frame_rate).await?;
    let outcome = aggregator.measure(duration).await;
    aggregator.teardown();

    let aggregate = outcome?;
    println!("{resolution}@{frame_rate}: {aggregate}");
    Ok(())
}
