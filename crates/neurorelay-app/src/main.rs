//! NeuroRelay Application
//!
//! Runs the SSVEP pipeline end to end: stream acquisition, detection,
//! selection gating and JSON-lines dispatch of committed selections.
//!
//! # Usage
//!
//! ```bash
//! # Synthetic stream, events on stdout, one minute
//! neurorelay run --duration 60
//!
//! # Live LSL stream with a configuration file, events appended to a file
//! neurorelay run --source lsl --config config/default.json --events-out logs/events.jsonl
//!
//! # Print the default configuration
//! neurorelay config
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use neurorelay_core::config::PipelineConfig;
use neurorelay_native::bridge::{
    LivePredictor, LslTransport, PipelineEvent, SourceStatus, SyntheticConfig, SyntheticTransport, Transport,
};
use neurorelay_native::dispatch::{CommandDispatcher, JsonlDispatcher};
use neurorelay_native::ssvep::SelectionMachine;

/// NeuroRelay SSVEP decoder
#[derive(Parser, Debug)]
#[command(name = "neurorelay")]
#[command(author, version, about = "SSVEP selection decoder emitting JSON-lines commands", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run live decoding
    Run {
        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Stream source: synthetic or lsl
        #[arg(short, long, default_value = "synthetic")]
        source: String,

        /// Stream type to discover
        #[arg(long)]
        stream_type: Option<String>,

        /// Preferred stream name
        #[arg(long)]
        stream_name: Option<String>,

        /// Discovery timeout (s)
        #[arg(long)]
        timeout: Option<f64>,

        /// Append events to this file instead of stdout
        #[arg(long)]
        events_out: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Seed of the synthetic stream
        #[arg(long)]
        seed: Option<u64>,

        /// Derive tile frequencies from the monitor refresh rate
        #[arg(long)]
        auto_freqs: bool,
    },

    /// Print the default configuration as JSON
    Config,
}

/// Options of the `run` subcommand
#[derive(Debug, Default)]
struct RunOptions {
    config: Option<PathBuf>,
    source: String,
    stream_type: Option<String>,
    stream_name: Option<String>,
    timeout: Option<f64>,
    events_out: Option<PathBuf>,
    duration: Option<f64>,
    seed: Option<u64>,
    auto_freqs: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr; stdout carries the event stream
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { config, source, stream_type, stream_name, timeout, events_out, duration, seed, auto_freqs } => {
            info!("NeuroRelay v{}", env!("CARGO_PKG_VERSION"));
            run(RunOptions { config, source, stream_type, stream_name, timeout, events_out, duration, seed, auto_freqs })
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
            Ok(())
        }
    }
}

/// Read a configuration file; missing keys take their defaults
fn load_config(path: &Path) -> anyhow::Result<PipelineConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Configuration file plus command-line overrides, validated
fn resolve_config(options: &RunOptions) -> anyhow::Result<PipelineConfig> {
    let mut config = match &options.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(stream_type) = &options.stream_type {
        config.stream.stream_type.clone_from(stream_type);
    }
    if options.stream_name.is_some() {
        config.stream.stream_name.clone_from(&options.stream_name);
    }
    if let Some(timeout) = options.timeout {
        config.stream.timeout_seconds = timeout;
    }
    if options.auto_freqs {
        config = config.with_auto_frequencies();
        info!("Monitor-locked frequencies at {} Hz: {:?}", config.monitor_hz, config.freqs_hz);
    }

    config.validate()?;
    Ok(config)
}

fn build_transport(options: &RunOptions, config: &PipelineConfig) -> anyhow::Result<Box<dyn Transport>> {
    match options.source.to_lowercase().as_str() {
        "synthetic" => Ok(Box::new(SyntheticTransport::new(SyntheticConfig {
            sample_rate: config.sample_rate_hz,
            frequencies: config.freqs_hz.clone(),
            seed: options.seed,
            ..Default::default()
        }))),
        "lsl" => Ok(Box::new(LslTransport::new())),
        other => anyhow::bail!("Unknown source '{}' (expected synthetic or lsl)", other),
    }
}

fn build_dispatcher(events_out: Option<&Path>) -> anyhow::Result<Box<dyn CommandDispatcher>> {
    let writer: Box<dyn Write> = match events_out {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            info!("Writing events to {}", path.display());
            Box::new(file)
        }
        None => Box::new(std::io::stdout()),
    };
    Ok(Box::new(JsonlDispatcher::new(writer)))
}

/// Run the control loop until the duration elapses or acquisition fails
fn run(options: RunOptions) -> anyhow::Result<()> {
    let config = resolve_config(&options)?;
    let transport = build_transport(&options, &config)?;
    let mut dispatcher = build_dispatcher(options.events_out.as_deref())?;

    let (mut live, mut events) = LivePredictor::new(transport, &config)?;
    let mut selection = SelectionMachine::new(config.selection_config())?;

    live.start()?;
    selection.start();

    let interval = live.prediction_interval();
    let deadline = options.duration.map(Duration::from_secs_f64);
    let clock = Instant::now();
    let mut commits = 0_u64;

    let outcome = loop {
        let tick_started = Instant::now();
        if deadline.is_some_and(|d| clock.elapsed() >= d) {
            break Ok(());
        }

        live.tick();

        let mut failure = None;
        while let Ok(event) = events.try_recv() {
            match event {
                PipelineEvent::Prediction(prediction) => {
                    let update = selection.update(&prediction, clock.elapsed().as_secs_f64());
                    if let Some(commit) = update.commit {
                        dispatcher.dispatch(&commit)?;
                        commits += 1;
                    }
                }
                PipelineEvent::StatusChanged(SourceStatus::Failed(reason)) => failure = Some(reason),
                PipelineEvent::StatusChanged(status) => info!("Stream {}", status),
                PipelineEvent::DataReceived { frames, latest_timestamp } => {
                    tracing::trace!("Window of {} frames up to t={:.3}", frames, latest_timestamp);
                }
            }
        }

        if let Some(reason) = failure {
            warn!("Acquisition failed: {}", reason);
            break Err(anyhow::anyhow!("acquisition failed: {reason}"));
        }

        std::thread::sleep(interval.saturating_sub(tick_started.elapsed()));
    };

    selection.stop();
    live.stop();
    info!(
        "Session ended after {:.1} s: {} predictions, {} commits",
        clock.elapsed().as_secs_f64(),
        live.status().predictions,
        commits
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("neurorelay-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from([
            "neurorelay",
            "--log-level",
            "debug",
            "run",
            "--source",
            "lsl",
            "--stream-name",
            "Cyton",
            "--duration",
            "5",
            "--auto-freqs",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run { source, stream_name, duration, auto_freqs, .. } => {
                assert_eq!(source, "lsl");
                assert_eq!(stream_name.as_deref(), Some("Cyton"));
                assert_eq!(duration, Some(5.0));
                assert!(auto_freqs);
            }
            Commands::Config => panic!("expected run"),
        }
    }

    #[test]
    fn test_resolve_config_overrides() {
        let path = temp_path("config.json");
        std::fs::write(&path, r#"{"tau": 0.7, "monitor_hz": 120.0, "unknown_key": 1}"#).unwrap();

        let options = RunOptions {
            config: Some(path.clone()),
            stream_type: Some("ExG".to_string()),
            timeout: Some(2.0),
            auto_freqs: true,
            ..Default::default()
        };
        let config = resolve_config(&options).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.tau, 0.7);
        assert_eq!(config.stream.stream_type, "ExG");
        assert_eq!(config.stream.timeout_seconds, 2.0);
        assert_eq!(config.freqs_hz, PipelineConfig::auto_frequencies(120.0));
        assert_eq!(config.dwell_sec, PipelineConfig::default().dwell_sec);
    }

    #[test]
    fn test_resolve_config_rejects_invalid() {
        let path = temp_path("bad.json");
        std::fs::write(&path, r#"{"bandpass_hz": [5.0, 200.0]}"#).unwrap();
        let options = RunOptions { config: Some(path.clone()), ..Default::default() };
        let result = resolve_config(&options);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_source() {
        let options = RunOptions { source: "edf".to_string(), ..Default::default() };
        assert!(build_transport(&options, &PipelineConfig::default()).is_err());
    }
}
