use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

use posture_sentinel::engine::FrameOutcome;
use posture_sentinel::events::{EventSink, JsonLinesSink};
use posture_sentinel::service::{ServiceRequest, ServiceResponse};
use posture_sentinel::{
    Config, FrameValidator, PoseFrame, PredictionService, RuleClassifier, StreamingEngine,
};

#[derive(Parser, Debug)]
#[command(
    name = "posture-sentinel",
    version,
    about = "Classifies sitting posture from pose keypoints against a personal baseline"
)]
struct Cli {
    /// TOML config file; built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed JSON-lines pose frames through the engine, print events as JSON lines.
    Replay {
        /// Baseline frame (JSON). Without it the engine auto-calibrates.
        #[arg(long)]
        baseline: Option<PathBuf>,
        /// Frames file; stdin when omitted.
        frames: Option<PathBuf>,
    },
    /// Answer set_initial / predict requests, one JSON object per line on stdio.
    Serve,
    /// Write the default config to PATH.
    InitConfig { path: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if let Command::InitConfig { path } = &cli.command {
        Config::default()
            .save(path)
            .with_context(|| format!("writing default config to {}", path.display()))?;
        info!(path = %path.display(), "default config written");
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Command::Replay { baseline, frames } => {
            replay(&config, baseline.as_deref(), frames.as_deref())
        }
        Command::Serve => serve(&config),
        Command::InitConfig { .. } => Ok(()),
    }
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    Ok(match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    })
}

fn replay(config: &Config, baseline: Option<&Path>, frames: Option<&Path>) -> Result<()> {
    let mut engine = StreamingEngine::new(config);
    if let Some(path) = baseline {
        let frame = PoseFrame::load(path)
            .with_context(|| format!("loading baseline {}", path.display()))?;
        engine.set_baseline(frame).context("baseline frame rejected")?;
    }

    let mut sink = JsonLinesSink::new(io::stdout().lock());
    let (mut processed, mut rejected) = (0u64, 0u64);

    for (idx, line) in open_input(frames)?.lines().enumerate() {
        let line = line.context("reading frames")?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: PoseFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(line = idx + 1, %err, "skipping unparsable frame");
                rejected += 1;
                continue;
            }
        };

        processed += 1;
        match engine.push_frame(&frame) {
            FrameOutcome::Classified { event, .. } => sink.record(&event)?,
            FrameOutcome::Rejected(_) => rejected += 1,
            FrameOutcome::Calibrated => info!(ts = frame.ts(), "baseline established"),
            _ => {}
        }
    }
    sink.flush()?;

    let state = engine.state();
    info!(
        processed,
        rejected,
        calibrated = engine.is_calibrated(),
        counts = %serde_json::to_string(&state.counts)?,
        "replay finished"
    );
    Ok(())
}

fn serve(config: &Config) -> Result<()> {
    let mut service = PredictionService::new(
        RuleClassifier::new(config.classifier),
        FrameValidator::new(config.validator),
    );
    let mut out = io::stdout().lock();
    info!("serving on stdio");

    for line in io::stdin().lock().lines() {
        let line = line.context("reading request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ServiceRequest>(&line) {
            Ok(req) => service.handle(req),
            Err(err) => {
                warn!(%err, "malformed request");
                ServiceResponse::Error {
                    error: format!("malformed request: {err}"),
                }
            }
        };
        serde_json::to_writer(&mut out, &response)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }
    Ok(())
}
