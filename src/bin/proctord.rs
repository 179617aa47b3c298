//! proctord - exam proctoring signal fusion daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by PROCTOR_CONFIG, env overrides, CLI flags)
//! 2. Initializes the detector providers once, failing fast if any is unavailable
//! 3. Streams frames from the configured source through the fusion session
//! 4. Writes one JSON record per analyzed frame to stdout
//! 5. Logs a session summary on exit (source exhausted, Ctrl-C, or stdout closed)

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use proctor_fusion::{
    ingest, JsonLinesSink, OutputVariant, PoseMethod, ProctorConfig, ProviderRegistry,
    SessionPhase, StopSignal, StreamingSession, Termination,
};

#[derive(Parser, Debug)]
#[command(
    name = "proctord",
    version,
    about = "Fuse face landmarks and object detections into exam violation flags"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension). Overrides PROCTOR_CONFIG.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Frame source: stub://<name> or a local raw frame file
    #[arg(long, value_name = "URL")]
    source: Option<String>,

    /// Frame width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Frame height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Output record shape (flags|stream|detailed)
    #[arg(long, value_name = "VARIANT")]
    output: Option<String>,

    /// Head pose method (pnp|ratio)
    #[arg(long, value_name = "METHOD")]
    pose_method: Option<String>,

    /// Analyze one frame out of every N
    #[arg(long, value_name = "N")]
    process_every: Option<u32>,

    /// Replay recorded detector output instead of the scripted scene
    #[arg(long, value_name = "PATH")]
    replay: Option<PathBuf>,

    /// Run the two detectors in parallel for each frame
    #[arg(long)]
    parallel: bool,

    /// Session identifier used in logs
    #[arg(long, default_value = "session-0")]
    session_id: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ProctorConfig::load_from(path)?,
        None => ProctorConfig::load()?,
    };
    apply_args(&mut config, &args)?;
    config.validate()?;

    log::info!(
        "proctord {} starting: source={} output={:?} pose={:?} process_every={}",
        env!("CARGO_PKG_VERSION"),
        config.source.url,
        config.output,
        config.pose.method,
        config.sampling.process_every
    );

    let mut registry = ProviderRegistry::from_settings(&config.providers)?;
    let (landmarks, objects) = registry.list();
    log::info!("providers ready: landmarks={:?} objects={:?}", landmarks, objects);

    let mut source = ingest::open_source(&config.source)?;
    let session = StreamingSession::new(&args.session_id, config.session_config(), &registry)?;

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.stop();
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let stdout = std::io::stdout();
    let mut sink = JsonLinesSink::new(stdout.lock(), config.output);
    let report = session.run(source.as_mut(), &mut sink, &stop);
    if let Err(err) = sink.finish() {
        log::warn!("stdout flush failed: {}", err);
    }
    registry.shutdown();

    log::info!(
        "session {} finished: phases={:?} frames={} processed={} alert_rate={:.3}",
        report.session_id,
        report.phases,
        report.stats.frames_read,
        report.stats.frames_processed,
        report.alert_rate
    );
    match serde_json::to_string(&report) {
        Ok(summary) => log::info!("session report: {}", summary),
        Err(e) => log::warn!("session report could not be serialized: {}", e),
    }

    debug_assert_eq!(report.final_phase(), Some(SessionPhase::Closed));
    match report.termination {
        Termination::SourceFailed(reason) => Err(anyhow!("frame source failed: {}", reason)),
        _ => Ok(()),
    }
}

fn apply_args(config: &mut ProctorConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        config.source.url = source.clone();
    }
    if let Some(width) = args.width {
        config.source.width = width;
    }
    if let Some(height) = args.height {
        config.source.height = height;
    }
    if args.frames.is_some() {
        config.source.frame_limit = args.frames;
    }
    if let Some(output) = &args.output {
        config.output = OutputVariant::parse(output)
            .ok_or_else(|| anyhow!("unknown output variant '{}' (flags|stream|detailed)", output))?;
    }
    if let Some(method) = &args.pose_method {
        config.pose.method = PoseMethod::parse(method)
            .ok_or_else(|| anyhow!("unknown pose method '{}' (pnp|ratio)", method))?;
    }
    if let Some(n) = args.process_every {
        config.sampling.process_every = n;
    }
    if let Some(path) = &args.replay {
        config.providers.kind = proctor_fusion::config::ProviderKind::Replay { path: path.clone() };
    }
    if args.parallel {
        config.sampling.parallel_inference = true;
    }
    Ok(())
}
