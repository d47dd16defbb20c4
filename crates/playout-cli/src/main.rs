mod pattern;
mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam::channel::unbounded;
use playout_control::{ChannelCommand, CommandQueue, QueueRegistry, ReplySink};
use playout_core::{PlayoutConfig, VideoFormat};
use playout_render::{Channel, ChannelOptions, CpuCompositor, FrameConsumer};
use playout_screen::{HeadlessMonitor, ScreenConsumerProxy};

use crate::pattern::TestPattern;
use crate::snapshot::SnapshotConsumer;

#[derive(Parser)]
#[command(
    name = "playout",
    version,
    about = "Playout: real-time frame pipeline for broadcast output"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a channel against a headless screen and print its diagnostics as JSON
    Run {
        /// Path to a playout TOML config (defaults are used if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of channel ticks to run
        #[arg(short, long, default_value_t = 250)]
        frames: u64,

        /// Override the channel's video format preset
        #[arg(long)]
        format: Option<String>,

        /// Switch to this preset once the channel is running
        #[arg(long)]
        switch: Option<String>,

        /// Tick as fast as possible instead of at the format's frame rate
        #[arg(long)]
        unpaced: bool,

        /// Write the last output frame to this PNG file
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// List the video format presets
    Formats,

    /// Write a default config file
    Init {
        /// Where to write the config
        #[arg(default_value = "playout.toml")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so the JSON report on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            config,
            frames,
            format,
            switch,
            unpaced,
            snapshot,
        } => cmd_run(RunArgs {
            config,
            frames,
            format,
            switch,
            paced: !unpaced,
            snapshot,
        }),
        Commands::Formats => cmd_formats(),
        Commands::Init { path } => cmd_init(&path),
    }
}

struct RunArgs {
    config: Option<PathBuf>,
    frames: u64,
    format: Option<String>,
    switch: Option<String>,
    paced: bool,
    snapshot: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<PlayoutConfig> {
    match path {
        Some(path) => PlayoutConfig::load_from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None => Ok(PlayoutConfig::default()),
    }
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(format) = args.format {
        config.channel.format = format;
    }
    let format = config.channel.video_format()?;

    let monitor = HeadlessMonitor::new();
    let screen = ScreenConsumerProxy::new(
        config.screen.clone(),
        config.channel.queue_capacity,
        monitor.factory(),
    );
    let snapshot = SnapshotConsumer::new();
    let consumers: Vec<Box<dyn FrameConsumer>> = vec![Box::new(screen), Box::new(snapshot.clone())];

    tracing::info!(
        channel = %config.channel.name,
        format = %format,
        frames = args.frames,
        paced = args.paced,
        "starting channel"
    );
    let started = Instant::now();
    let channel = Channel::spawn(
        format,
        CpuCompositor::new(),
        TestPattern::new(),
        consumers,
        ChannelOptions {
            index: 1,
            max_ticks: Some(args.frames),
            paced: args.paced,
            ..ChannelOptions::default()
        },
    )
    .context("failed to start channel")?;
    let graph = channel.graph().clone();

    if let Some(preset) = args.switch.as_deref() {
        switch_format(&channel, preset)?;
    }

    let report = channel.join().context("channel stopped with an error")?;
    let elapsed = started.elapsed();

    if let Some(path) = &args.snapshot {
        if snapshot.save_png(path)? {
            tracing::info!(path = %path.display(), "snapshot written");
        } else {
            tracing::warn!("no frame reached the snapshot consumer");
        }
    }

    let stats = monitor.stats();
    let output = serde_json::json!({
        "channel": {
            "name": config.channel.name,
            "format": report.final_format,
            "ticks": report.ticks,
            "frames_out": report.frames_out,
            "empty_ticks": report.empty_ticks,
            "reconfigurations": report.reconfigurations,
            "consumers_removed": report.consumers_removed,
        },
        "diagnostics": graph.snapshot(),
        "screen": {
            "uploads": stats.uploads,
            "displays": stats.displays,
            "presents": stats.presents,
            "slots_created": stats.slots_created,
            "slots_destroyed": stats.slots_destroyed,
            "last_displayed": stats.last_displayed.map(|hash| hash.to_hex()),
        },
        "elapsed_ms": elapsed.as_millis() as u64,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Route a format change through a command queue, the way an operator
/// connection would.
fn switch_format(channel: &Channel, preset: &str) -> Result<()> {
    let registry = QueueRegistry::new();
    let queue = CommandQueue::new("cli", &registry)?;
    let (tx, rx) = unbounded::<String>();
    let reply: Arc<dyn ReplySink> = Arc::new(tx);

    queue.add_command(Box::new(ChannelCommand::set_format(
        Some(channel.control_sender()),
        Some(preset),
        reply,
    )));
    let line = rx
        .recv_timeout(Duration::from_secs(5))
        .context("no reply to format switch")?;
    let line = line.trim_end();
    if !line.ends_with("OK") {
        anyhow::bail!("format switch refused: {line}");
    }
    tracing::info!(reply = line, "format switch queued");
    Ok(())
}

fn cmd_formats() -> Result<()> {
    println!("Video formats:");
    for name in VideoFormat::preset_names() {
        let format = VideoFormat::preset(name)?;
        println!(
            "   {:<12} {:>4}x{:<4} {:>7.3} fps",
            format.name,
            format.width,
            format.height,
            format.fps()
        );
    }
    Ok(())
}

fn cmd_init(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("'{}' already exists", path.display());
    }
    PlayoutConfig::default()
        .save_to_file(path)
        .with_context(|| format!("failed to write config: {}", path.display()))?;
    println!("✓ Wrote {}", path.display());
    Ok(())
}
