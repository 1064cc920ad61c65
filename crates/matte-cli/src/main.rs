mod demo;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use matte_core::{FrameBuffer, MatteConfig, TextureSlot};
use matte_render::{
    FrameOutcome, FrameScheduler, GpuContext, GpuDevice, LayerImage, OffscreenTarget,
    RecordingDevice, RecordingTarget, RenderContext, RenderTarget,
};
use serde::Serialize;

use crate::demo::SyntheticSource;

#[derive(Parser)]
#[command(
    name = "matte",
    version,
    about = "Matte — real-time person compositing between two image layers",
    long_about = concat!(
        "Matte composites a live camera feed with a front and a back image layer,\n",
        "placing the back layer behind or in front of the person by depth.\n\n",
        "Headless runs use a synthetic camera with a known subject."
    )
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a headless session and write the last composited frame
    Render {
        /// Path to a matte.toml configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of frames to drive through the scheduler
        #[arg(short = 'n', long, default_value_t = 30)]
        frames: u64,

        /// Normalized back-layer distance in [0, 1]
        #[arg(short, long)]
        distance: Option<f32>,

        /// Front layer image (overrides the configuration)
        #[arg(long)]
        front: Option<PathBuf>,

        /// Back layer image (overrides the configuration)
        #[arg(long)]
        back: Option<PathBuf>,

        /// Output PNG path
        #[arg(short, long, default_value = "output/matte.png")]
        output: PathBuf,

        /// Record commands on the CPU instead of rendering, and print a JSON summary
        #[arg(long)]
        dry_run: bool,
    },
    /// Show GPU adapter and pipeline information
    Info,
    /// Write a default configuration file
    InitConfig {
        /// Destination path
        #[arg(default_value = "matte.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Outcome counts for one headless session.
#[derive(Debug, Default, Serialize)]
struct SessionSummary {
    frames: u64,
    presented: u64,
    skipped: BTreeMap<String, u64>,
    completed: u64,
    elapsed_ms: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Render {
            config,
            frames,
            distance,
            front,
            back,
            output,
            dry_run,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(distance) = distance {
                config.layers.back_layer_distance = distance;
            }
            if front.is_some() {
                config.layers.front = front;
            }
            if back.is_some() {
                config.layers.back = back;
            }
            cmd_render(config, frames, &output, dry_run)
        }
        Commands::Info => cmd_info(),
        Commands::InitConfig { path, force } => cmd_init_config(&path, force),
    }
}

fn load_config(path: Option<&Path>) -> Result<MatteConfig> {
    match path {
        Some(path) => MatteConfig::load_from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None => Ok(MatteConfig::default()),
    }
}

/// Front and back layers named by `config`, or the built-in defaults: an empty
/// front layer and a striped back layer sized to the target.
fn load_layers(config: &MatteConfig) -> Result<(LayerImage, LayerImage)> {
    let front = match &config.layers.front {
        Some(path) => LayerImage::open(path)
            .with_context(|| format!("failed to load front layer: {}", path.display()))?,
        None => LayerImage::from_frame_buffer(FrameBuffer::solid(1, 1, [0, 0, 0, 0]))?,
    };
    let back = match &config.layers.back {
        Some(path) => LayerImage::open(path)
            .with_context(|| format!("failed to load back layer: {}", path.display()))?,
        None => LayerImage::from_frame_buffer(demo::border_stripes(
            config.target.width,
            config.target.height,
        ))?,
    };
    Ok((front, back))
}

/// Drive `frames` frames from the synthetic source through a fresh context
/// and wait for the GPU to retire all of them.
fn run_session<D, T>(
    device: Arc<D>,
    target: &mut T,
    config: MatteConfig,
    layers: &(LayerImage, LayerImage),
    frames: u64,
) -> Result<SessionSummary>
where
    D: GpuDevice,
    T: RenderTarget<D>,
{
    let (width, height) = (config.source.width, config.source.height);
    let mut ctx = RenderContext::new(device.clone(), target, config)
        .context("failed to create render context")?;
    let mut scheduler = FrameScheduler::for_context(&ctx)?;
    ctx.set_layers(&layers.0, &layers.1)?;

    let mut source = SyntheticSource::<D>::new(width, height);
    let mut summary = SessionSummary {
        frames,
        ..Default::default()
    };

    let start = Instant::now();
    for _ in 0..frames {
        match scheduler.draw_frame(&mut ctx, &mut source, target)? {
            FrameOutcome::Presented { .. } => summary.presented += 1,
            FrameOutcome::Skipped { reason, .. } => {
                *summary.skipped.entry(reason.to_string()).or_default() += 1;
            }
        }
    }
    scheduler.wait_idle(device.as_ref())?;
    summary.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    summary.completed = scheduler.frames_completed();

    tracing::info!(
        frames,
        presented = summary.presented,
        completed = summary.completed,
        "session finished"
    );
    Ok(summary)
}

fn cmd_render(config: MatteConfig, frames: u64, output: &Path, dry_run: bool) -> Result<()> {
    if frames == 0 {
        anyhow::bail!("--frames must be at least 1");
    }
    let layers = load_layers(&config)?;

    if dry_run {
        let device = Arc::new(RecordingDevice::new());
        let mut target = RecordingTarget::new();
        let summary = run_session(device, &mut target, config, &layers, frames)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let gpu = Arc::new(GpuContext::init().context("no usable GPU adapter")?);
    tracing::info!(adapter = %gpu.adapter_summary(), "GPU ready");
    let mut target = OffscreenTarget::new();
    let summary = run_session(gpu.clone(), &mut target, config, &layers, frames)?;

    let frame = target.read_frame(&gpu)?.into_rgba();
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.data)
        .context("read-back frame has the wrong size")?;
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
    }
    image
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "Rendered {} frames ({} presented) in {:.1} ms",
        summary.frames, summary.presented, summary.elapsed_ms
    );
    println!("   Output: {}", output.display());
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("Matte compositor");
    println!("   Version:   {}", env!("CARGO_PKG_VERSION"));
    match GpuContext::init() {
        Ok(gpu) => println!("   Adapter:   {}", gpu.adapter_summary()),
        Err(e) => println!("   Adapter:   unavailable ({})", e),
    }

    let config = MatteConfig::default();
    println!(
        "   Pipeline:  {} / {}, {} frames in flight",
        config.pipeline.vertex_entry,
        config.pipeline.fragment_entry,
        config.pipeline.max_frames_in_flight
    );
    println!();
    println!("   Texture slots:");
    for slot in TextureSlot::ALL {
        println!(
            "     [{}] {:<14} {:?}",
            slot.index(),
            slot.label(),
            slot.format()
        );
    }
    Ok(())
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("'{}' already exists (use --force to overwrite)", path.display());
    }
    MatteConfig::default()
        .save_to_file(path)
        .with_context(|| format!("failed to write config: {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
