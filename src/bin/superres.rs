//! superres - multi-frame super-resolution of a video stream
//!
//! Reads a low-resolution stream, reconstructs every frame at `--scale` times
//! the input size from its temporal neighbourhood, and writes the result.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use superres::ingest::CAMERA_INPUT;
use superres::sink::PreviewSink;
use superres::ui::{format_duration, Ui};
use superres::{
    open_output, open_source, CancelToken, ConfigOverrides, DeviceCapabilities, Driver, Frame,
    FrameSource, OutputOptions, PipelineConfig, SinkSet, SourceOptions, SuperResError,
    SuperResolution,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Super-resolution for video sequences (BTV back-projection over optical flow)"
)]
struct Args {
    /// Input video: a file, a directory of images, stub://..., or * for the camera.
    #[arg(short = 'v', long = "video", value_name = "INPUT")]
    video: Option<String>,
    /// Output video (.y4m, an image pattern with {}, a directory, or an encoded file).
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Scale factor [default: 4]
    #[arg(short, long)]
    scale: Option<usize>,
    /// Iteration count [default: 20]
    #[arg(short, long)]
    iterations: Option<usize>,
    /// Radius of the temporal search area [default: 8]
    #[arg(short, long)]
    temporal: Option<usize>,
    /// Optical flow algorithm (farneback, simple, tvl1, brox, pyrlk) [default: farneback]
    #[arg(short, long)]
    flow: Option<String>,
    /// JSON or TOML configuration file.
    #[arg(long, env = "SUPERRES_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Compute backend (auto|cpu|accelerated)
    #[arg(long, value_name = "BACKEND")]
    backend: Option<String>,
    /// Output frame rate [default: 25]
    #[arg(long)]
    fps: Option<u32>,
    /// Keep the first decoded frame instead of discarding it.
    #[arg(long)]
    keep_first_frame: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, value_name = "MODE")]
    ui: Option<String>,
}

/// Hands back a frame that was read ahead for the banner.
struct PeekedSource {
    first: Option<Frame>,
    inner: Box<dyn FrameSource>,
}

impl FrameSource for PeekedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.first.take() {
            Some(frame) => Ok(Some(frame)),
            None => self.inner.next_frame(),
        }
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }

    fn frames_read(&self) -> u64 {
        self.inner.frames_read()
    }

    fn is_camera(&self) -> bool {
        self.inner.is_camera()
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Args::parse()) {
        match err.downcast_ref::<SuperResError>() {
            Some(SuperResError::Config(_)) => eprintln!("superres: {:#}", err),
            _ => eprintln!("superres: fatal: {:#}", err),
        }
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = PipelineConfig::load(ConfigOverrides {
        config_path: args.config,
        input: args.video,
        output: args.output,
        scale: args.scale,
        iterations: args.iterations,
        temporal_radius: args.temporal,
        flow: args.flow,
        backend: args.backend,
        fps: args.fps,
        keep_first_frame: args.keep_first_frame,
        ui: args.ui,
    })?;

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::new(cfg.ui, is_tty, !stdout_is_tty);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received, stopping after the current iteration");
            cancel.cancel();
        })
        .context("error setting Ctrl-C handler")?;
    }

    let engine = {
        let _stage = ui.stage("Prepare reconstruction engine");
        SuperResolution::new(cfg.superres.clone(), &DeviceCapabilities::probe())?
    };

    let mut source = {
        let _stage = ui.stage("Open input");
        let options = SourceOptions {
            backend: cfg.superres.backend,
            ..SourceOptions::default()
        };
        let mut inner = open_source(&cfg.input, &options)?;
        let first = inner
            .next_frame()
            .with_context(|| format!("reading {}", inner.describe()))?
            .ok_or_else(|| {
                SuperResError::source_open(cfg.input.clone(), "input contains no frames")
            })?;
        PeekedSource {
            first: Some(first),
            inner,
        }
    };

    if let Some(first) = &source.first {
        println!(
            "Input           : {} [{} x {}]",
            cfg.input,
            first.width(),
            first.height()
        );
    }
    println!("Scale factor    : {}", cfg.superres.scale);
    println!("Iterations      : {}", cfg.superres.iterations);
    println!("Temporal radius : {}", cfg.superres.temporal_radius);
    println!("Optical Flow    : {}", cfg.superres.flow.as_str());
    println!("Backend         : {}", engine.backend());
    println!(
        "Camera          : {}",
        if cfg.input == CAMERA_INPUT || source.is_camera() {
            "Yes"
        } else {
            "No"
        }
    );

    let mut sinks = SinkSet::new();
    if let Some(path) = &cfg.output {
        sinks.push(open_output(path, &OutputOptions { fps: cfg.fps })?);
    }
    sinks.push(Box::new(PreviewSink::new(ui.is_pretty())));

    let mut driver =
        Driver::new(engine, cancel).with_discard_first_frame(cfg.discards_first_frame());
    let summary = driver.run(&mut source, &mut sinks)?;

    if let Some(mean) = summary.mean_latency() {
        println!(
            "Frames          : {} in, {} out, mean {} per frame",
            summary.frames_in,
            summary.frames_out,
            format_duration(mean)
        );
    }
    if !summary.warnings.is_empty() {
        println!("Warnings        : {}", summary.warnings.len());
    }
    Ok(())
}
