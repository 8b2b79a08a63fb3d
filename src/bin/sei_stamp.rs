//! sei-stamp: record H.264 with per-frame capture timestamps, or inspect a
//! stamped stream.
//!
//! Usage:
//!   sei-stamp encode [options]
//!   sei-stamp inspect <file|->
//!
//! Logs go to stderr, so `--output -` can pipe the stream.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sei_stamp::{
    FrameSource, MonotonicClock, Session, SessionConfig, TestPatternSource, TimestampSource,
    WallClock,
};

#[derive(Parser)]
#[command(name = "sei-stamp")]
#[command(about = "Embed capture timestamps in H.264 as SEI user data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture, encode and write a stamped Annex B stream
    Encode(EncodeArgs),

    /// List the access units and timestamps of a stamped stream
    Inspect {
        /// Stream to read (`-` for stdin)
        input: PathBuf,

        /// Only print the summary line
        #[arg(short, long)]
        summary: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    /// Synthetic moving gradient
    Test,
    /// V4L2 camera (needs the `camera` feature)
    Camera,
}

#[derive(Args)]
struct EncodeArgs {
    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Target bitrate in bits per second
    #[arg(long, default_value_t = 2_000_000)]
    bitrate: u32,

    /// Upper bitrate bound (defaults to the target)
    #[arg(long)]
    max_bitrate: Option<u32>,

    /// Keyframe interval in frames
    #[arg(long, default_value_t = 10)]
    gop: u32,

    /// Frames to record; 0 records until Ctrl+C
    #[arg(long, default_value_t = 91)]
    frames: u64,

    #[arg(long, value_enum, default_value_t = SourceKind::Test)]
    source: SourceKind,

    /// Capture device for `--source camera`
    #[arg(long, default_value = "/dev/video0")]
    device: String,

    /// Output file (`-` for stdout)
    #[arg(short, long, default_value = "output.h264")]
    output: PathBuf,

    /// Capture on a separate thread
    #[arg(long)]
    threaded: bool,

    /// Frames buffered between capture and encode in threaded mode
    #[arg(long, default_value_t = 4)]
    queue_depth: usize,
}

impl EncodeArgs {
    fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.width, self.height)
            .frame_rate(self.fps)
            .bitrate(self.bitrate)
            .max_bitrate(self.max_bitrate.unwrap_or(self.bitrate))
            .gop_size(self.gop)
            .frame_count((self.frames > 0).then_some(self.frames))
            .threaded(self.threaded)
            .queue_depth(self.queue_depth)
    }
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufWriter::new(io::stdout().lock())));
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}

fn open_source(args: &EncodeArgs) -> Result<Box<dyn FrameSource>> {
    match args.source {
        SourceKind::Test => Ok(Box::new(TestPatternSource::new(args.width, args.height))),
        #[cfg(feature = "camera")]
        SourceKind::Camera => Ok(Box::new(sei_stamp::CameraSource::open_path(
            &args.device,
            args.width,
            args.height,
            args.fps,
        )?)),
        #[cfg(not(feature = "camera"))]
        SourceKind::Camera => {
            anyhow::bail!("{}: built without the `camera` feature", args.device)
        }
    }
}

fn open_clock() -> Box<dyn TimestampSource> {
    match MonotonicClock::new() {
        Ok(clock) => Box::new(clock),
        Err(e) => {
            tracing::warn!("{}; falling back to the wall clock", e);
            Box::new(WallClock::new())
        }
    }
}

#[cfg(feature = "openh264")]
fn new_encoder(config: &SessionConfig) -> Result<sei_stamp::codec::OpenH264Encoder> {
    Ok(sei_stamp::codec::OpenH264Encoder::new(config.encoder_config())?)
}

#[cfg(not(feature = "openh264"))]
fn new_encoder(_config: &SessionConfig) -> Result<Box<dyn sei_stamp::codec::VideoEncoder>> {
    anyhow::bail!("built without an H.264 encoder; rebuild with `--features openh264`")
}

fn encode(args: EncodeArgs) -> Result<()> {
    let config = args.session_config();
    let encoder = new_encoder(&config)?;

    let stop = Arc::new(AtomicBool::new(false));
    if config.frame_count.is_none() {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            tracing::info!("Ctrl+C received, stopping...");
            stop.store(true, Ordering::Relaxed);
        })
        .context("installing Ctrl+C handler")?;
    }

    let source = open_source(&args)?;
    let clock = open_clock();
    let sink = open_output(&args.output)?;

    let mut session = Session::new(config, encoder, clock, sink)?;
    let stats = session.run(source, &stop)?;
    tracing::info!(
        "wrote {} access units ({} bytes) to {}",
        stats.access_units,
        stats.bytes_written,
        args.output.display()
    );
    Ok(())
}

fn inspect(input: &Path, summary: bool) -> Result<()> {
    let mut data = Vec::new();
    if input.as_os_str() == "-" {
        io::stdin().lock().read_to_end(&mut data)?;
    } else {
        File::open(input)
            .with_context(|| format!("opening {}", input.display()))?
            .read_to_end(&mut data)?;
    }

    let report = sei_stamp::inspect(&data);
    let mut out = io::stdout().lock();
    if !summary {
        let mut prev: Option<u64> = None;
        for (i, au) in report.access_units.iter().enumerate() {
            let ts = au
                .timestamp
                .map_or_else(|| "-".to_string(), |ts| ts.to_string());
            let delta = match (prev, au.timestamp) {
                (Some(p), Some(t)) => format!("{:+}", t.as_micros() as i128 - p as i128),
                _ => "-".to_string(),
            };
            writeln!(
                out,
                "{:6} offset={:<10} ts={:<18} delta_us={:<8} nals={}{}",
                i,
                au.offset,
                ts,
                delta,
                au.video_nals(),
                if au.is_keyframe() { " IDR" } else { "" }
            )?;
            if let Some(t) = au.timestamp {
                prev = Some(t.as_micros());
            }
        }
    }
    writeln!(
        out,
        "{} access units, {} NAL units, {} unstamped, monotonic: {}, terminated: {}",
        report.access_units.len(),
        report.nal_units,
        report.unstamped(),
        report.is_monotonic(),
        report.terminated
    )?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sei_stamp=info".parse()?)
                .add_directive("sei_stamp_codec=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Encode(args) => encode(args),
        Commands::Inspect { input, summary } => inspect(&input, summary),
    }
}
