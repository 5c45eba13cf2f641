use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use rtsp_reader::probe::{self, CapabilityReport};
use rtsp_reader::{
    BgrFrame, CameraMonitor, FfmpegBackend, MonitorConfig, SessionConfig, compose_grid,
    connect_with,
};

/// Read decoded frames from RTSP cameras with hardware decode fallback
#[derive(Parser, Debug)]
#[command(name = "rtsp-reader")]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read frames from one stream and save the last one
    Grab {
        url: String,

        /// Frames to read
        #[arg(short = 'n', long, default_value_t = 30)]
        frames: u32,

        /// Image file for the last frame (format from extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Session config as JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Disable hardware decode and hardware conversion
        #[arg(long)]
        software: bool,
    },

    /// Report hardware decode and conversion capabilities
    Probe {
        /// Also open this stream and decode one frame
        #[arg(long)]
        url: Option<String>,

        /// Session config as JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Watch several streams and save a grid of their latest frames
    View {
        #[arg(required = true)]
        urls: Vec<String>,

        /// How long to watch
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,

        /// Cell size as WIDTHxHEIGHT
        #[arg(long, default_value = "640x360")]
        cell: String,

        /// Grid columns (default: square-ish)
        #[arg(long)]
        columns: Option<usize>,

        /// Image file for the grid
        #[arg(short, long, default_value = "grid.png")]
        output: PathBuf,

        /// Session config as JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Grab {
            url,
            frames,
            output,
            config,
            software,
        } => {
            let mut config = load_config(config.as_ref())?;
            if software {
                config.prefer_hardware_decode = false;
                config.prefer_hardware_convert = false;
            }
            grab(&url, frames, output, config)
        }
        Command::Probe { url, config, json } => {
            let config = load_config(config.as_ref())?;
            let report = run_probe(url.as_deref(), config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }
            Ok(())
        }
        Command::View {
            urls,
            seconds,
            cell,
            columns,
            output,
            config,
        } => {
            let (cell_w, cell_h) = parse_cell(&cell)?;
            let monitor_config = MonitorConfig {
                session: load_config(config.as_ref())?,
                resize_to: Some((cell_w, cell_h)),
                ..MonitorConfig::default()
            };
            let columns = columns.unwrap_or_else(|| default_columns(urls.len()));
            view(&urls, Duration::from_secs(seconds), (cell_w, cell_h), columns, output, monitor_config)
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn grab(url: &str, frames: u32, output: Option<PathBuf>, config: SessionConfig) -> Result<()> {
    let mut reader = connect_with(url, config)?;
    let start = Instant::now();
    let mut last: Option<BgrFrame> = None;

    for _ in 0..frames {
        match reader.next_frame() {
            Ok(frame) => last = Some(frame),
            Err(e) if e.is_retriable() => {
                log::warn!("Transient read error, retrying: {}", e);
                continue;
            }
            Err(e) => return Err(e).context("Failed to read frame"),
        }
    }

    let elapsed = start.elapsed();
    let stats = reader.stats().clone();
    let path = reader.decode_path();
    reader.close();

    println!(
        "Read {} frames in {:.2}s ({:.1} fps), strategy: {}",
        stats.frames,
        elapsed.as_secs_f64(),
        stats.frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        path
    );
    println!(
        "  units read {}, discarded {}, rejected {}, hw conversions {}, sw conversions {}",
        stats.units_read,
        stats.units_discarded,
        stats.submissions_rejected,
        stats.hardware_conversions,
        stats.software_conversions
    );

    if let (Some(output), Some(frame)) = (output, last) {
        frame
            .save(&output)
            .with_context(|| format!("Failed to save {}", output.display()))?;
        println!("Saved {}x{} frame to {}", frame.width(), frame.height(), output.display());
    }
    Ok(())
}

fn run_probe(url: Option<&str>, config: SessionConfig) -> Result<CapabilityReport> {
    let mut backend = FfmpegBackend::new()?;
    let mut report = probe::probe(&mut backend, &config);
    if let Some(url) = url {
        drop(backend);
        report.session = Some(probe::probe_session(FfmpegBackend::new()?, config, url));
    }
    Ok(report)
}

fn view(
    urls: &[String],
    duration: Duration,
    (cell_w, cell_h): (u32, u32),
    columns: usize,
    output: PathBuf,
    config: MonitorConfig,
) -> Result<()> {
    rtsp_reader::decoder::ffmpeg::init_ffmpeg()?;
    let mut monitor = CameraMonitor::start(urls, config, FfmpegBackend::default);

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        thread::sleep(Duration::from_secs(1));
        for camera in monitor.snapshot() {
            match (&camera.frame, &camera.last_error) {
                (Some(_), _) => log::info!(
                    "Camera[{}] {} frames, {} reconnects, {}",
                    camera.index,
                    camera.frames,
                    camera.reconnects,
                    camera.path.map(|p| p.to_string()).unwrap_or_default()
                ),
                (None, Some(e)) => log::info!("Camera[{}] waiting: {}", camera.index, e),
                (None, None) => log::info!("Camera[{}] connecting", camera.index),
            }
        }
    }

    let frames = monitor.latest_frames();
    monitor.stop();

    let refs: Vec<Option<&BgrFrame>> = frames.iter().map(|f| f.as_deref()).collect();
    let grid = compose_grid(&refs, cell_w, cell_h, columns);
    grid.save(&output)
        .with_context(|| format!("Failed to save {}", output.display()))?;
    println!(
        "Saved {}x{} grid of {} cameras to {}",
        grid.width(),
        grid.height(),
        urls.len(),
        output.display()
    );
    Ok(())
}

fn parse_cell(cell: &str) -> Result<(u32, u32)> {
    let Some((w, h)) = cell.split_once(['x', 'X']) else {
        bail!("Invalid cell size {:?}, expected WIDTHxHEIGHT", cell);
    };
    let w: u32 = w.trim().parse().with_context(|| format!("Invalid cell width in {:?}", cell))?;
    let h: u32 = h.trim().parse().with_context(|| format!("Invalid cell height in {:?}", cell))?;
    if w == 0 || h == 0 {
        bail!("Cell size must be non-zero, got {}x{}", w, h);
    }
    Ok((w, h))
}

fn default_columns(count: usize) -> usize {
    (count as f64).sqrt().ceil().max(1.0) as usize
}
