//! pupiltrack CLI: run the tracker over a sequence of eye frames.

use clap::{Args, Parser, Subcommand};
use pupiltrack::{
    frame_sharpness, Blink, FrameParams, FrameResult, Rect, Tracker, TrackerConfig,
};
use std::path::{Path, PathBuf};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Parser)]
#[command(name = "pupiltrack")]
#[command(about = "Track the pupil and corneal glints across eye video frames")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a sequence of frames and write per-frame results.
    Track(CliTrackArgs),

    /// Print the default configuration as JSON.
    DefaultConfig,
}

#[derive(Debug, Clone, Args)]
struct CliTrackArgs {
    /// Frame images or directories of frames, processed in sorted order.
    #[arg(long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Path to write the session results (JSON).
    #[arg(long)]
    out: PathBuf,

    /// JSON configuration file (see `default-config`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frame id of the first frame.
    #[arg(long, default_value = "0")]
    first_id: i64,

    /// Fixed RANSAC seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Pin the search region: x,y,width,height in pixels.
    #[arg(long)]
    roi: Option<String>,

    /// Allow splitting a single fused glint blob.
    #[arg(long)]
    calibration: bool,

    /// Median kernel of the coarse localization (odd).
    #[arg(long)]
    blur_all: Option<u32>,

    /// Median kernel of the pupil window (odd).
    #[arg(long)]
    blur_roi: Option<u32>,

    /// Pupil binarization threshold, fraction of full scale.
    #[arg(long)]
    threshold_img: Option<f64>,

    /// Glint binarization threshold, fraction of full scale.
    #[arg(long)]
    threshold_glints: Option<f64>,

    /// Margin around the last glints for the next glint search, in pixels.
    #[arg(long)]
    glints_roi_padding: Option<i32>,

    /// Canny low hysteresis threshold.
    #[arg(long)]
    canny_low: Option<f32>,

    /// Canny high hysteresis threshold.
    #[arg(long)]
    canny_high: Option<f32>,

    /// Maximum vertical offset between paired glints, in pixels.
    #[arg(long)]
    glints_distance: Option<f64>,
}

/// Contents of the `--config` file.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
struct CliConfig {
    tracker: TrackerConfig,
    frame: FrameParams,
}

#[derive(Debug, serde::Serialize)]
struct FrameRecord {
    frame_id: i64,
    path: String,
    code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    sharpness: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<FrameResult>,
}

#[derive(Debug, serde::Serialize)]
struct SessionReport {
    frames: Vec<FrameRecord>,
    blinks: Vec<Blink>,
    tracked: usize,
    failed: usize,
}

impl CliTrackArgs {
    fn apply_overrides(&self, params: &mut FrameParams) {
        if let Some(v) = self.blur_all {
            params.blur_all = v;
        }
        if let Some(v) = self.blur_roi {
            params.blur_roi = v;
        }
        if let Some(v) = self.threshold_img {
            params.threshold_img = v;
        }
        if let Some(v) = self.threshold_glints {
            params.threshold_glints = v;
        }
        if let Some(v) = self.glints_roi_padding {
            params.glints_roi_padding = v;
        }
        if let Some(v) = self.canny_low {
            params.canny_low = v;
        }
        if let Some(v) = self.canny_high {
            params.canny_high = v;
        }
        if let Some(v) = self.glints_distance {
            params.glints_distance = v;
        }
    }
}

fn parse_roi(s: &str) -> CliResult<Rect> {
    let parts: Vec<i32> = s
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .map_err(|e| -> CliError { format!("invalid --roi '{}': {}", s, e).into() })?;
    match parts.as_slice() {
        &[x, y, w, h] if w > 0 && h > 0 => Ok(Rect::new(x, y, w, h)),
        _ => Err(format!("invalid --roi '{}': expected x,y,width,height", s).into()),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| -> CliError {
        format!("Failed to read config {}: {}", path.display(), e).into()
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Expand directories into their image files; each directory is sorted by name.
fn collect_frames(inputs: &[PathBuf]) -> CliResult<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            entries.sort();
            frames.extend(entries);
        } else {
            frames.push(input.clone());
        }
    }
    if frames.is_empty() {
        return Err("no frames found".into());
    }
    Ok(frames)
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track(args) => run_track(&args),
        Commands::DefaultConfig => run_default_config(),
    }
}

// ── default-config ─────────────────────────────────────────────────────

fn run_default_config() -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(&CliConfig::default())?);
    Ok(())
}

// ── track ──────────────────────────────────────────────────────────────

fn run_track(args: &CliTrackArgs) -> CliResult<()> {
    let CliConfig {
        tracker: mut tracker_cfg,
        frame: mut params,
    } = load_config(args.config.as_deref())?;
    args.apply_overrides(&mut params);
    params.validate()?;
    if args.seed.is_some() {
        tracker_cfg.fit.seed = args.seed;
    }

    let mut tracker = Tracker::with_config(tracker_cfg);
    if args.calibration {
        tracker.set_calibration(true);
    }
    if let Some(roi) = args.roi.as_deref() {
        let roi = parse_roi(roi)?;
        tracing::info!("Fixed search region: {:?}", roi);
        tracker.set_fixed_roi(roi);
    }

    let frames = collect_frames(&args.input)?;
    tracing::info!("Tracking {} frames", frames.len());

    let mut records = Vec::with_capacity(frames.len());
    for (k, path) in frames.iter().enumerate() {
        let frame_id = args.first_id + k as i64;
        let img = image::open(path).map_err(|e| -> CliError {
            format!("Failed to open image {}: {}", path.display(), e).into()
        })?;
        let gray = img.to_luma8();
        tracker.set_id(frame_id);
        let status = tracker.measure(&gray, &params);
        let result = tracker
            .last_result()
            .filter(|r| r.frame_id == frame_id)
            .cloned();
        records.push(FrameRecord {
            frame_id,
            path: path.display().to_string(),
            code: status.code(),
            error: tracker.last_error().map(|e| e.to_string()),
            sharpness: frame_sharpness(&gray),
            result,
        });
    }

    let tracked = records.iter().filter(|r| r.result.is_some()).count();
    let report = SessionReport {
        failed: records.len() - tracked,
        tracked,
        blinks: tracker.blinks().to_vec(),
        frames: records,
    };
    tracing::info!(
        "Tracked {}/{} frames, {} blinks",
        report.tracked,
        report.frames.len(),
        report.blinks.len()
    );
    for blink in &report.blinks {
        tracing::info!("Blink: frames {}..={}", blink.begin, blink.end);
    }

    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&args.out, &json)?;
    tracing::info!("Results written to {}", args.out.display());
    Ok(())
}
