//! Gaze estimation demo over a synthetic landmark stream.

use anyhow::{Context, Result};
use clap::Parser;
use gaze_estimation::{
    config::Config,
    face_model::FaceTemplate,
    landmarks::Eye,
    session::{spawn_session, FrameStatus},
    synthetic::{SyntheticConfig, SyntheticFace},
};
use log::{info, warn};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of frames to generate
    #[arg(short, long, default_value = "600")]
    frames: usize,

    /// Landmark noise standard deviation in metres
    #[arg(short, long, default_value = "0.0002")]
    noise: f64,

    /// Random seed for the synthetic stream
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Fraction of frames without a detection
    #[arg(long, default_value = "0.05")]
    drop_rate: f64,

    /// Frame width used for the drawn gaze lines
    #[arg(long, default_value = "640")]
    width: u32,

    /// Frame height used for the drawn gaze lines
    #[arg(long, default_value = "480")]
    height: u32,

    /// Keep the head still
    #[arg(long)]
    still: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    info!("Gaze estimation demo");

    let config = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path);
        match Config::from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Failed to load config file: {}. Using defaults.", e);
                Config::default()
            }
        }
    } else {
        Config::default()
    };
    let visualization = config.visualization.clone();

    let source = SyntheticFace::canonical(SyntheticConfig {
        frames: Some(args.frames),
        noise_std: args.noise,
        drop_rate: args.drop_rate,
        seed: args.seed,
        head_motion: !args.still,
        ..SyntheticConfig::default()
    })
    .context("Invalid synthetic stream parameters")?;
    let truth_source = source.clone();

    let handle = spawn_session(config, Arc::new(FaceTemplate::canonical()), source)
        .context("Failed to start gaze session")?;

    let mut first_gaze = None;
    for result in handle.results() {
        if first_gaze.is_none() && result.has_gaze() {
            first_gaze = Some(result.frame_index);
            info!("First gaze vector at frame {}", result.frame_index);
        }
        if result.status != FrameStatus::Tracked || result.frame_index % 30 != 0 {
            continue;
        }

        let truth = truth_source.truth(result.frame_index);
        for eye in [Eye::Left, Eye::Right] {
            let Some(ray) = result.gaze(eye) else {
                println!("frame {:>4} {:>5}: calibrating", result.frame_index, eye);
                continue;
            };
            let error_deg = ray.direction.angle(&truth.image_direction()).to_degrees();
            let segment = ray.line_segment(&visualization, args.width, args.height)?;
            println!(
                "frame {:>4} {:>5}: line {:?} -> {:?}, error {:.2}°",
                result.frame_index, eye, segment.start, segment.end, error_deg
            );
        }
    }

    let summary = handle.join()?;
    info!(
        "Processed {} frames: {} tracked, {} without detection, {} skipped",
        summary.frames, summary.tracked, summary.no_detection, summary.skipped
    );
    info!(
        "Eyeball convergence: left {}, right {}",
        summary.left_converged, summary.right_converged
    );

    Ok(())
}
