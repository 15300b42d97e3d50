//! Calibrate a simulated stage/camera pair and report the fitted transform.
//!
//! The simulator knows the true pixel size and rotation, so the printed
//! errors show how well the procedure recovers them.

use anyhow::{Context, Result};
use clap::Parser;
use nalgebra::Vector2;
use shared::config_storage::ConfigStorage;
use shared::ImageSize;
use simulator::{OpticalModel, SimulatedCamera, SimulatedStage, SpotField, SpotFieldParams};
use std::path::PathBuf;
use test_bench::stage_calibration::{
    CalibrationConfig, CalibrationController, CalibrationEvent, RoiMode,
};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Stage/camera calibration against the simulated stage and camera",
    long_about = "Runs the stage calibration procedure against a simulated stage and a \
        camera looking at a random spot field. The ground-truth pixel size and rotation \
        are known, so the result can be compared against them."
)]
struct Args {
    #[arg(long, default_value = "0.5", help = "Ground-truth stage units per pixel")]
    pixel_size: f64,

    #[arg(long, default_value = "0.0", help = "Ground-truth camera rotation in degrees")]
    rotation_deg: f64,

    #[arg(long, default_value = "256", help = "Frame width in pixels")]
    width: usize,

    #[arg(long, default_value = "256", help = "Frame height in pixels")]
    height: usize,

    #[arg(long, default_value = "1.0", help = "Gaussian read noise RMS in DN")]
    read_noise: f64,

    #[arg(long, default_value = "42", help = "Seed for the spot field and noise")]
    seed: u64,

    #[arg(
        long,
        default_value = "0.0",
        help = "Simulated stage backlash in stage units"
    )]
    backlash: f64,

    #[arg(long, help = "Safe travel radius in stage units (overrides the config)")]
    safe_radius: Option<f64>,

    #[arg(
        long,
        help = "Register a centered window of this side instead of whole frames"
    )]
    roi_side: Option<usize>,

    #[arg(
        long = "move",
        value_name = "DX,DY",
        value_parser = parse_move,
        allow_hyphen_values = true,
        help = "Calibrate from these stage moves instead of the search (repeatable)"
    )]
    moves: Vec<Vector2<f64>>,

    #[arg(long, help = "JSON calibration config; missing fields take defaults")]
    config: Option<PathBuf>,

    #[arg(long, help = "Store the result under this calibration name")]
    save: Option<String>,

    #[arg(long, help = "Calibration storage root (defaults to ~/.cf_config)")]
    config_dir: Option<PathBuf>,
}

fn parse_move(s: &str) -> Result<Vector2<f64>, String> {
    let (dx, dy) = s
        .split_once(',')
        .ok_or_else(|| format!("expected DX,DY, got '{s}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid stage move '{s}': {e}"))
    };
    Ok(Vector2::new(parse(dx)?, parse(dy)?))
}

fn log_event(event: &CalibrationEvent) {
    match event {
        CalibrationEvent::Measurement {
            phase,
            progress,
            stage_x,
            stage_y,
            pixel_dx,
            pixel_dy,
            confidence,
        } => debug!(
            "[{progress}] {phase}: stage ({stage_x:.4}, {stage_y:.4}) -> ({pixel_dx:.3}, {pixel_dy:.3}) px, confidence {confidence:.3}"
        ),
        CalibrationEvent::FirstApproximation { transform } => info!(
            "First approximation: {:.5} units/px, {:.3}°",
            transform.pixel_size(),
            transform.rotation_degrees()
        ),
        _ => {}
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CalibrationConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CalibrationConfig::default(),
    };
    if let Some(radius) = args.safe_radius {
        config.safe_travel_radius = radius;
    }
    if let Some(side) = args.roi_side {
        config.roi = RoiMode::Centered { side };
    }

    let size = ImageSize::from_width_height(args.width, args.height);
    let optics = OpticalModel::new(args.pixel_size, args.rotation_deg.to_radians())
        .context("Invalid ground-truth optics")?;
    let field = SpotField::random(size, &SpotFieldParams::default(), args.seed);
    info!("Spot field: {} spots, frame {}", field.len(), size);

    let mut stage = SimulatedStage::new(0.0, 0.0)
        .with_backlash(args.backlash)
        .context("Invalid backlash")?;
    let mut camera = SimulatedCamera::new(size, field, optics, stage.position_handle())
        .with_noise(100.0, args.read_noise, args.seed)
        .context("Invalid noise parameters")?;

    let mut controller = CalibrationController::new(&mut stage, &mut camera, config);
    controller.register_callback(log_event);
    let result = if args.moves.is_empty() {
        controller.run()
    } else {
        controller.run_moves(&args.moves)
    }
    .context("Calibration failed")?;
    drop(controller);

    let truth = optics.ground_truth(Vector2::zeros());
    println!("Calibration complete after {} measurements", result.measurements);
    println!(
        "  pixel size:   {:.6} (truth {:.6})",
        result.pixel_size(),
        truth.pixel_size()
    );
    println!(
        "  rotation:     {:.4}° (truth {:.4}°)",
        result.transform.rotation_degrees(),
        truth.rotation_degrees()
    );
    println!("  skew:         {:.5} rad", result.skew());
    if let Some(rms) = result.rms_residual {
        println!("  rms residual: {rms:.5} stage units");
    }
    println!("  transform:    {:?}", result.transform.coefficients());
    println!(
        "  stage restored to ({:.4}, {:.4}), max excursion {:.3}",
        stage.position().x,
        stage.position().y,
        stage.max_excursion()
    );

    if let Some(name) = &args.save {
        let storage = match &args.config_dir {
            Some(dir) => ConfigStorage::with_path(dir.clone()),
            None => ConfigStorage::new().context("Failed to locate config directory")?,
        };
        let record = result
            .to_record()
            .with_description(format!("simulated, seed {}", args.seed));
        let path = storage
            .save_stage_calibration(name, &record)
            .with_context(|| format!("Failed to save calibration '{name}'"))?;
        println!("Saved calibration to {}", path.display());
    }

    Ok(())
}
