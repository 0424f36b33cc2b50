use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use scenecal::run::{run_solve, undistort_file, RunError, SolveInput};
use scenecal::session::IoError;
use scenecal::{CalibrationConfig, CameraModel};

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Config(#[from] IoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[cfg(not(feature = "tracing"))]
    #[error(transparent)]
    Logger(#[from] log::SetLoggerError),
}

#[derive(Parser)]
#[command(name = "scenecal")]
#[command(about = "Solve scene camera pose and intrinsics from point correspondences")]
#[command(version)]
struct Cli {
    /// Raise the log level (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve the camera pose from a JSON list of named correspondences.
    Solve {
        /// Path to the input points (JSON).
        #[arg(long)]
        input: PathBuf,

        /// Path to write the solve report (JSON).
        #[arg(long)]
        out: PathBuf,

        /// Also refine intrinsics and distortion (needs at least 6 points).
        #[arg(long)]
        intrinsics: bool,

        /// Calibration settings (JSON), replacing the ones in the input.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Undistort an image with a camera model.
    Undistort {
        /// Path to the input image.
        #[arg(long)]
        image: PathBuf,

        /// Camera model (JSON) with intrinsics and distortion.
        #[arg(long)]
        camera: PathBuf,

        /// Path to write the undistorted image.
        #[arg(long)]
        out: PathBuf,
    },
    /// Write the default calibration settings.
    InitConfig {
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Solve {
            input,
            out,
            intrinsics,
            config,
        } => solve(&input, &out, intrinsics, config.as_deref()),
        Commands::Undistort { image, camera, out } => undistort(&image, &camera, &out),
        Commands::InitConfig { out } => {
            CalibrationConfig::default().write_json(&out)?;
            log::info!("default settings written to {}", out.display());
            Ok(())
        }
    }
}

#[cfg(feature = "tracing")]
fn init_logging(_verbose: u8) -> Result<(), CliError> {
    scenecal::init_tracing(false);
    Ok(())
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: u8) -> Result<(), CliError> {
    scenecal::core::init_with_level(scenecal::core::level_for_verbosity(verbose))?;
    Ok(())
}

fn solve(
    input_path: &Path,
    out_path: &Path,
    intrinsics: bool,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let mut input = SolveInput::load_json(input_path)?;
    if let Some(path) = config_path {
        input.config = CalibrationConfig::load_json(path)?;
    }
    log::info!(
        "solving {} correspondences from {}",
        input.points.len(),
        input_path.display()
    );
    let report = run_solve(&input, intrinsics)?;
    std::fs::write(out_path, serde_json::to_string_pretty(&report)?)?;
    log::info!("report written to {}", out_path.display());
    Ok(())
}

fn undistort(image_path: &Path, camera_path: &Path, out_path: &Path) -> Result<(), CliError> {
    let camera: CameraModel = serde_json::from_str(&std::fs::read_to_string(camera_path)?)?;
    if camera.distortion.is_zero() {
        log::info!("camera has no distortion, copying frame");
    }
    undistort_file(image_path, &camera, out_path)?;
    log::info!("undistorted image written to {}", out_path.display());
    Ok(())
}
