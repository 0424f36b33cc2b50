//! High-level facade crate for the `scenecal-*` workspace.
//!
//! This crate provides:
//! - stable re-exports of the core types, the solvers and the interactive
//!   calibration session,
//! - file-driven helpers ([`run`]) that solve a camera from a JSON list of
//!   named correspondences and undistort image files,
//! - (feature `cli`) the `scenecal` command-line tool built on those helpers.
//!
//! ## Quickstart
//!
//! ```no_run
//! use scenecal::run::{run_solve, SolveInput};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = SolveInput::load_json("points.json")?;
//! let report = run_solve(&input, true)?;
//! println!("rms: {:.3}px, pose: {:?}", report.rms, report.pose);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `scenecal::core`: camera model, pose conventions, geometry, remap tables.
//! - `scenecal::solve`: PnP, single-view intrinsics calibration, quick
//!   four-point calibration.
//! - `scenecal::session`: correspondence store, readiness checks, echo
//!   confirmation, save flows and frame undistortion.
//! - `scenecal::run`: JSON in, JSON out.

pub use scenecal_core as core;
pub use scenecal_session as session;
pub use scenecal_solve as solve;

pub use scenecal_core::{CameraModel, Distortion, FixMask, Intrinsics, PersistedPose};
pub use scenecal_session::{CalibrationConfig, CalibrationSession};
pub use scenecal_solve::{PnpMethod, PnpSolution};

pub mod run;

/// Install a `tracing` subscriber and route `log` records into it.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    scenecal_core::init_tracing(json);
    let _ = tracing_log::LogTracer::init();
}
