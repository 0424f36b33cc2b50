//! Pose and intrinsics solvers for scene camera calibration.
//!
//! - [`solve_pnp`] recovers a camera pose from 2D-3D correspondences with
//!   either the iterative or the SQPnP method; [`select_method`] picks one
//!   from the scene geometry.
//! - [`calibrate_camera`] jointly refines intrinsics, distortion and pose from
//!   a single view, releasing parameter groups only when enough
//!   correspondences back them.
//! - [`quick_image_points`] / [`solve_quick_pose`] implement the four-point
//!   drag calibration.
//!
//! All functions are pure: no hidden state, no randomness.
//!
//! ```
//! use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
//! use scenecal_core::CameraModel;
//! use scenecal_solve::{project_points, solve_pnp, LmOptions, PnpMethod};
//!
//! let model = CameraModel::default();
//! let truth = Isometry3::from_parts(
//!     Translation3::new(0.1, 0.0, 5.0),
//!     UnitQuaternion::from_scaled_axis(Vector3::new(0.1, 0.2, 0.0)),
//! );
//! let scene = [
//!     Point3::new(-1.0, -1.0, 0.0),
//!     Point3::new(1.0, -1.0, 0.0),
//!     Point3::new(1.0, 1.0, 0.0),
//!     Point3::new(-1.0, 1.0, 0.0),
//! ];
//! let image = project_points(&scene, &truth, &model).unwrap();
//! let opts = LmOptions::default();
//! let sol = solve_pnp(&scene, &image, &model, PnpMethod::Iterative, &opts).unwrap();
//! assert!(sol.rms < 1e-6);
//! ```

mod calibrate;
mod error;
mod lm;
mod pnp;
mod project;
mod quick;

pub use calibrate::{
    calibrate_camera, effective_fix_mask, CalibrationResult, MIN_DISTORTION_POINTS,
    MIN_INTRINSICS_POINTS,
};
pub use error::{CalibrateError, PnpError};
pub use lm::LmOptions;
pub use pnp::{select_method, solve_pnp, PnpMethod, PnpSolution, MIN_PNP_POINTS};
pub use project::{project_points, reprojection_rms};
pub use quick::{
    pose_from_correspondences, quick_image_points, solve_quick_pose, QUICK_CALIB_POINTS,
};
