//! Drag-based four-point calibration and pose recovery from stored
//! correspondences.

use nalgebra::{Matrix4, Point2, Point3, Vector4};

use scenecal_core::{camera_to_world, CameraModel, Intrinsics, PoseComponents};

use crate::error::PnpError;
use crate::lm::LmOptions;
use crate::pnp::{select_method, solve_pnp, PnpMethod, PnpSolution};

/// Number of scene anchors used by quick calibration.
pub const QUICK_CALIB_POINTS: usize = 4;

/// Where the current renderer camera sees `scene` points, in pixels.
///
/// The renderer camera is an ideal pinhole, so no distortion is applied.
pub fn quick_image_points(
    scene: &[Point3<f64>],
    renderer_pose: &Matrix4<f64>,
    intrinsics: &Intrinsics,
) -> Result<Vec<Point2<f64>>, PnpError> {
    let world_to_renderer = renderer_pose.try_inverse().ok_or(PnpError::Degenerate)?;
    scene
        .iter()
        .map(|p| {
            let c = world_to_renderer * Vector4::new(p.x, p.y, p.z, 1.0);
            // Renderer camera looks down -Z with Y up.
            let (x, y, z) = (c.x, -c.y, -c.z);
            if z <= f64::EPSILON {
                return Err(PnpError::Degenerate);
            }
            Ok(intrinsics.denormalize(Point2::new(x / z, y / z)))
        })
        .collect()
}

/// Re-solve the pose from the four anchors after an intrinsics change.
pub fn solve_quick_pose(
    scene: &[Point3<f64>],
    image: &[Point2<f64>],
    model: &CameraModel,
) -> Result<PnpSolution, PnpError> {
    if scene.len() != QUICK_CALIB_POINTS {
        return Err(PnpError::TooFewPoints {
            needed: QUICK_CALIB_POINTS,
            got: scene.len(),
        });
    }
    solve_pnp(scene, image, model, PnpMethod::SqPnp, &LmOptions::default())
}

/// Camera-to-world pose (no axis flip) recovered from stored
/// correspondences.
pub fn pose_from_correspondences(
    scene: &[Point3<f64>],
    image: &[Point2<f64>],
    model: &CameraModel,
    coplanar_epsilon: f64,
) -> Result<PoseComponents, PnpError> {
    let method = select_method(scene, coplanar_epsilon);
    let sol = solve_pnp(scene, image, model, method, &LmOptions::default())?;
    Ok(PoseComponents::from_matrix(&camera_to_world(&sol.rvec, &sol.tvec)))
}
