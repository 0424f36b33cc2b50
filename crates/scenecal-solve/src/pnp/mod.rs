//! Perspective-n-point pose solves.
//!
//! Two methods are offered:
//! - [`PnpMethod::Iterative`]: linear initialisation (plane homography for
//!   planar or small sets, normalized DLT otherwise) refined by
//!   Levenberg–Marquardt on pixel reprojection error.
//! - [`PnpMethod::SqPnp`]: globally optimal SQPnP over the rotation manifold.
//!
//! All solves return a world-to-camera pose in the vision convention; use
//! [`PnpSolution::renderer_pose`] for the renderer's camera-to-world matrix.

mod dlt;
mod planar;
mod refine;
mod sqpnp;

use nalgebra::{Isometry3, Matrix4, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use scenecal_core::{
    are_points_collinear, are_points_coplanar, renderer_pose, CameraModel, PersistedPose,
};

use crate::error::PnpError;
use crate::lm::LmOptions;
use crate::project::reprojection_rms;

pub(crate) use refine::{pose_from_params, pose_to_params};

/// Smallest accepted correspondence count.
pub const MIN_PNP_POINTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PnpMethod {
    Iterative,
    SqPnp,
}

/// SQPnP when the scene points are confirmed non-coplanar, iterative
/// otherwise.
///
/// The coplanarity test only discriminates 4- and 5-point sets, so larger
/// sets always go through the iterative solver.
pub fn select_method(scene: &[Point3<f64>], coplanar_epsilon: f64) -> PnpMethod {
    if are_points_coplanar(scene, coplanar_epsilon) {
        PnpMethod::Iterative
    } else {
        PnpMethod::SqPnp
    }
}

/// A solved world-to-camera pose.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PnpSolution {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    pub method: PnpMethod,
    /// RMS pixel reprojection error.
    pub rms: f64,
}

impl PnpSolution {
    pub(crate) fn from_isometry(iso: &Isometry3<f64>, method: PnpMethod, rms: f64) -> Self {
        Self {
            rvec: iso.rotation.scaled_axis(),
            tvec: iso.translation.vector,
            method,
            rms,
        }
    }

    pub fn world_to_camera(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.tvec),
            UnitQuaternion::from_scaled_axis(self.rvec),
        )
    }

    /// Row-major camera-to-world matrix for the Y-up renderer camera.
    pub fn renderer_pose(&self) -> Matrix4<f64> {
        renderer_pose(&self.rvec, &self.tvec)
    }

    pub fn persisted_pose(&self) -> PersistedPose {
        PersistedPose::from_renderer(&self.renderer_pose())
    }
}

/// Input checks shared by every solver: counts, finiteness, duplicates and
/// collinear scene sets.
pub(crate) fn validate_correspondences(
    scene: &[Point3<f64>],
    image: &[Point2<f64>],
    min_points: usize,
) -> Result<(), PnpError> {
    if scene.len() != image.len() {
        return Err(PnpError::LengthMismatch {
            scene: scene.len(),
            image: image.len(),
        });
    }
    if scene.len() < min_points {
        return Err(PnpError::TooFewPoints {
            needed: min_points,
            got: scene.len(),
        });
    }
    for (i, (p, q)) in scene.iter().zip(image).enumerate() {
        if !(p.iter().all(|v| v.is_finite()) && q.iter().all(|v| v.is_finite())) {
            return Err(PnpError::NonFinite(i));
        }
    }
    for i in 0..scene.len() {
        for j in (i + 1)..scene.len() {
            if (scene[i] - scene[j]).norm() < 1e-9 || (image[i] - image[j]).norm() < 1e-9 {
                return Err(PnpError::Duplicate(i, j));
            }
        }
    }
    if are_points_collinear(scene) {
        return Err(PnpError::Degenerate);
    }
    Ok(())
}

fn finite_pose(iso: &Isometry3<f64>) -> bool {
    iso.translation.vector.iter().all(|v| v.is_finite())
        && iso.rotation.coords.iter().all(|v| v.is_finite())
}

/// Solve a pose from `scene` (world) and `image` (pixel) correspondences.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip(scene, image, model, opts), fields(n = scene.len()))
)]
pub fn solve_pnp(
    scene: &[Point3<f64>],
    image: &[Point2<f64>],
    model: &CameraModel,
    method: PnpMethod,
    opts: &LmOptions,
) -> Result<PnpSolution, PnpError> {
    validate_correspondences(scene, image, MIN_PNP_POINTS)?;
    model.intrinsics.check()?;

    let normalized: Vec<Point2<f64>> = image
        .iter()
        .map(|&p| model.pixel_to_normalized(p))
        .collect();

    let pose = match method {
        PnpMethod::SqPnp => sqpnp::solve(scene, &normalized)?,
        PnpMethod::Iterative => {
            let init = initial_pose(scene, &normalized)?;
            refine::refine_pose(scene, image, model, &init, opts)?
        }
    };

    if !finite_pose(&pose) {
        return Err(PnpError::NotConverged);
    }
    let rms = reprojection_rms(scene, image, &pose, model).ok_or(PnpError::NotConverged)?;
    log::debug!("pnp {:?}: n={} rms={:.4}px", method, scene.len(), rms);
    Ok(PnpSolution::from_isometry(&pose, method, rms))
}

/// Linear start for the iterative solver, on undistorted normalized points.
fn initial_pose(
    scene: &[Point3<f64>],
    normalized: &[Point2<f64>],
) -> Result<Isometry3<f64>, PnpError> {
    if planar::is_planar(scene) {
        return planar::solve(scene, normalized);
    }
    if scene.len() >= dlt::MIN_DLT_POINTS {
        match dlt::solve(scene, normalized) {
            Ok(pose) => return Ok(pose),
            Err(e) => log::debug!("dlt init failed ({e}), falling back to sqpnp"),
        }
    }
    sqpnp::solve(scene, normalized)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use scenecal_core::{Distortion, Intrinsics};

    pub fn model() -> CameraModel {
        CameraModel::new(
            Intrinsics::new(800.0, 780.0, 640.0, 360.0),
            Distortion::default(),
        )
    }

    pub fn ground_truth() -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(0.3, -0.2, 6.0),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.25, -0.4, 0.1)),
        )
    }

    pub fn project(
        scene: &[Point3<f64>],
        pose: &Isometry3<f64>,
        model: &CameraModel,
    ) -> Vec<Point2<f64>> {
        crate::project::project_points(scene, pose, model).expect("in front of camera")
    }

    /// Eight well-spread non-coplanar scene points.
    pub fn cloud() -> Vec<Point3<f64>> {
        vec![
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.2, -0.8, 0.5),
            Point3::new(0.9, 1.1, -0.4),
            Point3::new(-1.1, 0.7, 0.8),
            Point3::new(0.1, 0.2, 1.3),
            Point3::new(-0.3, -1.4, -0.9),
            Point3::new(1.5, 0.3, -1.0),
            Point3::new(-1.6, 0.1, -0.2),
        ]
    }

    pub fn assert_pose_close(a: &Isometry3<f64>, b: &Isometry3<f64>, tol: f64) {
        let dt = (a.translation.vector - b.translation.vector).norm();
        let dr = a.rotation.angle_to(&b.rotation);
        assert!(dt < tol && dr < tol, "pose mismatch: dt={dt:e} dr={dr:e}");
    }
}
