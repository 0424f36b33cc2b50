use nalgebra::{DVector, Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use scenecal_core::CameraModel;

use crate::error::PnpError;
use crate::lm::{minimize, LmOptions};
use crate::project::residuals_into;

pub(crate) fn pose_from_params(x: &DVector<f64>, offset: usize) -> Isometry3<f64> {
    let rvec = Vector3::new(x[offset], x[offset + 1], x[offset + 2]);
    let tvec = Vector3::new(x[offset + 3], x[offset + 4], x[offset + 5]);
    Isometry3::from_parts(Translation3::from(tvec), UnitQuaternion::from_scaled_axis(rvec))
}

pub(crate) fn pose_to_params(pose: &Isometry3<f64>) -> [f64; 6] {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    [r.x, r.y, r.z, t.x, t.y, t.z]
}

/// Minimize pixel reprojection error over `[rvec, tvec]` with the camera
/// model held fixed.
pub(super) fn refine_pose(
    scene: &[Point3<f64>],
    image: &[Point2<f64>],
    model: &CameraModel,
    init: &Isometry3<f64>,
    opts: &LmOptions,
) -> Result<Isometry3<f64>, PnpError> {
    let residuals = |x: &DVector<f64>| {
        let pose = pose_from_params(x, 0);
        let mut out = DVector::zeros(2 * scene.len());
        residuals_into(scene, image, &pose, model, out.as_mut_slice())?;
        Some(out)
    };
    let x0 = DVector::from_row_slice(&pose_to_params(init));
    let outcome = minimize(&residuals, x0, opts);
    if !outcome.cost.is_finite() {
        return Err(PnpError::NotConverged);
    }
    let pose = pose_from_params(&outcome.params, 0);
    if scene.iter().any(|p| pose.transform_point(p).z <= 0.0) {
        return Err(PnpError::NotConverged);
    }
    Ok(pose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pnp::test_support::*;

    #[test]
    fn refines_perturbed_start() {
        let m = model();
        let gt = ground_truth();
        let scene = cloud();
        let image = project(&scene, &gt, &m);
        let mut start = gt;
        start.translation.vector += Vector3::new(0.05, -0.04, 0.2);
        start.rotation =
            UnitQuaternion::from_scaled_axis(Vector3::new(0.02, 0.01, -0.03)) * start.rotation;
        let pose = refine_pose(&scene, &image, &m, &start, &LmOptions::default()).unwrap();
        assert_pose_close(&pose, &gt, 1e-7);
    }

    #[test]
    fn params_round_trip() {
        let gt = ground_truth();
        let p = DVector::from_row_slice(&pose_to_params(&gt));
        assert_pose_close(&pose_from_params(&p, 0), &gt, 1e-12);
    }
}
