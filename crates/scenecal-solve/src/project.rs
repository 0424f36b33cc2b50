use nalgebra::{Isometry3, Point2, Point3};
use scenecal_core::CameraModel;

/// Project scene points through a world-to-camera pose.
///
/// Returns `None` if any point lies on or behind the image plane.
pub fn project_points(
    scene: &[Point3<f64>],
    world_to_camera: &Isometry3<f64>,
    model: &CameraModel,
) -> Option<Vec<Point2<f64>>> {
    scene
        .iter()
        .map(|p| {
            let c = world_to_camera.transform_point(p);
            model.project_camera_point(c.x, c.y, c.z)
        })
        .collect()
}

/// Root-mean-square pixel distance between projected scene points and the
/// observed image points.
pub fn reprojection_rms(
    scene: &[Point3<f64>],
    image: &[Point2<f64>],
    world_to_camera: &Isometry3<f64>,
    model: &CameraModel,
) -> Option<f64> {
    if scene.is_empty() || scene.len() != image.len() {
        return None;
    }
    let projected = project_points(scene, world_to_camera, model)?;
    let sum: f64 = projected
        .iter()
        .zip(image)
        .map(|(p, q)| (p - q).norm_squared())
        .sum();
    Some((sum / scene.len() as f64).sqrt())
}

/// Pixel residuals `[du0, dv0, du1, dv1, ...]` without a cheirality check;
/// only a point exactly on the camera plane is rejected.
pub(crate) fn residuals_into(
    scene: &[Point3<f64>],
    image: &[Point2<f64>],
    world_to_camera: &Isometry3<f64>,
    model: &CameraModel,
    out: &mut [f64],
) -> Option<()> {
    let k = &model.intrinsics;
    for (i, (p, q)) in scene.iter().zip(image).enumerate() {
        let c = world_to_camera.transform_point(p);
        if c.z.abs() < 1e-12 {
            return None;
        }
        let pd = model.distortion.distort(Point2::new(c.x / c.z, c.y / c.z));
        let px = k.denormalize(pd);
        out[2 * i] = px.x - q.x;
        out[2 * i + 1] = px.y - q.y;
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};
    use scenecal_core::{Distortion, Intrinsics};

    #[test]
    fn projects_principal_ray_to_center() {
        let model = CameraModel::new(
            Intrinsics::new(500.0, 500.0, 320.0, 240.0),
            Distortion::new(-0.2, 0.05, 0.0, 0.0, 0.0),
        );
        let pose =
            Isometry3::from_parts(Translation3::new(0.0, 0.0, 5.0), UnitQuaternion::identity());
        let px = project_points(&[Point3::origin(), Point3::new(1.0, 0.0, 0.0)], &pose, &model)
            .unwrap();
        assert!((px[0] - Point2::new(320.0, 240.0)).norm() < 1e-12);
        // Barrel distortion pulls the off-axis point toward the center.
        assert!(px[1].x < 320.0 + 100.0);
        assert!(reprojection_rms(&[Point3::origin()], &[Point2::new(323.0, 244.0)], &pose, &model)
            .map(|r| (r - 5.0).abs() < 1e-12)
            .unwrap());
    }

    #[test]
    fn behind_camera_is_rejected() {
        let model = CameraModel::default();
        let pose = Isometry3::from_parts(
            Translation3::from(Vector3::new(0.0, 0.0, -1.0)),
            UnitQuaternion::identity(),
        );
        assert!(project_points(&[Point3::origin()], &pose, &model).is_none());
    }
}
