//! Pose conventions.
//!
//! Solvers work in the vision convention: `X_cam = R * X_world + t`, camera
//! looking down `+Z` with `+Y` pointing down the image. The renderer wants a
//! camera-to-world transform for a camera looking down `-Z` with `+Y` up.
//! Persisted camera records store the camera-to-world rotation as XYZ Euler
//! degrees in the Y-down convention, so the flip between the two happens
//! exactly once, at the serialization boundary.

use nalgebra::{Isometry3, Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// `diag(1, -1, -1)`: a half turn about the camera X axis.
#[inline]
fn axis_flip() -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0))
}

/// World-to-camera transform from an OpenCV-style rotation vector and
/// translation vector.
pub fn world_to_camera(rvec: &Vector3<f64>, tvec: &Vector3<f64>) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::from(*tvec),
        UnitQuaternion::from_scaled_axis(*rvec),
    )
}

/// Rotation matrix from a rotation vector.
pub fn rodrigues(rvec: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::from_scaled_axis(*rvec).into_inner()
}

/// Rotation vector of a (near) rotation matrix.
pub fn rodrigues_inverse(r: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix(r).scaled_axis()
}

/// Renderer pose from a solved world-to-camera pose.
///
/// Builds `[R | t]`, negates rows 1 and 2 (vision to graphics axes) and
/// inverts. The result is a row-major camera-to-world matrix in the Y-up
/// convention.
pub fn renderer_pose(rvec: &Vector3<f64>, tvec: &Vector3<f64>) -> Matrix4<f64> {
    let mut flip = Matrix4::identity();
    flip[(1, 1)] = -1.0;
    flip[(2, 2)] = -1.0;
    // inv(F * T) = inv(T) * F, F being its own inverse.
    world_to_camera(rvec, tvec).inverse().to_homogeneous() * flip
}

/// Camera-to-world transform without any axis flip.
pub fn camera_to_world(rvec: &Vector3<f64>, tvec: &Vector3<f64>) -> Matrix4<f64> {
    world_to_camera(rvec, tvec).inverse().to_homogeneous()
}

/// Switch a rotation between the Y-up and Y-down camera conventions.
///
/// Equivalent to rotating by π about Y then by π about Z in the object's
/// local frame. Applying it twice is the identity.
pub fn toggle_y_up_y_down(r: &Matrix3<f64>) -> Matrix3<f64> {
    r * axis_flip()
}

/// Intrinsic XYZ Euler rotation `Rx(x) * Ry(y) * Rz(z)`, radians.
pub fn matrix_from_euler_xyz(e: &Vector3<f64>) -> Matrix3<f64> {
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), e.x);
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), e.y);
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), e.z);
    (rx * ry * rz).into_inner()
}

/// Inverse of [`matrix_from_euler_xyz`], radians.
pub fn euler_xyz_from_matrix(m: &Matrix3<f64>) -> Vector3<f64> {
    let m13 = m[(0, 2)].clamp(-1.0, 1.0);
    let y = m13.asin();
    if m13.abs() < 0.999_999_9 {
        let x = (-m[(1, 2)]).atan2(m[(2, 2)]);
        let z = (-m[(0, 1)]).atan2(m[(0, 0)]);
        Vector3::new(x, y, z)
    } else {
        // Gimbal lock: fold all of the roll into X.
        let x = m[(2, 1)].atan2(m[(1, 1)]);
        Vector3::new(x, y, 0.0)
    }
}

/// Camera placement as stored in the scene database.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedPose {
    pub translation: [f64; 3],
    /// XYZ Euler angles in degrees, Y-down camera convention.
    pub rotation: [f64; 3],
}

impl PersistedPose {
    /// Convert a renderer (Y-up) camera-to-world matrix.
    pub fn from_renderer(m: &Matrix4<f64>) -> Self {
        let r: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let euler = euler_xyz_from_matrix(&toggle_y_up_y_down(&r));
        Self {
            translation: [m[(0, 3)], m[(1, 3)], m[(2, 3)]],
            rotation: [
                euler.x.to_degrees(),
                euler.y.to_degrees(),
                euler.z.to_degrees(),
            ],
        }
    }

    /// Back to a renderer (Y-up) camera-to-world matrix.
    pub fn to_renderer(&self) -> Matrix4<f64> {
        let euler = Vector3::new(
            self.rotation[0].to_radians(),
            self.rotation[1].to_radians(),
            self.rotation[2].to_radians(),
        );
        let r = toggle_y_up_y_down(&matrix_from_euler_xyz(&euler));
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        m[(0, 3)] = self.translation[0];
        m[(1, 3)] = self.translation[1];
        m[(2, 3)] = self.translation[2];
        m
    }

    /// Camera-to-world isometry in the Y-down convention.
    pub fn to_isometry(&self) -> Isometry3<f64> {
        let euler = Vector3::new(
            self.rotation[0].to_radians(),
            self.rotation[1].to_radians(),
            self.rotation[2].to_radians(),
        );
        let rot = Rotation3::from_matrix_unchecked(matrix_from_euler_xyz(&euler));
        Isometry3::from_parts(
            Translation3::new(self.translation[0], self.translation[1], self.translation[2]),
            UnitQuaternion::from_rotation_matrix(&rot),
        )
    }
}

/// Full decomposition of a camera-to-world transform, as reported for a
/// pose recovered from stored correspondences.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseComponents {
    pub translation: [f64; 3],
    /// XYZ Euler degrees.
    pub euler: [f64; 3],
    /// `[x, y, z, w]`.
    pub quaternion: [f64; 4],
    pub scale: [f64; 3],
}

impl PoseComponents {
    pub fn from_matrix(m: &Matrix4<f64>) -> Self {
        let upper: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let scale = Vector3::new(
            upper.column(0).norm(),
            upper.column(1).norm(),
            upper.column(2).norm(),
        );
        let mut r = upper;
        for c in 0..3 {
            if scale[c] > f64::EPSILON {
                r.column_mut(c).scale_mut(1.0 / scale[c]);
            }
        }
        let e = euler_xyz_from_matrix(&r);
        let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
        Self {
            translation: [m[(0, 3)], m[(1, 3)], m[(2, 3)]],
            euler: [e.x.to_degrees(), e.y.to_degrees(), e.z.to_degrees()],
            quaternion: [q.i, q.j, q.k, q.w],
            scale: [scale.x, scale.y, scale.z],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn euler_round_trip() {
        let e = Vector3::new(0.3, -0.7, 1.9);
        let back = euler_xyz_from_matrix(&matrix_from_euler_xyz(&e));
        assert_relative_eq!(back, e, epsilon = 1e-12);
    }

    #[test]
    fn euler_gimbal_lock_keeps_rotation() {
        let e = Vector3::new(0.4, std::f64::consts::FRAC_PI_2, 0.2);
        let m = matrix_from_euler_xyz(&e);
        let back = matrix_from_euler_xyz(&euler_xyz_from_matrix(&m));
        assert_relative_eq!(back, m, epsilon = 1e-6);
    }

    #[test]
    fn toggle_is_an_involution() {
        let r = matrix_from_euler_xyz(&Vector3::new(0.1, 0.2, 0.3));
        let once = toggle_y_up_y_down(&r);
        assert!((once - r).norm() > 1.0);
        assert_relative_eq!(toggle_y_up_y_down(&once), r, epsilon = 1e-15);
    }

    #[test]
    fn renderer_pose_places_camera_center() {
        let rvec = Vector3::new(0.2, -0.1, 0.05);
        let tvec = Vector3::new(0.5, -0.3, 4.0);
        let m = renderer_pose(&rvec, &tvec);
        let center = -(rodrigues(&rvec).transpose() * tvec);
        assert_relative_eq!(m[(0, 3)], center.x, epsilon = 1e-12);
        assert_relative_eq!(m[(1, 3)], center.y, epsilon = 1e-12);
        assert_relative_eq!(m[(2, 3)], center.z, epsilon = 1e-12);

        // The renderer camera looks down its local -Z.
        let forward_world = rodrigues(&rvec).transpose() * Vector3::z();
        let local_minus_z = m.fixed_view::<3, 3>(0, 0) * -Vector3::z();
        assert_relative_eq!(local_minus_z, forward_world, epsilon = 1e-12);
    }

    #[test]
    fn renderer_pose_matches_explicit_flip_then_invert() {
        let rvec = Vector3::new(-0.4, 0.3, 0.9);
        let tvec = Vector3::new(1.0, 2.0, 3.0);
        let r = rodrigues(&rvec);
        let mut t = Matrix4::identity();
        for c in 0..3 {
            t[(0, c)] = r[(0, c)];
            t[(1, c)] = -r[(1, c)];
            t[(2, c)] = -r[(2, c)];
        }
        t[(0, 3)] = tvec.x;
        t[(1, 3)] = -tvec.y;
        t[(2, 3)] = -tvec.z;
        let expected = t.try_inverse().unwrap();
        assert_relative_eq!(renderer_pose(&rvec, &tvec), expected, epsilon = 1e-12);
    }

    #[test]
    fn persisted_pose_round_trip() {
        let m = renderer_pose(&Vector3::new(0.3, 0.2, -0.1), &Vector3::new(0.0, 1.0, 6.0));
        let stored = PersistedPose::from_renderer(&m);
        assert_relative_eq!(stored.to_renderer(), m, epsilon = 1e-9);

        // The persisted rotation is the plain vision camera-to-world one.
        let iso = stored.to_isometry();
        let plain = camera_to_world(&Vector3::new(0.3, 0.2, -0.1), &Vector3::new(0.0, 1.0, 6.0));
        let p = Point3::new(0.1, 0.2, 0.3);
        let a = iso.transform_point(&p);
        let b = plain.transform_point(&p);
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }

    #[test]
    fn components_recover_scale_and_rotation() {
        let r = matrix_from_euler_xyz(&Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2));
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&(r * 2.0));
        m[(0, 3)] = 5.0;
        let c = PoseComponents::from_matrix(&m);
        assert_relative_eq!(c.scale[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(c.euler[2], 90.0, epsilon = 1e-9);
        assert_eq!(c.translation, [5.0, 0.0, 0.0]);
    }
}
