//! Pose of a planar point set from the plane-induced homography.

use nalgebra::{Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion};
use scenecal_core::{best_fit_plane, estimate_homography};

use crate::error::PnpError;

/// Smallest-to-middle covariance eigenvalue ratio below which a set is
/// treated as planar.
const PLANAR_RATIO: f64 = 1e-3;

pub(super) fn is_planar(scene: &[Point3<f64>]) -> bool {
    best_fit_plane(scene).is_some_and(|(_, _, ratio)| ratio < PLANAR_RATIO)
}

/// Nearest rotation to `m` (polar decomposition), determinant +1.
pub(super) fn nearest_rotation(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        return Some(u_flipped * v_t);
    }
    Some(r)
}

pub(super) fn iso_from(r: Matrix3<f64>, t: nalgebra::Vector3<f64>) -> Isometry3<f64> {
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Isometry3::from_parts(Translation3::from(t), rot)
}

/// `normalized` are undistorted points on the `z = 1` plane.
pub(super) fn solve(
    scene: &[Point3<f64>],
    normalized: &[Point2<f64>],
) -> Result<Isometry3<f64>, PnpError> {
    let (centroid, normal, _) = best_fit_plane(scene).ok_or(PnpError::Degenerate)?;

    // Right-handed in-plane frame B = [e1 e2 n].
    let seed = if normal.x.abs() < 0.9 {
        nalgebra::Vector3::x()
    } else {
        nalgebra::Vector3::y()
    };
    let e1 = (seed - normal * normal.dot(&seed)).normalize();
    let e2 = normal.cross(&e1);
    let b = Matrix3::from_columns(&[e1, e2, normal]);

    let plane: Vec<Point2<f64>> = scene
        .iter()
        .map(|p| {
            let d = p - centroid;
            Point2::new(d.dot(&e1), d.dot(&e2))
        })
        .collect();

    let h = estimate_homography(&plane, normalized).ok_or(PnpError::Degenerate)?.h;

    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();
    let denom = (h1.norm() + h2.norm()) * 0.5;
    if denom <= 1e-12 {
        return Err(PnpError::Degenerate);
    }
    let lambda = 1.0 / denom;
    let (mut r1, mut r2, mut t) = (h1 * lambda, h2 * lambda, h3 * lambda);
    // The plane origin is in front of the camera.
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return Err(PnpError::Degenerate);
    }
    let r_plane = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r3]))
        .ok_or(PnpError::Degenerate)?;

    // X_cam = R_p * B^T * (X - c) + t
    let r = r_plane * b.transpose();
    let t = t - r * centroid.coords;
    Ok(iso_from(r, t))
}
