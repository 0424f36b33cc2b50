//! Normalized DLT for non-planar sets.

use nalgebra::{DMatrix, Isometry3, Matrix3, Matrix3x4, Matrix4, Point2, Point3};

use super::planar::{iso_from, nearest_rotation};
use crate::error::PnpError;

pub(super) const MIN_DLT_POINTS: usize = 6;

/// `normalized` are undistorted points on the `z = 1` plane.
pub(super) fn solve(
    scene: &[Point3<f64>],
    normalized: &[Point2<f64>],
) -> Result<Isometry3<f64>, PnpError> {
    let n = scene.len();
    if n < MIN_DLT_POINTS {
        return Err(PnpError::TooFewPoints {
            needed: MIN_DLT_POINTS,
            got: n,
        });
    }

    let centroid = scene
        .iter()
        .fold(nalgebra::Vector3::zeros(), |acc, p| acc + p.coords)
        / n as f64;
    let mean_dist = scene.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / n as f64;
    if mean_dist <= f64::EPSILON {
        return Err(PnpError::Degenerate);
    }
    let s = 3f64.sqrt() / mean_dist;
    #[rustfmt::skip]
    let t_world = Matrix4::new(
        s, 0.0, 0.0, -s * centroid.x,
        0.0, s, 0.0, -s * centroid.y,
        0.0, 0.0, s, -s * centroid.z,
        0.0, 0.0, 0.0, 1.0,
    );

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (pw, pi)) in scene.iter().zip(normalized).enumerate() {
        let x = (pw.coords - centroid) * s;
        let (u, v) = (pi.x, pi.y);
        let (r0, r1) = (2 * i, 2 * i + 1);
        for k in 0..3 {
            a[(r0, k)] = x[k];
            a[(r0, 8 + k)] = -u * x[k];
            a[(r1, 4 + k)] = x[k];
            a[(r1, 8 + k)] = -v * x[k];
        }
        a[(r0, 3)] = 1.0;
        a[(r0, 11)] = -u;
        a[(r1, 7)] = 1.0;
        a[(r1, 11)] = -v;
    }

    // 2n >= 12 rows, so the full V^T is available.
    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(PnpError::Degenerate)?;
    let (imin, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))
        .ok_or(PnpError::Degenerate)?;
    let p = v_t.row(imin);
    let p_norm = Matrix3x4::from_fn(|r, c| p[r * 4 + c]);
    let p_mtx = p_norm * t_world;

    let m: Matrix3<f64> = p_mtx.fixed_view::<3, 3>(0, 0).into_owned();
    let mut scale = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
    if scale <= 1e-12 {
        return Err(PnpError::Degenerate);
    }
    if m.determinant() < 0.0 {
        scale = -scale;
    }
    let r = nearest_rotation(&(m / scale)).ok_or(PnpError::Degenerate)?;
    let t = p_mtx.column(3) / scale;

    let pose = iso_from(r, t);
    let in_front = scene
        .iter()
        .filter(|p| pose.transform_point(p).z > 0.0)
        .count();
    if in_front < n {
        return Err(PnpError::Degenerate);
    }
    Ok(pose)
}
