//! SQPnP: global minimum of the squared algebraic projection error over
//! rotations.
//!
//! With `r = vec(R)` (row-major) the translation is eliminated in closed
//! form (`t = P r`), leaving `min r^T Ω r` subject to `R` being a rotation.
//! Every eigenvector of `Ω` (both signs) seeds a sequential quadratic
//! programming run on the orthonormality constraints; the lowest-cost seed
//! that keeps all points in front of the camera wins.

use nalgebra::{
    DMatrix, DVector, Isometry3, Matrix3, Point2, Point3, SMatrix, SVector, SymmetricEigen,
    Vector3,
};

use super::planar::{iso_from, nearest_rotation};
use crate::error::PnpError;

type Mat39 = SMatrix<f64, 3, 9>;
type Mat99 = SMatrix<f64, 9, 9>;
type Vec9 = SVector<f64, 9>;

const MAX_SQP_ITERS: usize = 15;
const SQP_STEP_TOL: f64 = 1e-10;

/// `R * m` written as `A * vec(R)`.
fn lift(m: &Point3<f64>) -> Mat39 {
    let mut a = Mat39::zeros();
    for r in 0..3 {
        for k in 0..3 {
            a[(r, 3 * r + k)] = m[k];
        }
    }
    a
}

fn to_vec9(r: &Matrix3<f64>) -> Vec9 {
    Vec9::from_fn(|i, _| r[(i / 3, i % 3)])
}

fn to_mat3(r: &Vec9) -> Matrix3<f64> {
    Matrix3::from_fn(|i, j| r[3 * i + j])
}

/// Row orthonormality residuals and their Jacobian.
fn constraints(r: &Vec9) -> (SVector<f64, 6>, SMatrix<f64, 6, 9>) {
    let r1 = r.fixed_rows::<3>(0);
    let r2 = r.fixed_rows::<3>(3);
    let r3 = r.fixed_rows::<3>(6);
    let h = SVector::<f64, 6>::from([
        r1.dot(&r1) - 1.0,
        r2.dot(&r2) - 1.0,
        r3.dot(&r3) - 1.0,
        r1.dot(&r2),
        r1.dot(&r3),
        r2.dot(&r3),
    ]);
    let mut jac = SMatrix::<f64, 6, 9>::zeros();
    for k in 0..3 {
        jac[(0, k)] = 2.0 * r1[k];
        jac[(1, 3 + k)] = 2.0 * r2[k];
        jac[(2, 6 + k)] = 2.0 * r3[k];
        jac[(3, k)] = r2[k];
        jac[(3, 3 + k)] = r1[k];
        jac[(4, k)] = r3[k];
        jac[(4, 6 + k)] = r1[k];
        jac[(5, 3 + k)] = r3[k];
        jac[(5, 6 + k)] = r2[k];
    }
    (h, jac)
}

/// SQP iterations from `start`, finished by projection onto SO(3).
fn sqp(omega: &Mat99, start: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let mut r = to_vec9(start);
    for _ in 0..MAX_SQP_ITERS {
        let (h, jac) = constraints(&r);
        let mut kkt = DMatrix::<f64>::zeros(15, 15);
        kkt.view_mut((0, 0), (9, 9)).copy_from(omega);
        kkt.view_mut((0, 9), (9, 6)).copy_from(&jac.transpose());
        kkt.view_mut((9, 0), (6, 9)).copy_from(&jac);

        let mut rhs = DVector::<f64>::zeros(15);
        rhs.rows_mut(0, 9).copy_from(&(-(omega * r)));
        rhs.rows_mut(9, 6).copy_from(&(-h));

        let sol = kkt.lu().solve(&rhs)?;
        let delta = Vec9::from_fn(|i, _| sol[i]);
        r += delta;
        if delta.norm() < SQP_STEP_TOL {
            break;
        }
    }
    nearest_rotation(&to_mat3(&r))
}

pub(super) fn solve(
    scene: &[Point3<f64>],
    normalized: &[Point2<f64>],
) -> Result<Isometry3<f64>, PnpError> {
    let n = scene.len();
    if n < 3 || normalized.len() != n {
        return Err(PnpError::TooFewPoints { needed: 3, got: n });
    }

    let mut qs = Vec::with_capacity(n);
    let mut lifts = Vec::with_capacity(n);
    let mut sum_q = Matrix3::zeros();
    let mut sum_qa = Mat39::zeros();
    for (m, x) in scene.iter().zip(normalized) {
        let (u, v) = (x.x, x.y);
        #[rustfmt::skip]
        let q = Matrix3::new(
            1.0, 0.0, -u,
            0.0, 1.0, -v,
            -u, -v, u * u + v * v,
        );
        let a = lift(m);
        sum_q += q;
        sum_qa += q * a;
        qs.push(q);
        lifts.push(a);
    }

    let p: Mat39 = -(sum_q.try_inverse().ok_or(PnpError::Degenerate)? * sum_qa);
    let mut omega = Mat99::zeros();
    for (q, a) in qs.iter().zip(&lifts) {
        let b = a + p;
        omega += b.transpose() * q * b;
    }
    // Symmetrize against round-off before the eigen solve.
    let omega = (omega + omega.transpose()) * 0.5;

    let eig = SymmetricEigen::new(omega);
    let mut best: Option<(f64, Matrix3<f64>, Vector3<f64>)> = None;
    for i in 0..9 {
        let e = eig.eigenvectors.column(i).into_owned();
        for sign in [1.0, -1.0] {
            let Some(start) = nearest_rotation(&(to_mat3(&e) * (sign * 3f64.sqrt()))) else {
                continue;
            };
            let Some(rot) = sqp(&omega, &start) else {
                continue;
            };
            let r = to_vec9(&rot);
            let t = p * r;
            let in_front = scene.iter().all(|m| (rot * m.coords + t).z > 0.0);
            if !in_front {
                continue;
            }
            let cost = (r.transpose() * omega * r)[(0, 0)];
            if best.as_ref().is_none_or(|(c, _, _)| cost < *c) {
                best = Some((cost, rot, t));
            }
        }
    }

    let (cost, rot, t) = best.ok_or(PnpError::Degenerate)?;
    log::debug!("sqpnp: n={} cost={:.3e}", n, cost);
    Ok(iso_from(rot, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pnp::test_support::*;

    fn normalized(scene: &[Point3<f64>], pose: &Isometry3<f64>) -> Vec<Point2<f64>> {
        let m = model();
        project(scene, pose, &m)
            .into_iter()
            .map(|p| m.pixel_to_normalized(p))
            .collect()
    }

    #[test]
    fn lift_matches_matrix_product() {
        let r = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        let m = Point3::new(0.5, -1.0, 2.0);
        assert!((lift(&m) * to_vec9(&r) - r * m.coords).norm() < 1e-12);
    }

    #[test]
    fn recovers_minimal_and_overdetermined_sets() {
        let gt = ground_truth();
        for n in [4, 5, 8] {
            let scene = &cloud()[..n];
            let pose = solve(scene, &normalized(scene, &gt)).unwrap();
            assert_pose_close(&pose, &gt, 1e-6);
        }
    }

    #[test]
    fn handles_planar_sets() {
        let gt = ground_truth();
        let scene = vec![
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(-1.0, 1.0, 0.0),
            Point3::new(0.3, 0.2, 0.0),
        ];
        let pose = solve(&scene, &normalized(&scene, &gt)).unwrap();
        assert_pose_close(&pose, &gt, 1e-6);
    }
}
