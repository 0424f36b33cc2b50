//! Small geometric predicates over scene points.

use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};

/// Triple-product threshold below which four points count as coplanar.
///
/// Absolute, in cubed scene units.
pub const MAX_COPLANAR_DETERMINANT: f64 = 0.1;

#[inline]
fn triple_product(p: &[Point3<f64>; 4]) -> f64 {
    let a = p[1] - p[0];
    let b = p[2] - p[0];
    let c = p[3] - p[0];
    Matrix3::from_columns(&[a, b, c]).determinant()
}

/// Coplanarity test used to pick a PnP method.
///
/// - 4 points: `|det| < epsilon` of the edge-vector triple product.
/// - 5 points: every 4-point subset (one point omitted) must pass.
/// - any other count: reported coplanar; no test is performed.
pub fn are_points_coplanar(points: &[Point3<f64>], epsilon: f64) -> bool {
    match points.len() {
        4 => triple_product(&[points[0], points[1], points[2], points[3]]).abs() < epsilon,
        5 => (0..5).all(|skip| {
            let mut quad = [Point3::origin(); 4];
            let mut k = 0;
            for (i, p) in points.iter().enumerate() {
                if i != skip {
                    quad[k] = *p;
                    k += 1;
                }
            }
            triple_product(&quad).abs() < epsilon
        }),
        _ => true,
    }
}

/// Centroid and unit normal of the least-squares plane through `points`,
/// with the ratio of the smallest to the middle covariance eigenvalue.
///
/// The ratio is close to zero for planar sets. Returns `None` for fewer than
/// three points.
pub fn best_fit_plane(points: &[Point3<f64>]) -> Option<(Point3<f64>, Vector3<f64>, f64)> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords)
        / n;
    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    let eig = SymmetricEigen::new(cov);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let smallest = eig.eigenvalues[order[0]].max(0.0);
    let middle = eig.eigenvalues[order[1]];
    let largest = eig.eigenvalues[order[2]];
    if largest <= f64::EPSILON || middle <= largest * 1e-12 {
        // All points on a line (or coincident).
        return None;
    }
    let normal = eig.eigenvectors.column(order[0]).normalize();
    Some((Point3::from(centroid), normal, smallest / middle))
}

/// True when all points lie (numerically) on one line.
pub fn are_points_collinear(points: &[Point3<f64>]) -> bool {
    best_fit_plane(points).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64, z: f64) -> Point3<f64> {
        Point3::new(x, y, z)
    }

    #[test]
    fn flat_quad_is_coplanar() {
        let quad = [p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(1.0, 1.0, 0.0), p(0.0, 1.0, 0.0)];
        assert!(are_points_coplanar(&quad, MAX_COPLANAR_DETERMINANT));
    }

    #[test]
    fn tetrahedron_is_not_coplanar() {
        let quad = [p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0), p(0.0, 0.0, 1.0)];
        assert!(!are_points_coplanar(&quad, MAX_COPLANAR_DETERMINANT));
    }

    #[test]
    fn threshold_is_absolute() {
        // Unit triple product scaled by 0.09 stays under the 0.1 threshold.
        let quad = [p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0), p(0.0, 0.0, 0.09)];
        assert!(are_points_coplanar(&quad, MAX_COPLANAR_DETERMINANT));
    }

    #[test]
    fn five_points_need_every_subset_flat() {
        let flat = [
            p(0.0, 0.0, 0.0),
            p(2.0, 0.0, 0.0),
            p(2.0, 2.0, 0.0),
            p(0.0, 2.0, 0.0),
            p(1.0, 1.0, 0.0),
        ];
        assert!(are_points_coplanar(&flat, MAX_COPLANAR_DETERMINANT));

        let mut lifted = flat;
        lifted[4].z = 1.0;
        assert!(!are_points_coplanar(&lifted, MAX_COPLANAR_DETERMINANT));
    }

    #[test]
    fn other_counts_report_coplanar() {
        let three = [p(0.0, 0.0, 0.0), p(1.0, 0.0, 5.0), p(0.0, 1.0, -5.0)];
        assert!(are_points_coplanar(&three, MAX_COPLANAR_DETERMINANT));
        let six: Vec<_> = (0..6).map(|i| p(i as f64, (i * i) as f64, (i * i * i) as f64)).collect();
        assert!(are_points_coplanar(&six, MAX_COPLANAR_DETERMINANT));
    }

    #[test]
    fn plane_fit_finds_normal() {
        let pts = [p(0.0, 0.0, 2.0), p(1.0, 0.0, 2.0), p(0.0, 1.0, 2.0), p(3.0, 4.0, 2.0)];
        let (c, n, ratio) = best_fit_plane(&pts).unwrap();
        assert!((c.z - 2.0).abs() < 1e-12);
        assert!((n.z.abs() - 1.0).abs() < 1e-9);
        assert!(ratio < 1e-12);
        assert!(are_points_collinear(&[p(0.0, 0.0, 0.0), p(1.0, 1.0, 1.0), p(2.0, 2.0, 2.0)]));
    }
}
