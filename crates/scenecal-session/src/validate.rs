//! Readiness checks run before any solve.

use nalgebra::Point3;

use scenecal_core::are_points_coplanar;

use crate::store::PointStore;

/// Names present in both views needed before a calibration can be saved or
/// solved.
pub const MIN_MATCHED_POINTS: usize = 4;

/// Number of names present in both views.
pub fn matched_count(camera: &PointStore, scene: &PointStore) -> usize {
    camera.iter().filter(|p| scene.contains(&p.name)).count()
}

/// Both views hold exactly the same set of names.
pub fn names_match(camera: &PointStore, scene: &PointStore) -> bool {
    camera.len() == scene.len() && camera.slots().eq(scene.slots())
}

/// `false` while a point is being dragged; otherwise at least four shared
/// names and equal counts on both sides.
///
/// Equal counts with four shared names does not mean the name sets are
/// identical (`p0..p4` vs `p0..p3, p7` passes). Pair with [`names_match`]
/// before pairing points by name; `CalibrationSession::solve` checks both
/// and reports a mismatch as `SessionError::NamesMismatch`.
pub fn is_calibration_ready(camera: &PointStore, scene: &PointStore, dragging: bool) -> bool {
    !dragging
        && camera.len() == scene.len()
        && matched_count(camera, scene) >= MIN_MATCHED_POINTS
}

/// Coplanarity of the scene points, with the absolute determinant
/// threshold from the session config.
pub fn is_coplanar(points: &[Point3<f64>], epsilon: f64) -> bool {
    are_points_coplanar(points, epsilon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::View;

    fn filled(view: View, n: usize) -> PointStore {
        let mut s = PointStore::new(view, 50);
        for i in 0..n {
            s.add_point(Point3::new(i as f64, (i * i) as f64, 0.0));
        }
        s
    }

    #[test]
    fn ready_needs_four_matching_names() {
        let cam = filled(View::Camera, 3);
        let scene = filled(View::Scene, 3);
        assert!(!is_calibration_ready(&cam, &scene, false));

        let cam = filled(View::Camera, 4);
        let scene = filled(View::Scene, 4);
        assert!(is_calibration_ready(&cam, &scene, false));
    }

    #[test]
    fn dragging_blocks_readiness() {
        let cam = filled(View::Camera, 6);
        let scene = filled(View::Scene, 6);
        assert!(!is_calibration_ready(&cam, &scene, true));
    }

    #[test]
    fn unequal_counts_are_not_ready() {
        let cam = filled(View::Camera, 5);
        let scene = filled(View::Scene, 4);
        assert!(!is_calibration_ready(&cam, &scene, false));
    }

    #[test]
    fn equal_counts_with_different_names() {
        let mut cam = filled(View::Camera, 5);
        let mut scene = filled(View::Scene, 5);
        cam.remove_point("p0");
        scene.remove_point("p4");
        // p1..p3 shared, four on each side.
        assert_eq!(matched_count(&cam, &scene), 3);
        assert!(!is_calibration_ready(&cam, &scene, false));
        assert!(!names_match(&cam, &scene));

        let mut cam = filled(View::Camera, 6);
        let mut scene = filled(View::Scene, 6);
        cam.remove_point("p0");
        scene.remove_point("p5");
        // Readiness alone passes; the name-set check catches it.
        assert!(is_calibration_ready(&cam, &scene, false));
        assert!(!names_match(&cam, &scene));
    }
}
