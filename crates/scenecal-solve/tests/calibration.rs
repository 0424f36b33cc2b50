use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use scenecal_core::{
    CameraModel, CameraParam, Distortion, FixMask, Intrinsics, MAX_COPLANAR_DETERMINANT,
};
use scenecal_solve::{
    calibrate_camera, project_points, select_method, solve_pnp, LmOptions, PnpMethod,
};

fn truth_model() -> CameraModel {
    CameraModel::new(
        Intrinsics::new(1100.0, 1100.0, 960.0, 540.0),
        Distortion::new(-0.12, 0.04, 0.0, 0.0, 0.0),
    )
}

fn truth_pose() -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(-0.4, 0.6, 9.0),
        UnitQuaternion::from_scaled_axis(Vector3::new(-0.35, 0.2, 0.05)),
    )
}

/// A room-corner layout: floor points plus points on two walls.
fn room_points() -> Vec<Point3<f64>> {
    let mut pts = Vec::new();
    for (x, y) in [(-3.0, -2.0), (3.0, -2.0), (3.0, 2.0), (-3.0, 2.0), (0.0, 0.0)] {
        pts.push(Point3::new(x, y, 0.0));
    }
    for (y, z) in [(-2.0, 1.5), (2.0, 1.5), (0.0, 2.5)] {
        pts.push(Point3::new(-3.0, y, z));
    }
    for (x, z) in [(-1.5, 1.0), (1.5, 1.0), (2.5, 2.5), (0.0, 2.0)] {
        pts.push(Point3::new(x, 2.0, z));
    }
    pts
}

fn observe(scene: &[Point3<f64>]) -> Vec<Point2<f64>> {
    project_points(scene, &truth_pose(), &truth_model()).expect("visible")
}

#[test]
fn room_layout_calibrates_focal_and_radial_terms() {
    let scene = room_points();
    let image = observe(&scene);

    let mut guess = truth_model();
    guess.intrinsics.fx = 1000.0;
    guess.intrinsics.fy = 1000.0;
    guess.distortion = Distortion::default();

    let mask = FixMask::all_fixed()
        .with_fixed(CameraParam::Fx, false)
        .with_fixed(CameraParam::Fy, false)
        .with_fixed(CameraParam::K1, false)
        .with_fixed(CameraParam::K2, false);
    let res = calibrate_camera(
        &scene,
        &image,
        &guess,
        &mask,
        MAX_COPLANAR_DETERMINANT,
        &LmOptions::default(),
    )
    .expect("calibration succeeds");

    assert!(res.pose.rms < 1e-3, "rms {}", res.pose.rms);
    assert!((res.model.intrinsics.fx - 1100.0).abs() < 1.0, "{:?}", res.model);
    assert!((res.model.distortion.k1 + 0.12).abs() < 1e-2, "{:?}", res.model);
    // Fixed fields are untouched.
    assert_eq!(res.model.intrinsics.cx, 960.0);
    assert_eq!(res.model.distortion.p1, 0.0);
}

#[test]
fn pose_only_solve_is_exact_with_known_model() {
    let scene = room_points();
    let image = observe(&scene);
    let method = select_method(&scene, MAX_COPLANAR_DETERMINANT);
    assert_eq!(method, PnpMethod::Iterative);
    let sol = solve_pnp(&scene, &image, &truth_model(), method, &LmOptions::default()).unwrap();
    let est = sol.world_to_camera();
    assert!((est.translation.vector - truth_pose().translation.vector).norm() < 1e-6);
    assert!(est.rotation.angle_to(&truth_pose().rotation) < 1e-6);
}

#[test]
fn solve_leaves_no_state_behind() {
    let scene = room_points();
    let image = observe(&scene);
    let a = solve_pnp(&scene, &image, &truth_model(), PnpMethod::Iterative, &LmOptions::default());
    let b = solve_pnp(&scene, &image, &truth_model(), PnpMethod::Iterative, &LmOptions::default());
    assert_eq!(a, b);
}
