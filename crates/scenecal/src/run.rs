//! File-driven solves: a JSON list of named correspondences in, a JSON pose
//! and camera model out.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use scenecal_core::{
    CameraModel, FixMask, Intrinsics, PersistedPose, RgbImage, DEFAULT_FOV_DEG,
};
use scenecal_session::store::parse_slot;
use scenecal_session::{CalibrationConfig, ConfigError, UndistortPipeline};
use scenecal_solve::{
    calibrate_camera, select_method, solve_pnp, CalibrateError, PnpError, PnpMethod,
    MIN_INTRINSICS_POINTS,
};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("point name {0:?} is not of the form p<N>")]
    PointName(String),
    #[error("point {0} is listed twice")]
    DuplicatePoint(String),
    #[error("image size must be non-zero, got {0}x{1}")]
    ImageSize(u32, u32),
    #[error("invalid camera: {0}")]
    Camera(#[from] scenecal_core::CameraModelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pnp(#[from] PnpError),
    #[error(transparent)]
    Calibrate(#[from] CalibrateError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("image buffer does not match {0}x{1}")]
    Buffer(usize, usize),
}

/// One matched point: the same name marks it in the frame and in the scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub name: String,
    pub image: [f64; 2],
    pub scene: [f64; 3],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveInput {
    pub points: Vec<Correspondence>,
    /// Starting camera. Without one, a 70° diagonal FOV camera for
    /// `image_size` is assumed.
    #[serde(default)]
    pub camera: Option<CameraModel>,
    #[serde(default = "FixMask::all_fixed")]
    pub fix: FixMask,
    #[serde(default)]
    pub image_size: Option<[u32; 2]>,
    #[serde(default)]
    pub config: CalibrationConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    /// Point names in solve order.
    pub names: Vec<String>,
    pub method: PnpMethod,
    pub rms: f64,
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
    /// Camera placement as persisted with the camera record.
    pub pose: PersistedPose,
    pub camera: CameraModel,
    pub intrinsics_updated: bool,
}

impl SolveInput {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, RunError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn initial_camera(&self) -> Result<CameraModel, RunError> {
        if let Some(camera) = self.camera {
            camera.intrinsics.check()?;
            return Ok(camera);
        }
        match self.image_size {
            Some([w, h]) if w == 0 || h == 0 => Err(RunError::ImageSize(w, h)),
            Some([w, h]) => Ok(CameraModel::new(
                Intrinsics::from_diagonal_fov(DEFAULT_FOV_DEG, w, h)?,
                Default::default(),
            )),
            None => Ok(CameraModel::default()),
        }
    }

    /// Scene and image points ordered by slot number.
    fn ordered(&self) -> Result<(Vec<String>, Vec<Point3<f64>>, Vec<Point2<f64>>), RunError> {
        let mut by_slot = BTreeMap::new();
        for p in &self.points {
            let slot = parse_slot(&p.name).ok_or_else(|| RunError::PointName(p.name.clone()))?;
            if by_slot.insert(slot, p).is_some() {
                return Err(RunError::DuplicatePoint(p.name.clone()));
            }
        }
        let names = by_slot.values().map(|p| p.name.clone()).collect();
        let scene = by_slot
            .values()
            .map(|p| Point3::new(p.scene[0], p.scene[1], p.scene[2]))
            .collect();
        let image = by_slot
            .values()
            .map(|p| Point2::new(p.image[0], p.image[1]))
            .collect();
        Ok((names, scene, image))
    }
}

/// Solve the camera pose, and the intrinsics too when `with_intrinsics` is
/// set and enough points exist.
pub fn run_solve(input: &SolveInput, with_intrinsics: bool) -> Result<SolveReport, RunError> {
    input.config.validate()?;
    let initial = input.initial_camera()?;
    let (names, scene, image) = input.ordered()?;
    let eps = input.config.coplanar_epsilon;
    let opts = &input.config.solver;

    let (pose, camera, intrinsics_updated) =
        if with_intrinsics && scene.len() >= MIN_INTRINSICS_POINTS {
            let res = calibrate_camera(&scene, &image, &initial, &input.fix, eps, opts)?;
            if !res.converged {
                log::warn!("intrinsics solve stopped before converging");
            }
            let mut camera = initial;
            res.fix.merge_into(&mut camera, &res.model);
            (res.pose, camera, camera != initial)
        } else {
            if with_intrinsics {
                log::info!(
                    "{} points: intrinsics need {}, solving pose only",
                    scene.len(),
                    MIN_INTRINSICS_POINTS
                );
            }
            let method = select_method(&scene, eps);
            (solve_pnp(&scene, &image, &initial, method, opts)?, initial, false)
        };
    log::info!("solved {:?} pose, rms={:.4}px", pose.method, pose.rms);

    Ok(SolveReport {
        names,
        method: pose.method,
        rms: pose.rms,
        rvec: pose.rvec.into(),
        tvec: pose.tvec.into(),
        pose: pose.persisted_pose(),
        camera,
        intrinsics_updated,
    })
}

/// Undistort an image file with `camera`. Frames from a camera without
/// distortion are written back unchanged.
pub fn undistort_file(
    image_path: impl AsRef<Path>,
    camera: &CameraModel,
    out_path: impl AsRef<Path>,
) -> Result<(), RunError> {
    let rgb = image::open(image_path)?.to_rgb8();
    let (w, h) = rgb.dimensions();
    let (w, h) = (w as usize, h as usize);
    let frame = RgbImage::from_raw(w, h, rgb.into_raw()).ok_or(RunError::Buffer(w, h))?;
    let out = UndistortPipeline::new().undistort(&frame, camera);
    let buf = image::RgbImage::from_raw(out.width as u32, out.height as u32, out.data)
        .ok_or(RunError::Buffer(out.width, out.height))?;
    buf.save(out_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
    use scenecal_solve::project_points;

    fn scene() -> Vec<Point3<f64>> {
        vec![
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.0, -1.0, 0.2),
            Point3::new(1.0, 1.0, -0.1),
            Point3::new(-1.0, 1.0, 0.3),
            Point3::new(0.2, 0.4, 0.8),
            Point3::new(-0.5, 0.1, -0.6),
            Point3::new(0.7, -0.3, 0.5),
            Point3::new(-0.2, -0.8, 0.1),
        ]
    }

    fn input(n: usize) -> SolveInput {
        let truth = Isometry3::from_parts(
            Translation3::new(0.2, -0.1, 6.0),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.15, -0.2, 0.05)),
        );
        let model = CameraModel::default();
        let scene = &scene()[..n];
        let image = project_points(scene, &truth, &model).unwrap();
        let points = scene
            .iter()
            .zip(&image)
            .enumerate()
            .rev()
            .map(|(i, (s, p))| Correspondence {
                name: format!("p{i}"),
                image: [p.x, p.y],
                scene: [s.x, s.y, s.z],
            })
            .collect();
        SolveInput {
            points,
            camera: None,
            fix: FixMask::all_fixed(),
            image_size: None,
            config: CalibrationConfig::default(),
        }
    }

    #[test]
    fn orders_points_by_slot() {
        let report = run_solve(&input(5), false).unwrap();
        assert_eq!(report.names, ["p0", "p1", "p2", "p3", "p4"]);
        assert!(report.rms < 1e-6);
        assert!(!report.intrinsics_updated);
    }

    #[test]
    fn intrinsics_need_six_points() {
        let mut inp = input(5);
        inp.fix = FixMask::all_free();
        let report = run_solve(&inp, true).unwrap();
        assert_eq!(report.camera, CameraModel::default());
        assert!(!report.intrinsics_updated);
    }

    #[test]
    fn rejects_bad_and_duplicate_names() {
        let mut inp = input(4);
        inp.points[0].name = "corner".into();
        assert!(matches!(run_solve(&inp, false), Err(RunError::PointName(_))));

        let mut inp = input(4);
        inp.points[1].name = inp.points[0].name.clone();
        assert!(matches!(
            run_solve(&inp, false),
            Err(RunError::DuplicatePoint(_))
        ));
    }

    #[test]
    fn zero_image_size_is_rejected() {
        let mut inp = input(4);
        inp.image_size = Some([0, 480]);
        assert!(matches!(
            run_solve(&inp, false),
            Err(RunError::ImageSize(0, 480))
        ));
    }

    #[test]
    fn input_defaults_fill_missing_keys() {
        let inp: SolveInput = serde_json::from_str(
            r#"{"points":[{"name":"p0","image":[1,2],"scene":[0,0,0]}]}"#,
        )
        .unwrap();
        assert_eq!(inp.fix, FixMask::all_fixed());
        assert_eq!(inp.config, CalibrationConfig::default());
        assert!(inp.camera.is_none());
    }
}
