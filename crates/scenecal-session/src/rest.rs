//! Persistence records and the intrinsics compute endpoint.
//!
//! Both sit behind traits so the session can run against a live REST API,
//! an in-process solver, or test doubles.

use std::future::Future;

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use scenecal_core::{CameraModel, Distortion, FixMask, Intrinsics, PersistedPose};
use scenecal_solve::{calibrate_camera, CalibrateError, LmOptions};

use crate::transform_data::{TransformData, POINT_CORRESPONDENCE};

/// REST API root.
pub const API_BASE: &str = "/api/v1";

/// Camera as stored by the scene database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
    pub translation: [f64; 3],
    /// XYZ Euler degrees, Y-down.
    pub rotation: [f64; 3],
    pub intrinsics: Intrinsics,
    /// `[k1, k2, p1, p2, k3]`.
    pub distortion: [f64; 5],
    #[serde(default)]
    pub transforms: Vec<f64>,
    #[serde(default)]
    pub transform_type: String,
}

impl CameraRecord {
    pub fn pose(&self) -> PersistedPose {
        PersistedPose {
            translation: self.translation,
            rotation: self.rotation,
        }
    }

    pub fn model(&self) -> CameraModel {
        CameraModel::new(
            self.intrinsics,
            Distortion::new(
                self.distortion[0],
                self.distortion[1],
                self.distortion[2],
                self.distortion[3],
                self.distortion[4],
            ),
        )
    }

    pub fn has_correspondences(&self) -> bool {
        self.transform_type == POINT_CORRESPONDENCE
    }

    pub fn set_correspondences(&mut self, data: &TransformData) {
        self.transforms = data.to_values();
        self.transform_type = POINT_CORRESPONDENCE.to_string();
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// HTTP 400, in practice a duplicate camera name.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("request failed with status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// Operator-facing text; `updating` selects the wording for an existing
    /// camera.
    pub fn notice(&self, updating: bool) -> String {
        match self {
            Self::Rejected(_) => {
                "Something went wrong. Please make sure the camera name you entered is unique."
                    .to_string()
            }
            _ if updating => {
                "Something went wrong. Failed to update camera setting. Please try again!"
                    .to_string()
            }
            _ => "Something went wrong. Failed to save camera setting. Please try again!"
                .to_string(),
        }
    }
}

/// Camera persistence (`/api/v1/camera`).
pub trait CameraStore {
    /// Store a camera without a uid. Resolves to the assigned uid.
    fn create_camera(
        &self,
        record: &CameraRecord,
    ) -> impl Future<Output = Result<String, StoreError>>;

    fn update_camera(
        &self,
        uid: &str,
        record: &CameraRecord,
    ) -> impl Future<Output = Result<(), StoreError>>;
}

/// Body of `POST /calculateintrinsics`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateIntrinsicsRequest {
    pub cam_points: Vec<[f64; 2]>,
    pub map_points: Vec<[f64; 3]>,
    #[serde(default)]
    pub fix_intrinsics: FixMask,
    /// Row-major 3x3 camera matrix.
    pub intrinsics: [[f64; 3]; 3],
    pub distortion: Vec<f64>,
    pub image_size: [u32; 2],
}

impl CalculateIntrinsicsRequest {
    pub fn new(
        scene: &[Point3<f64>],
        image: &[Point2<f64>],
        model: &CameraModel,
        fix: FixMask,
        image_size: (u32, u32),
    ) -> Self {
        Self {
            cam_points: image.iter().map(|p| [p.x, p.y]).collect(),
            map_points: scene.iter().map(|p| [p.x, p.y, p.z]).collect(),
            fix_intrinsics: fix,
            intrinsics: model.intrinsics.to_rows(),
            distortion: model.distortion.to_array().to_vec(),
            image_size: [image_size.0, image_size.1],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculateIntrinsicsResponse {
    pub mtx: [[f64; 3]; 3],
    pub dist: [f64; 5],
    /// XYZ Euler degrees of the camera-to-world rotation, Y-down.
    pub euler: [f64; 3],
    pub position: [f64; 3],
}

impl CalculateIntrinsicsResponse {
    pub fn model(&self) -> CameraModel {
        let d = self.dist;
        CameraModel::new(
            Intrinsics::from_rows(&self.mtx),
            Distortion::new(d[0], d[1], d[2], d[3], d[4]),
        )
    }

    pub fn pose(&self) -> PersistedPose {
        PersistedPose {
            translation: self.position,
            rotation: self.euler,
        }
    }
}

/// `{"error": "..."}` body of a rejected request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("{}", .0.error)]
    Rejected(ErrorPayload),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ServiceError {
    fn rejected(msg: &str) -> Self {
        Self::Rejected(ErrorPayload {
            error: msg.to_string(),
        })
    }
}

pub const INVALID_POINT_COUNT: &str = "Invalid number of points provided for calculation.";
pub const INVALID_VALUES: &str = "Invalid values provided for calculation";

/// `POST /calculateintrinsics`.
pub trait IntrinsicsService {
    fn calculate_intrinsics(
        &self,
        request: &CalculateIntrinsicsRequest,
    ) -> impl Future<Output = Result<CalculateIntrinsicsResponse, ServiceError>>;
}

/// The compute endpoint run in-process.
#[derive(Clone, Debug)]
pub struct LocalIntrinsicsService {
    pub coplanar_epsilon: f64,
    pub options: LmOptions,
}

impl LocalIntrinsicsService {
    pub fn new(coplanar_epsilon: f64, options: LmOptions) -> Self {
        Self {
            coplanar_epsilon,
            options,
        }
    }

    pub fn solve(
        &self,
        request: &CalculateIntrinsicsRequest,
    ) -> Result<CalculateIntrinsicsResponse, ServiceError> {
        let n = request.map_points.len();
        if n != request.cam_points.len() || n < 4 {
            return Err(ServiceError::rejected(INVALID_POINT_COUNT));
        }
        if request.image_size.contains(&0) {
            return Err(ServiceError::rejected(INVALID_VALUES));
        }
        let scene: Vec<_> = request
            .map_points
            .iter()
            .map(|p| Point3::new(p[0], p[1], p[2]))
            .collect();
        let image: Vec<_> = request
            .cam_points
            .iter()
            .map(|p| Point2::new(p[0], p[1]))
            .collect();
        let initial = CameraModel::new(
            Intrinsics::from_rows(&request.intrinsics),
            Distortion::from_slice(&request.distortion)
                .map_err(|_| ServiceError::rejected(INVALID_VALUES))?,
        );
        if initial.intrinsics.check().is_err() {
            return Err(ServiceError::rejected(INVALID_VALUES));
        }

        let result = calibrate_camera(
            &scene,
            &image,
            &initial,
            &request.fix_intrinsics,
            self.coplanar_epsilon,
            &self.options,
        )
        .map_err(|e: CalibrateError| {
            log::error!("calculate intrinsics: {e}");
            ServiceError::rejected(INVALID_VALUES)
        })?;

        let pose = result.pose.persisted_pose();
        Ok(CalculateIntrinsicsResponse {
            mtx: result.model.intrinsics.to_rows(),
            dist: result.model.distortion.to_array(),
            euler: pose.rotation,
            position: pose.translation,
        })
    }
}

impl IntrinsicsService for LocalIntrinsicsService {
    async fn calculate_intrinsics(
        &self,
        request: &CalculateIntrinsicsRequest,
    ) -> Result<CalculateIntrinsicsResponse, ServiceError> {
        self.solve(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
    use scenecal_core::MAX_COPLANAR_DETERMINANT;
    use scenecal_solve::project_points;

    fn scene() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(4.0, 3.0, 0.0),
            Point3::new(0.0, 3.0, 0.0),
            Point3::new(2.0, 1.5, 1.2),
            Point3::new(1.0, 2.0, 0.6),
            Point3::new(3.0, 0.5, 0.9),
            Point3::new(0.5, 0.5, 1.5),
        ]
    }

    fn truth() -> (CameraModel, Isometry3<f64>) {
        let model = CameraModel::new(
            Intrinsics::new(900.0, 900.0, 640.0, 360.0),
            Distortion::default(),
        );
        let pose = Isometry3::from_parts(
            Translation3::new(-2.0, -1.0, 8.0),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.2, -0.1, 0.05)),
        );
        (model, pose)
    }

    fn request(fix: FixMask, guess: &CameraModel) -> CalculateIntrinsicsRequest {
        let (model, pose) = truth();
        let scene = scene();
        let image = project_points(&scene, &pose, &model).unwrap();
        CalculateIntrinsicsRequest::new(&scene, &image, guess, fix, (1280, 720))
    }

    #[test]
    fn request_uses_wire_names() {
        let (model, _) = truth();
        let v = serde_json::to_value(request(FixMask::all_fixed(), &model)).unwrap();
        let keys = [
            "camPoints",
            "mapPoints",
            "fixIntrinsics",
            "intrinsics",
            "distortion",
            "imageSize",
        ];
        for key in keys {
            assert!(v.get(key).is_some(), "{key}");
        }
        assert_eq!(v["intrinsics"][0][0], 900.0);
        assert_eq!(v["imageSize"][1], 720);
    }

    #[test]
    fn missing_fix_keys_count_as_fixed() {
        let (model, _) = truth();
        let mut v = serde_json::to_value(request(FixMask::all_free(), &model)).unwrap();
        v["fixIntrinsics"] = serde_json::json!({"fx": false});
        let req: CalculateIntrinsicsRequest = serde_json::from_value(v).unwrap();
        assert!(!req.fix_intrinsics.fx);
        assert!(req.fix_intrinsics.fy && req.fix_intrinsics.k1);
    }

    #[test]
    fn local_service_recovers_focal_length() {
        let (model, pose) = truth();
        let mut guess = model;
        guess.intrinsics.fx = 1000.0;
        guess.intrinsics.fy = 1000.0;
        let fix = FixMask::all_fixed()
            .with_fixed(scenecal_core::CameraParam::Fx, false)
            .with_fixed(scenecal_core::CameraParam::Fy, false);
        let svc = LocalIntrinsicsService::new(MAX_COPLANAR_DETERMINANT, LmOptions::default());
        let resp = svc.solve(&request(fix, &guess)).unwrap();
        assert!((resp.mtx[0][0] - 900.0).abs() < 1e-3);
        assert!((resp.mtx[1][1] - 900.0).abs() < 1e-3);
        assert_eq!(resp.mtx[0][2], 640.0);
        assert_eq!(resp.dist, [0.0; 5]);

        let center = pose.inverse().translation.vector;
        for i in 0..3 {
            assert!((resp.position[i] - center[i]).abs() < 1e-4);
        }
        let expected = PersistedPose::from_renderer(&scenecal_core::renderer_pose(
            &pose.rotation.scaled_axis(),
            &pose.translation.vector,
        ));
        for i in 0..3 {
            assert!((resp.euler[i] - expected.rotation[i]).abs() < 1e-3);
        }
    }

    #[test]
    fn local_service_rejects_bad_counts() {
        let (model, _) = truth();
        let svc = LocalIntrinsicsService::new(MAX_COPLANAR_DETERMINANT, LmOptions::default());
        let mut req = request(FixMask::all_fixed(), &model);
        req.cam_points.pop();
        assert_eq!(
            svc.solve(&req),
            Err(ServiceError::Rejected(ErrorPayload {
                error: INVALID_POINT_COUNT.into()
            }))
        );

        let mut req = request(FixMask::all_fixed(), &model);
        req.cam_points.truncate(3);
        req.map_points.truncate(3);
        assert!(matches!(svc.solve(&req), Err(ServiceError::Rejected(_))));

        let mut req = request(FixMask::all_fixed(), &model);
        req.distortion = vec![0.0; 3];
        assert_eq!(svc.solve(&req).unwrap_err().to_string(), INVALID_VALUES);
    }

    #[test]
    fn record_round_trips_model_and_pose() {
        let (model, _) = truth();
        let mut rec = CameraRecord {
            uid: Some("u1".into()),
            name: "lobby".into(),
            scene: None,
            translation: [1.0, 2.0, 3.0],
            rotation: [10.0, 20.0, 30.0],
            intrinsics: model.intrinsics,
            distortion: [0.1, 0.0, 0.0, 0.0, 0.0],
            transforms: Vec::new(),
            transform_type: "euler".into(),
        };
        assert!(!rec.has_correspondences());
        assert_eq!(rec.model().distortion.k1, 0.1);
        assert_eq!(rec.pose().rotation, [10.0, 20.0, 30.0]);

        let data = TransformData::new(
            vec![Point2::new(1.0, 2.0); 4],
            vec![Point3::new(0.0, 0.0, 0.0); 4],
        )
        .unwrap();
        rec.set_correspondences(&data);
        assert!(rec.has_correspondences());
        assert_eq!(rec.transforms.len(), 20);

        let json = serde_json::to_string(&rec).unwrap();
        let back: CameraRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn store_error_notices() {
        assert!(StoreError::Rejected("dup".into()).notice(true).contains("unique"));
        assert!(StoreError::Status(500).notice(true).contains("update"));
        assert!(StoreError::Transport("x".into()).notice(false).contains("save"));
    }
}
