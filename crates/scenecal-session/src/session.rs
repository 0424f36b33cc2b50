//! The calibration session controller.
//!
//! One [`CalibrationSession`] owns everything an interactive calibration of
//! a single camera needs: both point views, the drag and projection flags,
//! the camera being calibrated and the handles shared with network
//! handlers.

use nalgebra::{Matrix4, Point3};

use scenecal_core::{CameraModel, Distortion, FixMask, Intrinsics};
use scenecal_solve::{
    calibrate_camera, quick_image_points, select_method, solve_pnp, solve_quick_pose,
    PnpError, PnpSolution, MIN_INTRINSICS_POINTS, QUICK_CALIB_POINTS,
};

use crate::config::{CalibrationConfig, Topics};
use crate::entity::CameraEntity;
use crate::error::SessionError;
use crate::feedback::{EchoTracker, Mailbox};
use crate::messages::{
    is_autocalibration_running, AutocalibrationPose, CameraCommand, CameraTelemetry, Publisher,
    Qos, SceneStatus, UpdateCamera, REGISTER,
};
use crate::projection::{ProjectionSink, UndistortPipeline};
use crate::rest::{CalculateIntrinsicsRequest, CalculateIntrinsicsResponse, CameraRecord};
use crate::store::{CorrespondenceStore, View};
use crate::transform_data::TransformData;
use crate::validate::{is_calibration_ready, names_match};

/// What a successful solve changed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveOutcome {
    pub pose: PnpSolution,
    pub model: CameraModel,
    /// Some intrinsics or distortion field moved.
    pub intrinsics_updated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AutocalibrationOutcome {
    /// Points replaced by the service's correspondences.
    Loaded { points: usize, solved: bool },
    /// The service reported an error; carries the operator notice.
    Failed(String),
}

#[derive(Debug)]
pub struct CalibrationSession {
    config: CalibrationConfig,
    topics: Topics,
    camera: CameraEntity,
    scene_id: Option<String>,
    store: CorrespondenceStore,
    fix: FixMask,
    dragging: [bool; 2],
    pose: Option<PnpSolution>,
    projection_enabled: bool,
    echo: EchoTracker,
    autocalibration: Mailbox<AutocalibrationPose>,
    pipeline: UndistortPipeline,
}

fn drag_index(view: View) -> usize {
    match view {
        View::Camera => 0,
        View::Scene => 1,
    }
}

impl CalibrationSession {
    pub fn new(config: CalibrationConfig, camera: CameraEntity) -> Result<Self, SessionError> {
        config.validate()?;
        camera.model.intrinsics.check()?;
        Ok(Self {
            topics: config.topics(),
            store: CorrespondenceStore::new(config.max_calibration_points),
            config,
            camera,
            scene_id: None,
            fix: FixMask::all_fixed(),
            dragging: [false; 2],
            pose: None,
            projection_enabled: false,
            echo: EchoTracker::new(),
            autocalibration: Mailbox::new(),
            pipeline: UndistortPipeline::new(),
        })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn camera(&self) -> &CameraEntity {
        &self.camera
    }

    pub fn model(&self) -> &CameraModel {
        &self.camera.model
    }

    /// Operator edit of the camera model.
    pub fn set_model(&mut self, model: CameraModel) -> Result<(), SessionError> {
        model.intrinsics.check()?;
        self.camera.model = model;
        Ok(())
    }

    pub fn fix_mask(&self) -> &FixMask {
        &self.fix
    }

    pub fn set_fix_mask(&mut self, fix: FixMask) {
        self.fix = fix;
    }

    pub fn scene_id(&self) -> Option<&str> {
        self.scene_id.as_deref()
    }

    pub fn set_scene_id(&mut self, scene_id: impl Into<String>) {
        self.scene_id = Some(scene_id.into());
    }

    pub(crate) fn set_camera_uid(&mut self, uid: String) {
        self.camera.uid = Some(uid);
    }

    pub fn store(&self) -> &CorrespondenceStore {
        &self.store
    }

    /// Last successful solve, if any since the camera was loaded.
    pub fn pose(&self) -> Option<&PnpSolution> {
        self.pose.as_ref()
    }

    /// Camera-to-world matrix of the Y-up renderer camera.
    pub fn renderer_pose(&self) -> Matrix4<f64> {
        self.camera.pose.to_renderer()
    }

    pub fn projection_enabled(&self) -> bool {
        self.projection_enabled
    }

    pub fn disable_projection(&mut self) {
        self.projection_enabled = false;
    }

    /// Handle for the telemetry handler feeding echo confirmations.
    pub fn echo_tracker(&self) -> EchoTracker {
        self.echo.clone()
    }

    /// Handle for the network handler delivering auto-calibration results.
    pub fn autocalibration_inbox(&self) -> Mailbox<AutocalibrationPose> {
        self.autocalibration.clone()
    }

    pub fn add_point(&mut self, view: View, x: f64, y: f64, z: f64) -> Option<String> {
        self.store.add_point(view, x, y, z)
    }

    pub fn remove_point(&mut self, view: View, name: &str) -> bool {
        self.store.view_mut(view).remove_point(name).is_some()
    }

    pub fn move_point(&mut self, view: View, name: &str, position: Point3<f64>) -> bool {
        let position = match view {
            View::Camera => Point3::new(position.x, position.y, 0.0),
            View::Scene => position,
        };
        self.store.view_mut(view).move_point(name, position)
    }

    /// A drag hides the projection until the next successful solve.
    pub fn begin_drag(&mut self, view: View) {
        self.dragging[drag_index(view)] = true;
        self.projection_enabled = false;
    }

    pub fn end_drag(&mut self, view: View) {
        self.dragging[drag_index(view)] = false;
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging.iter().any(|d| *d)
    }

    pub fn clear_points(&mut self) {
        self.store.clear();
        self.projection_enabled = false;
    }

    pub fn is_ready(&self) -> bool {
        is_calibration_ready(self.store.camera(), self.store.scene(), self.is_dragging())
    }

    /// Re-solve if either view changed since the last solve attempt and the
    /// session is ready. Changes made while not ready (mid-drag, unbalanced
    /// views) stay pending. Failures are logged and leave the previous pose
    /// in place.
    pub fn refresh(&mut self) -> Option<SolveOutcome> {
        let changed = self.store.camera().is_updated() || self.store.scene().is_updated();
        if !changed || !self.is_ready() {
            return None;
        }
        self.store.view_mut(View::Camera).take_updated();
        self.store.view_mut(View::Scene).take_updated();
        self.solve().ok()
    }

    /// Pose solve over all paired points, with a joint intrinsics refinement
    /// once there are enough of them.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "info", skip_all))]
    pub fn solve(&mut self) -> Result<SolveOutcome, SessionError> {
        let (camera, scene) = (self.store.camera(), self.store.scene());
        if !is_calibration_ready(camera, scene, self.is_dragging()) {
            return Err(SessionError::NotReady {
                camera: camera.len(),
                scene: scene.len(),
            });
        }
        if !names_match(camera, scene) {
            return Err(SessionError::NamesMismatch);
        }
        let (scene_pts, image_pts) = self.store.paired();
        let eps = self.config.coplanar_epsilon;
        let solved = if scene_pts.len() >= MIN_INTRINSICS_POINTS {
            calibrate_camera(
                &scene_pts,
                &image_pts,
                &self.camera.model,
                &self.fix,
                eps,
                &self.config.solver,
            )
            .map(|r| (r.pose, Some((r.model, r.fix))))
            .map_err(SessionError::from)
        } else {
            solve_pnp(
                &scene_pts,
                &image_pts,
                &self.camera.model,
                select_method(&scene_pts, eps),
                &self.config.solver,
            )
            .map(|p| (p, None))
            .map_err(SessionError::from)
        };
        let (pose, calibrated) = solved.inspect_err(|e| {
            log::warn!("session: solve failed, keeping previous pose: {e}");
        })?;

        let before = self.camera.model;
        if let Some((model, fix)) = calibrated {
            fix.merge_into(&mut self.camera.model, &model);
        }
        self.commit_pose(pose);
        log::info!(
            "session: solved {} points with {:?}, rms={:.3}px",
            scene_pts.len(),
            pose.method,
            pose.rms
        );
        Ok(SolveOutcome {
            pose,
            model: self.camera.model,
            intrinsics_updated: before != self.camera.model,
        })
    }

    fn commit_pose(&mut self, pose: PnpSolution) {
        self.camera.pose = pose.persisted_pose();
        self.pose = Some(pose);
        self.projection_enabled = true;
    }

    /// Change the intrinsics while keeping the first four scene points where
    /// the camera currently sees them, moving the camera instead.
    pub fn quick_calibrate(&mut self, intrinsics: Intrinsics) -> Result<PnpSolution, SessionError> {
        intrinsics.check()?;
        let scene: Vec<_> = self
            .store
            .scene()
            .iter()
            .take(QUICK_CALIB_POINTS)
            .map(|p| p.position)
            .collect();
        if scene.len() < QUICK_CALIB_POINTS {
            return Err(PnpError::TooFewPoints {
                needed: QUICK_CALIB_POINTS,
                got: scene.len(),
            }
            .into());
        }
        let anchors =
            quick_image_points(&scene, &self.renderer_pose(), &self.camera.model.intrinsics)?;
        let pinhole = CameraModel::new(intrinsics, Distortion::default());
        let pose = solve_quick_pose(&scene, &anchors, &pinhole).inspect_err(|e| {
            log::warn!("session: quick calibration failed: {e}");
        })?;
        self.camera.model.intrinsics = intrinsics;
        self.commit_pose(pose);
        Ok(pose)
    }

    /// Paired points in slot order, ready to persist.
    pub fn transform_data(&self) -> TransformData {
        let (scene, image) = self.store.paired();
        TransformData { image, scene }
    }

    /// Replace both views with `image[i] <-> scene[i]` pairs.
    pub fn load_pairs(
        &mut self,
        image: &[[f64; 2]],
        scene: &[[f64; 3]],
    ) -> Result<usize, SessionError> {
        if image.len() != scene.len() {
            return Err(SessionError::AutocalibrationMismatch {
                image: image.len(),
                scene: scene.len(),
            });
        }
        self.clear_points();
        let mut loaded = 0;
        for (i, s) in image.iter().zip(scene) {
            let placed = self.store.add_point(View::Camera, i[0], i[1], 0.0).is_some()
                && self.store.add_point(View::Scene, s[0], s[1], s[2]).is_some();
            if !placed {
                log::warn!("session: point pool full after {loaded} pairs");
                break;
            }
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Adopt a stored camera: model, pose and any saved correspondences.
    pub fn load_record(&mut self, record: &CameraRecord) -> Result<usize, SessionError> {
        let model = record.model();
        model.intrinsics.check()?;
        let data = if record.has_correspondences() {
            Some(TransformData::from_values(&record.transforms)?)
        } else {
            None
        };
        self.camera.uid.clone_from(&record.uid);
        self.camera.name.clone_from(&record.name);
        self.camera.model = model;
        self.camera.pose = record.pose();
        self.scene_id = record.scene.clone().or(self.scene_id.take());
        self.pose = None;
        self.clear_points();
        let Some(data) = data else {
            return Ok(0);
        };
        let image: Vec<_> = data.image.iter().map(|p| [p.x, p.y]).collect();
        let scene: Vec<_> = data.scene.iter().map(|p| [p.x, p.y, p.z]).collect();
        self.load_pairs(&image, &scene)
    }

    /// The camera as it would be persisted now.
    pub fn camera_record(&self) -> CameraRecord {
        let mut record = CameraRecord {
            uid: self.camera.uid.clone(),
            name: self.camera.name.clone(),
            scene: self.scene_id.clone(),
            translation: self.camera.pose.translation,
            rotation: self.camera.pose.rotation,
            intrinsics: self.camera.model.intrinsics,
            distortion: self.camera.model.distortion.to_array(),
            transforms: Vec::new(),
            transform_type: "euler".to_string(),
        };
        let data = self.transform_data();
        if !data.is_empty() {
            record.set_correspondences(&data);
        }
        record
    }

    pub fn update_command(&self, with_pose: bool) -> UpdateCamera {
        let update = UpdateCamera::from_model(&self.camera.model);
        if with_pose {
            update.with_pose(&self.camera.pose)
        } else {
            update
        }
    }

    /// Body for the remote compute endpoint, when the session is ready and
    /// has enough points to move intrinsics.
    pub fn calculate_intrinsics_request(&self) -> Option<CalculateIntrinsicsRequest> {
        if !self.is_ready() || !names_match(self.store.camera(), self.store.scene()) {
            return None;
        }
        let (scene, image) = self.store.paired();
        if scene.len() < MIN_INTRINSICS_POINTS {
            return None;
        }
        Some(CalculateIntrinsicsRequest::new(
            &scene,
            &image,
            &self.camera.model,
            self.fix,
            self.camera.resolution,
        ))
    }

    /// Take the fields of a compute response that the fix mask leaves free.
    pub fn apply_intrinsics_response(&mut self, response: &CalculateIntrinsicsResponse) -> bool {
        let before = self.camera.model;
        self.fix.merge_into(&mut self.camera.model, &response.model());
        before != self.camera.model
    }

    /// Telemetry on the camera image topic: confirm pending echoes and
    /// project the frame. Returns whether a frame was shown.
    pub fn handle_camera_image<S: ProjectionSink + ?Sized>(
        &mut self,
        telemetry: &CameraTelemetry,
        sink: &mut S,
    ) -> bool {
        self.echo.observe(telemetry);
        match telemetry.image.as_deref() {
            Some(frame) => self.pipeline.process(
                frame,
                &self.camera.model,
                self.projection_enabled,
                sink,
            ),
            None => false,
        }
    }

    fn publish_command<P: Publisher + ?Sized>(
        &self,
        publisher: &P,
        command: &CameraCommand,
    ) -> Result<(), SessionError> {
        let topic = self.topics.camera_command(self.camera.topic_id());
        publisher.publish(&topic, &command.payload()?, command.qos())?;
        Ok(())
    }

    /// Ask the capture service for a fresh calibration frame.
    pub fn request_calibration_image<P: Publisher + ?Sized>(
        &self,
        publisher: &P,
    ) -> Result<(), SessionError> {
        self.publish_command(publisher, &CameraCommand::GetCalibrationImage)
    }

    /// Ask the auto-calibration service to localize this camera.
    pub fn request_autocalibration<P: Publisher + ?Sized>(
        &self,
        publisher: &P,
    ) -> Result<(), SessionError> {
        // A stale result must not answer this request.
        self.autocalibration.take();
        self.publish_command(publisher, &CameraCommand::Localize)
    }

    /// Apply a pose message from the auto-calibration service.
    pub fn apply_autocalibration(
        &mut self,
        message: &AutocalibrationPose,
    ) -> Result<AutocalibrationOutcome, SessionError> {
        if !message.succeeded() {
            let notice = message.failure_notice();
            log::warn!("session: auto-calibration failed: {notice}");
            return Ok(AutocalibrationOutcome::Failed(notice));
        }
        let points = self.load_pairs(
            &message.calibration_points_2d,
            &message.calibration_points_3d,
        )?;
        let solved = self.refresh().is_some();
        log::info!("session: auto-calibration loaded {points} pairs, solved={solved}");
        Ok(AutocalibrationOutcome::Loaded { points, solved })
    }

    /// `localize`, then wait for the service's answer.
    pub async fn autocalibrate<P: Publisher + ?Sized>(
        &mut self,
        publisher: &P,
    ) -> Result<AutocalibrationOutcome, SessionError> {
        self.request_autocalibration(publisher)?;
        let message = self
            .autocalibration
            .receive(self.config.poll_interval(), self.config.autocalibration_wait())
            .await
            .map_err(|t| SessionError::AutocalibrationTimedOut(t.0))?;
        self.apply_autocalibration(&message)
    }

    fn register_scene<P: Publisher + ?Sized>(&self, publisher: &P) -> Result<(), SessionError> {
        let scene = self.scene_id.as_deref().ok_or(SessionError::NoScene)?;
        let topic = self.topics.autocalibration_scene(scene);
        publisher.publish(&topic, REGISTER.as_bytes(), Qos::AtMostOnce)?;
        Ok(())
    }

    /// Service status: once it is running, register our scene with it.
    pub fn handle_autocalibration_status<P: Publisher + ?Sized>(
        &self,
        publisher: &P,
        payload: &[u8],
    ) -> Result<bool, SessionError> {
        if !is_autocalibration_running(payload) {
            return Ok(false);
        }
        self.register_scene(publisher)?;
        Ok(true)
    }

    /// Scene registration progress. Re-registers when the service asks.
    pub fn handle_scene_status<P: Publisher + ?Sized>(
        &self,
        publisher: &P,
        payload: &[u8],
    ) -> Result<Option<SceneStatus>, SessionError> {
        let Some(status) = SceneStatus::parse(payload) else {
            return Ok(None);
        };
        if status == SceneStatus::ReRegister {
            self.register_scene(publisher)?;
        }
        Ok(Some(status))
    }
}
