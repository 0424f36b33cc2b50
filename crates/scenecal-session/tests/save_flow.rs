use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use scenecal_core::{CameraModel, CameraParam, Distortion, FixMask, Intrinsics};
use scenecal_session::messages::ErrorFlag;
use scenecal_session::save::{
    CAMERA_SETTING_UPDATED, CAMERA_UPDATED, CAMERA_UPDATED_UNLOCKED, ECHO_TIMEOUT,
};
use scenecal_session::{
    save_calibration, save_camera_settings, AutocalibrationOutcome, AutocalibrationPose,
    CalibrationConfig, CalibrationSession, CameraEntity, CameraRecord, CameraStore,
    CameraTelemetry, EchoTracker, MemoryPublisher, SaveOutcome, SessionError, StoreError,
    UpdateCamera, View,
};
use scenecal_solve::project_points;

fn model() -> CameraModel {
    CameraModel::new(
        Intrinsics::new(600.0, 600.0, 320.0, 240.0),
        Distortion::new(-0.05, 0.0, 0.0, 0.0, 0.0),
    )
}

fn scene() -> Vec<Point3<f64>> {
    vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(4.0, 0.0, 0.0),
        Point3::new(4.0, 3.0, 0.0),
        Point3::new(0.0, 3.0, 0.0),
        Point3::new(2.0, 1.0, 1.0),
    ]
}

fn image_of(points: &[Point3<f64>]) -> Vec<[f64; 2]> {
    let pose = Isometry3::from_parts(
        Translation3::new(-2.0, -1.5, 9.0),
        UnitQuaternion::from_scaled_axis(Vector3::new(0.1, 0.2, 0.0)),
    );
    project_points(points, &pose, &model())
        .unwrap()
        .iter()
        .map(|p| [p.x, p.y])
        .collect()
}

fn session(uid: Option<&str>) -> CalibrationSession {
    let mut camera = CameraEntity::new("dock-2");
    camera.uid = uid.map(str::to_string);
    camera.model = model();
    let mut s = CalibrationSession::new(CalibrationConfig::default(), camera).unwrap();
    let scene = scene();
    for (i, p) in image_of(&scene).iter().zip(&scene) {
        s.add_point(View::Camera, i[0], i[1], 0.0);
        s.add_point(View::Scene, p.x, p.y, p.z);
    }
    s
}

#[derive(Default)]
struct MemoryStore {
    records: RefCell<BTreeMap<String, CameraRecord>>,
    next_uid: Cell<u32>,
    reject: bool,
}

impl CameraStore for MemoryStore {
    async fn create_camera(&self, record: &CameraRecord) -> Result<String, StoreError> {
        if self.reject {
            return Err(StoreError::Rejected("name taken".into()));
        }
        let uid = format!("cam-{}", self.next_uid.get());
        self.next_uid.set(self.next_uid.get() + 1);
        self.records.borrow_mut().insert(uid.clone(), record.clone());
        Ok(uid)
    }

    async fn update_camera(&self, uid: &str, record: &CameraRecord) -> Result<(), StoreError> {
        if self.reject {
            return Err(StoreError::Status(500));
        }
        self.records.borrow_mut().insert(uid.to_string(), record.clone());
        Ok(())
    }
}

/// Stand-in for the capture service: echo back whatever `updatecamera`
/// arrives, after a short delay.
fn spawn_capture_service(link: Arc<MemoryPublisher>, tracker: EchoTracker) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            for msg in link.take() {
                let Ok(v) = serde_json::from_slice::<serde_json::Value>(&msg.payload) else {
                    continue;
                };
                let Ok(update) = serde_json::from_value::<UpdateCamera>(v["updatecamera"].clone())
                else {
                    continue;
                };
                tokio::time::sleep(Duration::from_millis(700)).await;
                let m = update.model();
                tracker.observe(&CameraTelemetry {
                    intrinsics: Some(m.intrinsics.to_rows()),
                    distortion: Some(m.distortion.to_array().to_vec()),
                    rate: Some(15.0),
                    ..CameraTelemetry::default()
                });
            }
        }
    });
}

#[tokio::test(start_paused = true)]
async fn confirmed_save_persists_with_locked_focal_notice() {
    let mut s = session(None);
    let link = Arc::new(MemoryPublisher::new());
    spawn_capture_service(Arc::clone(&link), s.echo_tracker());
    let store = MemoryStore::default();

    let outcome = save_calibration(&mut s, Some(link.as_ref()), &store).await.unwrap();
    assert_eq!(
        outcome,
        SaveOutcome::Saved {
            uid: "cam-0".into(),
            notice: Some(CAMERA_UPDATED.into()),
            warning: None,
        }
    );
    assert_eq!(s.camera().uid.as_deref(), Some("cam-0"));
    let records = store.records.borrow();
    let saved = &records["cam-0"];
    assert!(saved.has_correspondences());
    assert_eq!(saved.transforms.len(), 25);
    assert_eq!(saved.intrinsics, model().intrinsics);
}

#[tokio::test(start_paused = true)]
async fn unlocked_focal_gets_override_reminder() {
    let mut s = session(Some("cam-9"));
    s.set_fix_mask(FixMask::all_fixed().with_fixed(CameraParam::Fx, false));
    let link = Arc::new(MemoryPublisher::new());
    spawn_capture_service(Arc::clone(&link), s.echo_tracker());
    let store = MemoryStore::default();

    let outcome = save_calibration(&mut s, Some(link.as_ref()), &store).await.unwrap();
    assert_eq!(outcome.notice(), Some(CAMERA_UPDATED_UNLOCKED));
    assert!(store.records.borrow().contains_key("cam-9"));
}

#[tokio::test(start_paused = true)]
async fn silent_capture_service_blocks_persist() {
    let mut s = session(None);
    let link = MemoryPublisher::new();
    let store = MemoryStore::default();
    let start = tokio::time::Instant::now();

    let outcome = save_calibration(&mut s, Some(&link), &store).await.unwrap();
    assert_eq!(
        outcome,
        SaveOutcome::NotConfirmed {
            notice: ECHO_TIMEOUT.into()
        }
    );
    assert_eq!(start.elapsed(), Duration::from_millis(5000));
    assert!(store.records.borrow().is_empty());
    assert!(s.camera().uid.is_none());

    let sent = link.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "scenecal/cmd/camera/dock-2");
}

#[tokio::test(start_paused = true)]
async fn offline_save_persists_directly() {
    let mut s = session(None);
    let store = MemoryStore::default();
    let outcome = save_calibration(&mut s, None::<&MemoryPublisher>, &store)
        .await
        .unwrap();
    assert!(outcome.is_saved());
    assert_eq!(outcome.notice(), None);
    assert_eq!(store.records.borrow().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unbalanced_views_are_not_saved() {
    let mut s = session(None);
    s.remove_point(View::Scene, "p2");
    let store = MemoryStore::default();
    let outcome = save_calibration(&mut s, None::<&MemoryPublisher>, &store)
        .await
        .unwrap();
    let SaveOutcome::Invalid { notice } = outcome else {
        panic!("expected invalid, got {outcome:?}");
    };
    assert!(notice.ends_with(
        "There are currently 5 points in the camera view and 4 points in the scene view."
    ));
    assert!(store.records.borrow().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_create_reports_unique_name() {
    let mut s = session(None);
    let store = MemoryStore {
        reject: true,
        ..MemoryStore::default()
    };
    let outcome = save_calibration(&mut s, None::<&MemoryPublisher>, &store)
        .await
        .unwrap();
    assert!(matches!(outcome, SaveOutcome::PersistFailed { .. }));
    assert!(outcome.notice().unwrap().contains("unique"));
    assert!(s.camera().uid.is_none());
}

#[tokio::test(start_paused = true)]
async fn scene_settings_save_warns_but_persists() {
    let mut s = session(Some("cam-3"));
    let link = MemoryPublisher::new();
    let store = MemoryStore::default();
    let outcome = save_camera_settings(&mut s, Some(&link), &store).await.unwrap();
    let SaveOutcome::Saved {
        uid,
        notice,
        warning,
    } = outcome
    else {
        panic!("expected saved, got {outcome:?}");
    };
    assert_eq!(uid, "cam-3");
    assert_eq!(notice.as_deref(), Some(CAMERA_SETTING_UPDATED));
    assert_eq!(
        warning.as_deref(),
        Some("New camera intrinsics did not update in the camera service within 5000ms.")
    );
    let sent = link.sent();
    let v: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
    assert!(v["updatecamera"]["translation"].is_array());
    assert!(v["updatecamera"]["rotation"].is_array());
}

#[tokio::test(start_paused = true)]
async fn placeholder_camera_name_is_not_saved() {
    let mut s = session(None);
    let record = CameraRecord {
        name: "new-camera".into(),
        ..s.camera_record()
    };
    s.load_record(&record).unwrap();
    let store = MemoryStore::default();
    let outcome = save_camera_settings(&mut s, None::<&MemoryPublisher>, &store)
        .await
        .unwrap();
    assert!(matches!(outcome, SaveOutcome::Invalid { .. }));
}

#[tokio::test(start_paused = true)]
async fn autocalibration_round_trip() {
    let mut s = session(None);
    s.clear_points();
    let link = MemoryPublisher::new();
    let inbox = s.autocalibration_inbox();
    let scene = scene();
    let answer = AutocalibrationPose {
        error: Some(ErrorFlag::Text("False".into())),
        calibration_points_2d: image_of(&scene),
        calibration_points_3d: scene.iter().map(|p| [p.x, p.y, p.z]).collect(),
        ..AutocalibrationPose::default()
    };
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        inbox.put(answer);
    });

    let outcome = s.autocalibrate(&link).await.unwrap();
    assert_eq!(
        outcome,
        AutocalibrationOutcome::Loaded {
            points: 5,
            solved: true
        }
    );
    assert!(s.projection_enabled());
    assert_eq!(link.sent()[0].text(), "localize");
}

#[tokio::test(start_paused = true)]
async fn autocalibration_gives_up_after_budget() {
    let mut s = session(None);
    let link = MemoryPublisher::new();
    let start = tokio::time::Instant::now();
    let err = s.autocalibrate(&link).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::AutocalibrationTimedOut(d) if d == Duration::from_millis(200_000)
    ));
    assert_eq!(start.elapsed(), Duration::from_millis(200_000));
    assert_eq!(s.store().camera().len(), 5);
}
