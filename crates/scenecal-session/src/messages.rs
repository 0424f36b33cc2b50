//! Pub/sub payloads exchanged with the camera capture service and the
//! auto-calibration service.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use scenecal_core::{
    CameraModel, Distortion, Intrinsics, PersistedPose, CX, CY, FX, FY, K1, K2, K3, P1, P2,
};

/// Delivery guarantee requested from the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("not connected to the broker")]
    Disconnected,
    #[error("publish failed: {0}")]
    Transport(String),
}

/// Outbound half of the pub/sub link.
pub trait Publisher {
    fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), PublishError>;
}

impl<P: Publisher + ?Sized> Publisher for &P {
    fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), PublishError> {
        (**self).publish(topic, payload, qos)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
}

impl Published {
    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("")
    }
}

/// Publisher that records every message, for offline runs and tests.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<Published>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Published> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn take(&self) -> Vec<Published> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), PublishError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Published {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
            });
        Ok(())
    }
}

/// New camera parameters pushed to the capture service.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateCamera {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<[f64; 3]>,
    /// XYZ Euler degrees, Y-down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<[f64; 3]>,
}

impl UpdateCamera {
    pub fn from_model(model: &CameraModel) -> Self {
        Self {
            intrinsics: model.intrinsics,
            distortion: model.distortion,
            translation: None,
            rotation: None,
        }
    }

    pub fn with_pose(mut self, pose: &PersistedPose) -> Self {
        self.translation = Some(pose.translation);
        self.rotation = Some(pose.rotation);
        self
    }

    pub fn model(&self) -> CameraModel {
        CameraModel::new(self.intrinsics, self.distortion)
    }
}

#[derive(Serialize)]
struct UpdateCameraEnvelope<'a> {
    updatecamera: &'a UpdateCamera,
}

/// Commands accepted on `<app>/cmd/camera/<id>`.
#[derive(Clone, Debug, PartialEq)]
pub enum CameraCommand {
    GetImage,
    GetCalibrationImage,
    Localize,
    UpdateCamera(UpdateCamera),
}

impl CameraCommand {
    /// Plain commands go out as bare words, camera updates as JSON.
    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        Ok(match self {
            Self::GetImage => b"getimage".to_vec(),
            Self::GetCalibrationImage => b"getcalibrationimage".to_vec(),
            Self::Localize => b"localize".to_vec(),
            Self::UpdateCamera(update) => {
                serde_json::to_vec(&UpdateCameraEnvelope { updatecamera: update })?
            }
        })
    }

    pub fn qos(&self) -> Qos {
        match self {
            Self::UpdateCamera(_) => Qos::AtLeastOnce,
            _ => Qos::AtMostOnce,
        }
    }
}

/// Frame telemetry on the camera image topics. Every field is optional on
/// the wire; the capture service may omit the frame or the model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraTelemetry {
    /// Base64 JPEG/PNG, optionally as a `data:` URL.
    pub image: Option<String>,
    pub intrinsics: Option<[[f64; 3]; 3]>,
    pub distortion: Option<Vec<f64>>,
    pub rate: Option<f64>,
    pub timestamp: Option<serde_json::Value>,
}

impl CameraTelemetry {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Row-major flattening of the 3x3 camera matrix.
    pub fn flat_intrinsics(&self) -> Option<[f64; 9]> {
        let rows = self.intrinsics?;
        let mut flat = [0.0; 9];
        for (i, v) in rows.iter().flatten().enumerate() {
            flat[i] = *v;
        }
        Some(flat)
    }

    pub fn camera_model(&self) -> Option<CameraModel> {
        let flat = self.flat_intrinsics()?;
        let intrinsics = Intrinsics::from_flat(&flat).ok()?;
        let distortion = Distortion::from_slice(self.distortion.as_deref()?).ok()?;
        Some(CameraModel::new(intrinsics, distortion))
    }

    /// Exact field-by-field match of the echoed model against `expected`.
    pub fn echoes(&self, expected: &CameraModel) -> bool {
        let (Some(flat), Some(dist)) = (self.flat_intrinsics(), self.distortion.as_deref()) else {
            return false;
        };
        if dist.len() <= K3 {
            return false;
        }
        let k = &expected.intrinsics;
        let d = &expected.distortion;
        flat[FX] == k.fx
            && flat[FY] == k.fy
            && flat[CX] == k.cx
            && flat[CY] == k.cy
            && dist[K1] == d.k1
            && dist[K2] == d.k2
            && dist[P1] == d.p1
            && dist[P2] == d.p2
            && dist[K3] == d.k3
    }
}

/// `"True"`/`"False"` as sent by the auto-calibration service, or a JSON
/// boolean.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorFlag {
    Bool(bool),
    Text(String),
}

impl ErrorFlag {
    pub fn is_error(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Text(s) => s != "False",
        }
    }
}

/// Result of a `localize` request, on `<app>/autocalibration/camera/pose/<id>`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutocalibrationPose {
    pub error: Option<ErrorFlag>,
    pub message: Option<String>,
    pub translation: Option<[f64; 3]>,
    /// `[x, y, z, w]`.
    pub quaternion: Option<[f64; 4]>,
    pub calibration_points_2d: Vec<[f64; 2]>,
    pub calibration_points_3d: Vec<[f64; 3]>,
}

impl AutocalibrationPose {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// A missing flag counts as failure.
    pub fn succeeded(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.is_error())
    }

    /// Operator-facing text for a failed localization.
    pub fn failure_notice(&self) -> String {
        let message = self
            .message
            .as_deref()
            .unwrap_or("Auto camera calibration failed.");
        format!(
            "{message} Please try again.\n\nIf you keep getting this error, please check the documentation for known issues."
        )
    }
}

/// Strip JSON string quoting from a bare-word payload.
fn bare_word(payload: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    if let Ok(serde_json::Value::String(s)) = serde_json::from_str(text) {
        return Some(s);
    }
    Some(text.to_string())
}

/// Service-wide status on `<app>/sys/autocalibration/status`.
pub fn is_autocalibration_running(payload: &[u8]) -> bool {
    bare_word(payload).as_deref() == Some("running")
}

pub const REGISTER: &str = "register";

/// Scene registration progress on `<app>/cmd/autocalibration/scene/<scene>`.
#[derive(Clone, Debug, PartialEq)]
pub enum SceneStatus {
    Registering,
    /// The service is registering some scene, possibly this one.
    Busy {
        scene_id: Option<String>,
        scene_name: Option<String>,
    },
    Success,
    /// The service lost the scene and asks for another `register`.
    ReRegister,
    Other(String),
}

#[derive(Deserialize)]
struct SceneStatusWire {
    status: String,
    #[serde(default)]
    scene_id: Option<String>,
    #[serde(default)]
    scene_name: Option<String>,
}

impl SceneStatus {
    /// `None` for our own `register` request echoed back on the topic, or a
    /// payload that is not a status object.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if bare_word(payload).as_deref() == Some(REGISTER) {
            return None;
        }
        let wire: SceneStatusWire = serde_json::from_slice(payload).ok()?;
        Some(match wire.status.as_str() {
            "registering" => Self::Registering,
            "busy" => Self::Busy {
                scene_id: wire.scene_id,
                scene_name: wire.scene_name,
            },
            "success" => Self::Success,
            "re-register" => Self::ReRegister,
            _ => Self::Other(wire.status),
        })
    }
}

impl SceneStatus {
    /// Status line shown next to the auto-calibration control.
    pub fn hint(&self, our_scene_id: &str) -> String {
        match self {
            Self::Registering | Self::ReRegister => "Registering the scene".to_string(),
            Self::Busy { scene_id, .. } if scene_id.as_deref() == Some(our_scene_id) => {
                "Scene updated, Registering the scene".to_string()
            }
            Self::Busy { scene_name, .. } => format!(
                "Unavailable, registering scene : {}",
                scene_name.as_deref().unwrap_or("unknown")
            ),
            Self::Success => "Click to calibrate the camera automatically".to_string(),
            Self::Other(status) => status.clone(),
        }
    }

    /// Only a registered scene can serve `localize` requests.
    pub fn allows_autocalibration(&self) -> bool {
        matches!(self, Self::Success)
    }
}
