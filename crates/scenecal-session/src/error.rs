use std::time::Duration;

use scenecal_core::CameraModelError;
use scenecal_solve::{CalibrateError, PnpError};

use crate::config::ConfigError;
use crate::feedback::FeedbackError;
use crate::messages::PublishError;
use crate::transform_data::TransformDataError;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("calibration not ready: {camera} camera points, {scene} scene points")]
    NotReady { camera: usize, scene: usize },
    #[error("camera and scene views do not hold the same point names")]
    NamesMismatch,
    #[error("no scene is set for auto-calibration")]
    NoScene,
    #[error("auto-calibration result has {image} image points but {scene} scene points")]
    AutocalibrationMismatch { image: usize, scene: usize },
    #[error("no auto-calibration result within {0:?}")]
    AutocalibrationTimedOut(Duration),
    #[error(transparent)]
    Pnp(#[from] PnpError),
    #[error(transparent)]
    Calibrate(#[from] CalibrateError),
    #[error(transparent)]
    Camera(#[from] CameraModelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transform(#[from] TransformDataError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}
