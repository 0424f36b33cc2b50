//! Interactive camera calibration session.
//!
//! An operator marks matching points on a camera frame and in the scene.
//! [`CalibrationSession`] keeps both point sets, solves the camera pose (and
//! the intrinsics once enough points exist), pushes new camera parameters
//! to the capture service and waits for them to be echoed back before they
//! are persisted.
//!
//! - [`store`]: named points per view and their free-name pools.
//! - [`validate`]: readiness checks gating every solve and save.
//! - [`feedback`]: echo confirmation as a future with a deadline.
//! - [`projection`]: frame decode and undistortion for the scene overlay.
//! - [`save`]: the two save flows and their operator notices.
//! - [`messages`] / [`rest`]: wire payloads and the transport traits.

pub mod config;
pub mod entity;
mod error;
pub mod feedback;
pub mod messages;
pub mod projection;
pub mod rest;
pub mod save;
mod session;
pub mod store;
pub mod transform_data;
pub mod validate;

pub use config::{CalibrationConfig, ConfigError, IoError, Topics};
pub use entity::{
    CameraEntity, EntityKind, EntityRegistry, PoseControllable, SceneEntity, Validatable,
};
pub use error::SessionError;
pub use feedback::{
    poll_until, publish_and_confirm, wait_until, ConfirmationState, EchoTracker, FeedbackError,
    Mailbox, WaitTimeout,
};
pub use messages::{
    AutocalibrationPose, CameraCommand, CameraTelemetry, MemoryPublisher, Publisher, PublishError,
    Qos, SceneStatus, UpdateCamera,
};
pub use projection::{decode_frame, FrameError, ProjectionFrame, ProjectionSink, UndistortPipeline};
pub use rest::{
    CalculateIntrinsicsRequest, CalculateIntrinsicsResponse, CameraRecord, CameraStore,
    IntrinsicsService, LocalIntrinsicsService, ServiceError, StoreError,
};
pub use save::{save_calibration, save_camera_settings, SaveOutcome};
pub use session::{AutocalibrationOutcome, CalibrationSession, SolveOutcome};
pub use store::{CorrespondenceStore, PointStore, View};
pub use transform_data::{TransformData, TransformDataError};
