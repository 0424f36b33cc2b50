//! Save flows: push the camera model to the capture service, wait for the
//! echo, then persist.

use crate::entity::Validatable;
use crate::error::SessionError;
use crate::feedback::{publish_and_confirm, FeedbackError};
use crate::messages::Publisher;
use crate::rest::{CameraRecord, CameraStore};
use crate::session::CalibrationSession;

pub const CAMERA_UPDATED: &str = "Camera updated";
pub const CAMERA_UPDATED_UNLOCKED: &str = "Camera updated. Ensure \"--override-saved-intrinsics\" is not set for this camera in docker-compose.yml to have these changes persist.";
pub const ECHO_TIMEOUT: &str = "Failed to update camera intrinsics in the camera service. Please try again.\n\nIf you keep getting this error, please check the documentation for known issues.";
pub const ECHO_SUPERSEDED: &str = "A newer camera update was sent before this one was confirmed.";
pub const CAMERA_SAVED: &str = "Camera setting has been saved!";
pub const CAMERA_SETTING_UPDATED: &str = "Camera setting has been updated!";
pub const CAMERA_NAME_REQUIRED: &str = "Enter camera name to save the camera";

pub fn invalid_calibration_notice(camera: usize, scene: usize) -> String {
    format!(
        "Saving the calibration requires an equal number of calibration points in each view (minimum 4).\n\nThere are currently {camera} points in the camera view and {scene} points in the scene view."
    )
}

#[derive(Clone, Debug, PartialEq)]
pub enum SaveOutcome {
    Saved {
        uid: String,
        notice: Option<String>,
        /// Non-fatal problem on the way, e.g. an unconfirmed echo.
        warning: Option<String>,
    },
    /// Nothing was sent or stored.
    Invalid { notice: String },
    /// The capture service did not confirm; nothing was stored.
    NotConfirmed { notice: String },
    PersistFailed { notice: String },
}

impl SaveOutcome {
    pub fn notice(&self) -> Option<&str> {
        match self {
            Self::Saved { notice, .. } => notice.as_deref(),
            Self::Invalid { notice }
            | Self::NotConfirmed { notice }
            | Self::PersistFailed { notice } => Some(notice),
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

/// Create or update `record`; a new camera takes the assigned uid.
async fn persist<S: CameraStore>(
    session: &mut CalibrationSession,
    store: &S,
    record: &CameraRecord,
) -> Result<String, String> {
    let updating = record.uid.is_some();
    let stored = match &record.uid {
        Some(uid) => store.update_camera(uid, record).await.map(|_| uid.clone()),
        None => store.create_camera(record).await,
    };
    match stored {
        Ok(uid) => {
            log::info!("save: camera {:?} stored as {uid}", record.name);
            session.set_camera_uid(uid.clone());
            Ok(uid)
        }
        Err(e) => {
            log::warn!("save: storing camera {:?} failed: {e}", record.name);
            Err(e.notice(updating))
        }
    }
}

/// Save from the calibration page. With a pub/sub link the new model must
/// be echoed back before anything is stored.
pub async fn save_calibration<P, S>(
    session: &mut CalibrationSession,
    link: Option<&P>,
    store: &S,
) -> Result<SaveOutcome, SessionError>
where
    P: Publisher + ?Sized,
    S: CameraStore,
{
    if !session.is_ready() {
        let (camera, scene) = (session.store().camera().len(), session.store().scene().len());
        return Ok(SaveOutcome::Invalid {
            notice: invalid_calibration_notice(camera, scene),
        });
    }
    let record = session.camera_record();

    let notice = match link {
        None => None,
        Some(publisher) => {
            let config = session.config();
            let topic = session.topics().camera_command(session.camera().topic_id());
            let confirmed = publish_and_confirm(
                publisher,
                &topic,
                session.update_command(false),
                &session.echo_tracker(),
                config.poll_interval(),
                config.intrinsics_wait(),
            )
            .await;
            match confirmed {
                Ok(()) if session.fix_mask().focal_unlocked() => {
                    Some(CAMERA_UPDATED_UNLOCKED.to_string())
                }
                Ok(()) => Some(CAMERA_UPDATED.to_string()),
                Err(FeedbackError::TimedOut(_)) => {
                    return Ok(SaveOutcome::NotConfirmed {
                        notice: ECHO_TIMEOUT.to_string(),
                    })
                }
                Err(FeedbackError::Superseded) => {
                    return Ok(SaveOutcome::NotConfirmed {
                        notice: ECHO_SUPERSEDED.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    Ok(match persist(session, store, &record).await {
        Ok(uid) => SaveOutcome::Saved {
            uid,
            notice,
            warning: None,
        },
        Err(notice) => SaveOutcome::PersistFailed { notice },
    })
}

/// Save from the scene view. The camera is stored even when the capture
/// service does not confirm in time; the operator only gets a warning.
pub async fn save_camera_settings<P, S>(
    session: &mut CalibrationSession,
    link: Option<&P>,
    store: &S,
) -> Result<SaveOutcome, SessionError>
where
    P: Publisher + ?Sized,
    S: CameraStore,
{
    if !session.camera().validate_inputs() {
        return Ok(SaveOutcome::Invalid {
            notice: CAMERA_NAME_REQUIRED.to_string(),
        });
    }
    let record = session.camera_record();

    let mut warning = None;
    if let (Some(publisher), Some(uid)) = (link, session.camera().uid.as_deref()) {
        let config = session.config();
        let topic = session.topics().camera_command(uid);
        let confirmed = publish_and_confirm(
            publisher,
            &topic,
            session.update_command(true),
            &session.echo_tracker(),
            config.poll_interval(),
            config.intrinsics_wait(),
        )
        .await;
        match confirmed {
            Ok(()) => {}
            Err(FeedbackError::TimedOut(_) | FeedbackError::Superseded) => {
                warning = Some(format!(
                    "New camera intrinsics did not update in the camera service within {}ms.",
                    config.intrinsics_wait_ms
                ));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let creating = record.uid.is_none();
    Ok(match persist(session, store, &record).await {
        Ok(uid) => SaveOutcome::Saved {
            uid,
            notice: Some(if creating { CAMERA_SAVED } else { CAMERA_SETTING_UPDATED }.to_string()),
            warning,
        },
        Err(notice) => SaveOutcome::PersistFailed { notice },
    })
}
