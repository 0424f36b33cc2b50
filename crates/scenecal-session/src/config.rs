//! JSON configuration for a calibration session.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use scenecal_core::MAX_COPLANAR_DETERMINANT;
use scenecal_solve::LmOptions;

/// Topic root used when none is configured.
pub const DEFAULT_APP_NAME: &str = "scenecal";
/// Size of each view's name pool (`p0` .. `p49`).
pub const MAX_CALIBRATION_POINTS: usize = 50;
pub const POLL_INTERVAL_MS: u64 = 100;
/// Budget for the capture process to echo new intrinsics.
pub const INTRINSICS_WAIT_MS: u64 = 5_000;
/// Budget for an auto-calibration round trip.
pub const AUTOCALIBRATION_WAIT_MS: u64 = 200_000;

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("app name must not be empty")]
    EmptyAppName,
    #[error("max_calibration_points must be at least 4, got {0}")]
    PointPool(usize),
    #[error("coplanar epsilon must be positive and finite, got {0}")]
    Epsilon(f64),
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,
    #[error("wait budget {wait_ms}ms is shorter than the poll interval {poll_ms}ms")]
    WaitTooShort { wait_ms: u64, poll_ms: u64 },
}

/// Session-wide knobs. Every key is optional in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub app_name: String,
    pub max_calibration_points: usize,
    pub coplanar_epsilon: f64,
    pub poll_interval_ms: u64,
    pub intrinsics_wait_ms: u64,
    pub autocalibration_wait_ms: u64,
    pub solver: LmOptions,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            max_calibration_points: MAX_CALIBRATION_POINTS,
            coplanar_epsilon: MAX_COPLANAR_DETERMINANT,
            poll_interval_ms: POLL_INTERVAL_MS,
            intrinsics_wait_ms: INTRINSICS_WAIT_MS,
            autocalibration_wait_ms: AUTOCALIBRATION_WAIT_MS,
            solver: LmOptions::default(),
        }
    }
}

impl CalibrationConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::EmptyAppName);
        }
        if self.max_calibration_points < 4 {
            return Err(ConfigError::PointPool(self.max_calibration_points));
        }
        if !(self.coplanar_epsilon.is_finite() && self.coplanar_epsilon > 0.0) {
            return Err(ConfigError::Epsilon(self.coplanar_epsilon));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        for wait_ms in [self.intrinsics_wait_ms, self.autocalibration_wait_ms] {
            if wait_ms < self.poll_interval_ms {
                return Err(ConfigError::WaitTooShort {
                    wait_ms,
                    poll_ms: self.poll_interval_ms,
                });
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn intrinsics_wait(&self) -> Duration {
        Duration::from_millis(self.intrinsics_wait_ms)
    }

    pub fn autocalibration_wait(&self) -> Duration {
        Duration::from_millis(self.autocalibration_wait_ms)
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.app_name)
    }
}

/// Pub/sub topic layout rooted at the application name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    app: String,
}

impl Topics {
    pub fn new(app: &str) -> Self {
        Self {
            app: app.trim_end_matches('/').to_string(),
        }
    }

    pub fn camera_command(&self, camera_id: &str) -> String {
        format!("{}/cmd/camera/{camera_id}", self.app)
    }

    pub fn camera_image(&self, camera_id: &str) -> String {
        format!("{}/image/camera/{camera_id}", self.app)
    }

    pub fn calibration_image(&self, camera_id: &str) -> String {
        format!("{}/image/calibration/camera/{camera_id}", self.app)
    }

    pub fn camera_data(&self, camera_id: &str) -> String {
        format!("{}/data/camera/{camera_id}", self.app)
    }

    pub fn autocalibration_pose(&self, camera_id: &str) -> String {
        format!("{}/autocalibration/camera/pose/{camera_id}", self.app)
    }

    pub fn autocalibration_status(&self) -> String {
        format!("{}/sys/autocalibration/status", self.app)
    }

    pub fn autocalibration_scene(&self, scene_id: &str) -> String {
        format!("{}/cmd/autocalibration/scene/{scene_id}", self.app)
    }

    /// Trailing path segment of a per-camera topic.
    pub fn camera_id_of(topic: &str) -> Option<&str> {
        topic.rsplit('/').next().filter(|id| !id.is_empty())
    }
}
