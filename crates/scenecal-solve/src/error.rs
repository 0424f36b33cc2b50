use scenecal_core::CameraModelError;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PnpError {
    #[error("need at least {needed} correspondences, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("scene/image point counts differ ({scene} vs {image})")]
    LengthMismatch { scene: usize, image: usize },
    #[error("non-finite coordinate in correspondence {0}")]
    NonFinite(usize),
    #[error("correspondences {0} and {1} coincide")]
    Duplicate(usize, usize),
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("pose solve did not converge to a finite pose")]
    NotConverged,
    #[error(transparent)]
    Camera(#[from] CameraModelError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrateError {
    #[error("need at least {needed} correspondences, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("initial pose: {0}")]
    Pose(#[from] PnpError),
    #[error("calibration diverged (fx={fx}, fy={fy})")]
    Diverged { fx: f64, fy: f64 },
}
