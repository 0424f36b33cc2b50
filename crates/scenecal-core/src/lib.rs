//! Core types for scene camera calibration.
//!
//! This crate holds the pieces every other `scenecal` crate agrees on:
//! - the pinhole camera model with OpenCV-ordered 5-term distortion and the
//!   flattened index constants used on the wire,
//! - pose conventions (vision vs renderer axes, XYZ Euler, the Y-up/Y-down
//!   toggle),
//! - small geometric predicates (coplanarity, plane fit),
//! - homography estimation,
//! - RGB buffers, bilinear sampling and undistortion remap tables,
//! - a minimal logger.

mod camera;
mod geometry;
mod homography;
mod image;
mod logger;
mod pose;

pub use camera::{
    CameraModel, CameraModelError, CameraParam, Distortion, FixMask, Intrinsics, CX, CY,
    DEFAULT_FOV_DEG, DEFAULT_RESOLUTION, FX, FY, K1, K2, K3, P1, P2,
};
pub use geometry::{
    are_points_collinear, are_points_coplanar, best_fit_plane, MAX_COPLANAR_DETERMINANT,
};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{
    remap_rgb, sample_bilinear_rgb, sample_bilinear_rgb_u8, RemapTable, RgbImage, RgbImageView,
};
#[cfg(feature = "tracing")]
pub use logger::init_tracing;
pub use logger::{init_with_level, level_for_verbosity};
pub use pose::{
    camera_to_world, euler_xyz_from_matrix, matrix_from_euler_xyz, renderer_pose, rodrigues,
    rodrigues_inverse, toggle_y_up_y_down, world_to_camera, PersistedPose, PoseComponents,
};
