//! Single-view joint refinement of intrinsics, distortion and pose.
//!
//! Parameters are released in groups, and only once enough correspondences
//! back them:
//!
//! | group        | fields  | free from |
//! |--------------|---------|-----------|
//! | focal length | fx, fy  | 6 points  |
//! | principal pt | cx, cy  | 6 points  |
//! | radial       | k1 / k2 / k3, each on its own | 8 points |
//! | tangential   | p1, p2  | 8 points  |
//!
//! A group is fixed as soon as any of its fields is fixed in the request.
//! The `fx / fy` ratio of the starting model is always preserved.

use nalgebra::{DVector, Point2, Point3};
use serde::{Deserialize, Serialize};

use scenecal_core::{CameraModel, CameraParam, FixMask};

use crate::error::CalibrateError;
use crate::lm::{minimize, LmOptions};
use crate::pnp::{
    pose_from_params, pose_to_params, select_method, solve_pnp, validate_correspondences,
    PnpSolution, MIN_PNP_POINTS,
};
use crate::project::{reprojection_rms, residuals_into};

/// Correspondences needed before focal length or principal point may move.
pub const MIN_INTRINSICS_POINTS: usize = 6;
/// Correspondences needed before any distortion term may move.
pub const MIN_DISTORTION_POINTS: usize = 8;

/// Apply the group rules to a requested fix mask for `n` correspondences.
pub fn effective_fix_mask(requested: &FixMask, n: usize) -> FixMask {
    let few = n < MIN_INTRINSICS_POINTS;
    let few_dist = n < MIN_DISTORTION_POINTS;
    let focal = requested.fx || requested.fy || few;
    let principal = requested.cx || requested.cy || few;
    let tangential = requested.p1 || requested.p2 || few_dist;
    FixMask {
        fx: focal,
        fy: focal,
        cx: principal,
        cy: principal,
        k1: requested.k1 || few_dist,
        k2: requested.k2 || few_dist,
        p1: tangential,
        p2: tangential,
        k3: requested.k3 || few_dist,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Starting model with every free field replaced by its solved value.
    pub model: CameraModel,
    pub pose: PnpSolution,
    /// Mask actually used after the group rules.
    pub fix: FixMask,
    pub converged: bool,
}

/// Free scalars in optimizer order. Focal length is a single entry (`fy`)
/// with `fx` tied to it.
fn free_params(fix: &FixMask) -> Vec<CameraParam> {
    CameraParam::ALL
        .into_iter()
        .filter(|&p| p != CameraParam::Fx && !fix.is_fixed(p))
        .collect()
}

fn model_from_params(
    base: &CameraModel,
    free: &[CameraParam],
    aspect: f64,
    x: &DVector<f64>,
) -> CameraModel {
    let mut model = *base;
    for (i, &p) in free.iter().enumerate() {
        p.set(&mut model, x[i]);
        if p == CameraParam::Fy {
            model.intrinsics.fx = aspect * x[i];
        }
    }
    model
}

/// Refine the camera model and pose from one view.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "info", skip_all, fields(n = scene.len()))
)]
pub fn calibrate_camera(
    scene: &[Point3<f64>],
    image: &[Point2<f64>],
    initial: &CameraModel,
    requested: &FixMask,
    coplanar_epsilon: f64,
    opts: &LmOptions,
) -> Result<CalibrationResult, CalibrateError> {
    if scene.len() < MIN_PNP_POINTS {
        return Err(CalibrateError::TooFewPoints {
            needed: MIN_PNP_POINTS,
            got: scene.len(),
        });
    }
    validate_correspondences(scene, image, MIN_PNP_POINTS)?;

    let fix = effective_fix_mask(requested, scene.len());
    let method = select_method(scene, coplanar_epsilon);
    let start = solve_pnp(scene, image, initial, method, opts)?;

    let free = free_params(&fix);
    if free.is_empty() {
        log::info!("calibrate: all intrinsics fixed, pose only");
        return Ok(CalibrationResult {
            model: *initial,
            pose: start,
            fix,
            converged: true,
        });
    }

    let aspect = initial.intrinsics.fx / initial.intrinsics.fy;
    let k = free.len();
    let mut x0 = DVector::zeros(k + 6);
    for (i, &p) in free.iter().enumerate() {
        x0[i] = p.get(initial);
    }
    x0.rows_mut(k, 6)
        .copy_from_slice(&pose_to_params(&start.world_to_camera()));

    let residuals = |x: &DVector<f64>| {
        let model = model_from_params(initial, &free, aspect, x);
        let pose = pose_from_params(x, k);
        let mut out = DVector::zeros(2 * scene.len());
        residuals_into(scene, image, &pose, &model, out.as_mut_slice())?;
        Some(out)
    };
    let outcome = minimize(&residuals, x0, opts);

    let model = model_from_params(initial, &free, aspect, &outcome.params);
    let (fx, fy) = (model.intrinsics.fx, model.intrinsics.fy);
    let finite = CameraParam::ALL.iter().all(|p| p.get(&model).is_finite());
    if !finite || fx <= 0.0 || fy <= 0.0 || !outcome.cost.is_finite() {
        return Err(CalibrateError::Diverged { fx, fy });
    }

    let pose = pose_from_params(&outcome.params, k);
    let rms = reprojection_rms(scene, image, &pose, &model)
        .ok_or(CalibrateError::Diverged { fx, fy })?;
    log::info!(
        "calibrate: {} free params, n={}, rms={:.4}px, fx={:.2} fy={:.2}",
        k,
        scene.len(),
        rms,
        fx,
        fy
    );
    Ok(CalibrationResult {
        model,
        pose: PnpSolution::from_isometry(&pose, start.method, rms),
        fix,
        converged: outcome.converged,
    })
}
