//! Pinhole camera model with 5-term Brown–Conrady distortion.
//!
//! The flattened index constants are a wire contract shared with the capture
//! process: intrinsics travel as a row-major 3×3 matrix and distortion as the
//! OpenCV `[k1, k2, p1, p2, k3]` vector.

use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};

/// Index of `fx` in a row-major flattened camera matrix.
pub const FX: usize = 0;
/// Index of `fy` in a row-major flattened camera matrix.
pub const FY: usize = 4;
/// Index of `cx` in a row-major flattened camera matrix.
pub const CX: usize = 2;
/// Index of `cy` in a row-major flattened camera matrix.
pub const CY: usize = 5;

pub const K1: usize = 0;
pub const K2: usize = 1;
pub const P1: usize = 2;
pub const P2: usize = 3;
pub const K3: usize = 4;

/// Diagonal field of view used when a camera carries no intrinsics yet.
pub const DEFAULT_FOV_DEG: f64 = 70.0;
/// Frame size assumed together with [`DEFAULT_FOV_DEG`].
pub const DEFAULT_RESOLUTION: (u32, u32) = (640, 480);

const UNDISTORT_ITERS: usize = 8;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraModelError {
    #[error("field of view must be in (0, 180) degrees, got {0}")]
    InvalidFov(f64),
    #[error("resolution must be positive, got {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
    #[error("camera matrix needs 9 values, got {0}")]
    MatrixLength(usize),
    #[error("distortion needs 4 or 5 values, got {0}")]
    DistortionLength(usize),
    #[error("non-finite or zero focal length")]
    Singular,
}

/// Focal lengths and principal point, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Intrinsics from a diagonal field of view, principal point at the frame
    /// center.
    pub fn from_diagonal_fov(
        fov_deg: f64,
        width: u32,
        height: u32,
    ) -> Result<Self, CameraModelError> {
        let (cx, cy) = center_of(width, height)?;
        let half = half_angle_tan(fov_deg)?;
        let d = (cx * cx + cy * cy).sqrt();
        let f = d / half;
        Ok(Self::new(f, f, cx, cy))
    }

    /// Intrinsics from separate horizontal and vertical fields of view.
    pub fn from_hv_fov(
        hfov_deg: f64,
        vfov_deg: f64,
        width: u32,
        height: u32,
    ) -> Result<Self, CameraModelError> {
        let (cx, cy) = center_of(width, height)?;
        let fx = cx / half_angle_tan(hfov_deg)?;
        let fy = cy / half_angle_tan(vfov_deg)?;
        Ok(Self::new(fx, fy, cx, cy))
    }

    /// Vertical field of view in degrees for a frame of `height` pixels.
    pub fn vertical_fov_deg(&self, height: f64) -> f64 {
        (2.0 * (height / (2.0 * self.fy)).atan()).to_degrees()
    }

    pub fn from_flat(m: &[f64]) -> Result<Self, CameraModelError> {
        if m.len() != 9 {
            return Err(CameraModelError::MatrixLength(m.len()));
        }
        Ok(Self::new(m[FX], m[FY], m[CX], m[CY]))
    }

    pub fn to_flat(&self) -> [f64; 9] {
        let mut m = [0.0; 9];
        m[FX] = self.fx;
        m[FY] = self.fy;
        m[CX] = self.cx;
        m[CY] = self.cy;
        m[8] = 1.0;
        m
    }

    /// Row-major nested form used by the telemetry payloads.
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    pub fn from_rows(rows: &[[f64; 3]; 3]) -> Self {
        Self::new(rows[0][0], rows[1][1], rows[0][2], rows[1][2])
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    pub fn check(&self) -> Result<(), CameraModelError> {
        let ok = [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx.abs() > f64::EPSILON
            && self.fy.abs() > f64::EPSILON;
        if ok {
            Ok(())
        } else {
            Err(CameraModelError::Singular)
        }
    }

    /// Pixel to normalized image plane.
    #[inline]
    pub fn normalize(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    /// Normalized image plane to pixel.
    #[inline]
    pub fn denormalize(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * p.x + self.cx, self.fy * p.y + self.cy)
    }
}

fn center_of(width: u32, height: u32) -> Result<(f64, f64), CameraModelError> {
    if width == 0 || height == 0 {
        return Err(CameraModelError::InvalidResolution { width, height });
    }
    Ok((width as f64 / 2.0, height as f64 / 2.0))
}

fn half_angle_tan(fov_deg: f64) -> Result<f64, CameraModelError> {
    if !(fov_deg > 0.0 && fov_deg < 180.0) {
        return Err(CameraModelError::InvalidFov(fov_deg));
    }
    Ok((fov_deg.to_radians() / 2.0).tan())
}

/// OpenCV-compatible radial/tangential distortion `[k1, k2, p1, p2, k3]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub fn new(k1: f64, k2: f64, p1: f64, p2: f64, k3: f64) -> Self {
        Self { k1, k2, p1, p2, k3 }
    }

    /// Accepts the 4-term form (implicit `k3 = 0`) as well.
    pub fn from_slice(d: &[f64]) -> Result<Self, CameraModelError> {
        match d.len() {
            4 => Ok(Self::new(d[K1], d[K2], d[P1], d[P2], 0.0)),
            5 => Ok(Self::new(d[K1], d[K2], d[P1], d[P2], d[K3])),
            n => Err(CameraModelError::DistortionLength(n)),
        }
    }

    pub fn to_array(&self) -> [f64; 5] {
        let mut d = [0.0; 5];
        d[K1] = self.k1;
        d[K2] = self.k2;
        d[P1] = self.p1;
        d[P2] = self.p2;
        d[K3] = self.k3;
        d
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|&v| v == 0.0)
    }

    /// Apply distortion to a normalized point.
    #[inline]
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, pd: Point2<f64>) -> Point2<f64> {
        if self.is_zero() {
            return pd;
        }
        let mut p = pd;
        for _ in 0..UNDISTORT_ITERS {
            let (x, y) = (p.x, p.y);
            let r2 = x * x + y * y;
            let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            if radial.abs() < f64::EPSILON {
                break;
            }
            p = Point2::new((pd.x - dx) / radial, (pd.y - dy) / radial);
        }
        p
    }
}

/// Intrinsics plus distortion: everything needed to map rays to pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub intrinsics: Intrinsics,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraModel {
    pub fn new(intrinsics: Intrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Project a point already expressed in camera coordinates.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project_camera_point(&self, x: f64, y: f64, z: f64) -> Option<Point2<f64>> {
        if z <= f64::EPSILON {
            return None;
        }
        let pd = self.distortion.distort(Point2::new(x / z, y / z));
        Some(self.intrinsics.denormalize(pd))
    }

    /// Pixel to undistorted normalized coordinates.
    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        self.distortion.undistort(self.intrinsics.normalize(p))
    }
}

impl Default for CameraModel {
    fn default() -> Self {
        let (w, h) = DEFAULT_RESOLUTION;
        let cx = w as f64 / 2.0;
        let cy = h as f64 / 2.0;
        let f = (cx * cx + cy * cy).sqrt() / (DEFAULT_FOV_DEG.to_radians() / 2.0).tan();
        Self::new(Intrinsics::new(f, f, cx, cy), Distortion::default())
    }
}

/// One calibratable scalar of the camera model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraParam {
    Fx,
    Fy,
    Cx,
    Cy,
    K1,
    K2,
    P1,
    P2,
    K3,
}

impl CameraParam {
    pub const ALL: [CameraParam; 9] = [
        CameraParam::Fx,
        CameraParam::Fy,
        CameraParam::Cx,
        CameraParam::Cy,
        CameraParam::K1,
        CameraParam::K2,
        CameraParam::P1,
        CameraParam::P2,
        CameraParam::K3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CameraParam::Fx => "fx",
            CameraParam::Fy => "fy",
            CameraParam::Cx => "cx",
            CameraParam::Cy => "cy",
            CameraParam::K1 => "k1",
            CameraParam::K2 => "k2",
            CameraParam::P1 => "p1",
            CameraParam::P2 => "p2",
            CameraParam::K3 => "k3",
        }
    }

    pub fn get(self, model: &CameraModel) -> f64 {
        let (i, d) = (&model.intrinsics, &model.distortion);
        match self {
            CameraParam::Fx => i.fx,
            CameraParam::Fy => i.fy,
            CameraParam::Cx => i.cx,
            CameraParam::Cy => i.cy,
            CameraParam::K1 => d.k1,
            CameraParam::K2 => d.k2,
            CameraParam::P1 => d.p1,
            CameraParam::P2 => d.p2,
            CameraParam::K3 => d.k3,
        }
    }

    pub fn set(self, model: &mut CameraModel, value: f64) {
        let (i, d) = (&mut model.intrinsics, &mut model.distortion);
        match self {
            CameraParam::Fx => i.fx = value,
            CameraParam::Fy => i.fy = value,
            CameraParam::Cx => i.cx = value,
            CameraParam::Cy => i.cy = value,
            CameraParam::K1 => d.k1 = value,
            CameraParam::K2 => d.k2 = value,
            CameraParam::P1 => d.p1 = value,
            CameraParam::P2 => d.p2 = value,
            CameraParam::K3 => d.k3 = value,
        }
    }
}

fn fixed() -> bool {
    true
}

/// Which camera-model fields a solve is allowed to change.
///
/// `true` means fixed. A key absent from the serialized form counts as
/// fixed, so an empty mask never moves anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixMask {
    #[serde(default = "fixed")]
    pub fx: bool,
    #[serde(default = "fixed")]
    pub fy: bool,
    #[serde(default = "fixed")]
    pub cx: bool,
    #[serde(default = "fixed")]
    pub cy: bool,
    #[serde(default = "fixed")]
    pub k1: bool,
    #[serde(default = "fixed")]
    pub k2: bool,
    #[serde(default = "fixed")]
    pub p1: bool,
    #[serde(default = "fixed")]
    pub p2: bool,
    #[serde(default = "fixed")]
    pub k3: bool,
}

impl FixMask {
    pub fn all_fixed() -> Self {
        Self::uniform(true)
    }

    pub fn all_free() -> Self {
        Self::uniform(false)
    }

    fn uniform(v: bool) -> Self {
        Self {
            fx: v,
            fy: v,
            cx: v,
            cy: v,
            k1: v,
            k2: v,
            p1: v,
            p2: v,
            k3: v,
        }
    }

    pub fn is_fixed(&self, param: CameraParam) -> bool {
        match param {
            CameraParam::Fx => self.fx,
            CameraParam::Fy => self.fy,
            CameraParam::Cx => self.cx,
            CameraParam::Cy => self.cy,
            CameraParam::K1 => self.k1,
            CameraParam::K2 => self.k2,
            CameraParam::P1 => self.p1,
            CameraParam::P2 => self.p2,
            CameraParam::K3 => self.k3,
        }
    }

    pub fn set_fixed(&mut self, param: CameraParam, fixed: bool) {
        match param {
            CameraParam::Fx => self.fx = fixed,
            CameraParam::Fy => self.fy = fixed,
            CameraParam::Cx => self.cx = fixed,
            CameraParam::Cy => self.cy = fixed,
            CameraParam::K1 => self.k1 = fixed,
            CameraParam::K2 => self.k2 = fixed,
            CameraParam::P1 => self.p1 = fixed,
            CameraParam::P2 => self.p2 = fixed,
            CameraParam::K3 => self.k3 = fixed,
        }
    }

    pub fn with_fixed(mut self, param: CameraParam, fixed: bool) -> Self {
        self.set_fixed(param, fixed);
        self
    }

    /// Focal lengths unlocked: the capture process must not override them.
    pub fn focal_unlocked(&self) -> bool {
        !self.fx || !self.fy
    }

    /// Copy every non-fixed field of `solved` into `target`.
    pub fn merge_into(&self, target: &mut CameraModel, solved: &CameraModel) {
        for param in CameraParam::ALL {
            if !self.is_fixed(param) {
                param.set(target, param.get(solved));
            }
        }
    }
}

impl Default for FixMask {
    fn default() -> Self {
        Self::all_fixed()
    }
}
