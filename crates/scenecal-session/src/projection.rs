//! Frame decode, undistortion and hand-off to the projection renderer.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use scenecal_core::{remap_rgb, CameraModel, RemapTable, RgbImage};

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("decoded frame has inconsistent size {width}x{height}")]
    Size { width: u32, height: u32 },
}

/// Decode a base64 JPEG/PNG frame, with or without a `data:` URL prefix.
pub fn decode_frame(encoded: &str) -> Result<RgbImage, FrameError> {
    let encoded = encoded.trim();
    let body = match encoded.strip_prefix("data:") {
        Some(url) => url.split_once(',').map_or("", |(_, data)| data),
        None => encoded,
    };
    if body.is_empty() {
        return Err(FrameError::Empty);
    }
    let bytes = STANDARD.decode(body)?;
    let rgb = image::load_from_memory(&bytes)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    RgbImage::from_raw(width as usize, height as usize, rgb.into_raw())
        .ok_or(FrameError::Size { width, height })
}

/// What the renderer needs to texture the scene from the camera's view.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionFrame {
    pub image: RgbImage,
    /// Vertical field of view in degrees, from `fy` and the frame height.
    pub vfov_deg: f64,
    pub aspect: f64,
    pub undistorted: bool,
}

/// Receiver of projection frames, typically the 3D view.
pub trait ProjectionSink {
    fn show(&mut self, frame: ProjectionFrame);
    fn hide(&mut self);
}

/// Undistorts frames with a remap table cached per model and frame size.
#[derive(Debug, Default)]
pub struct UndistortPipeline {
    cache: Option<(CameraModel, RemapTable)>,
}

impl UndistortPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&mut self, model: &CameraModel, width: usize, height: usize) -> &RemapTable {
        let fresh = matches!(
            &self.cache,
            Some((m, t)) if m == model && t.width == width && t.height == height
        );
        if !fresh {
            log::debug!("undistort: rebuilding {width}x{height} remap table");
            self.cache = None;
        }
        &self
            .cache
            .get_or_insert_with(|| (*model, RemapTable::undistort(model, width, height)))
            .1
    }

    /// Frames from a camera without distortion pass through untouched.
    pub fn undistort(&mut self, frame: &RgbImage, model: &CameraModel) -> RgbImage {
        if model.distortion.is_zero() {
            return frame.clone();
        }
        let table = self.table(model, frame.width, frame.height);
        remap_rgb(&frame.view(), table)
    }

    pub fn prepare(
        &mut self,
        encoded: &str,
        model: &CameraModel,
    ) -> Result<ProjectionFrame, FrameError> {
        let raw = decode_frame(encoded)?;
        let undistorted = !model.distortion.is_zero();
        let image = self.undistort(&raw, model);
        let height = image.height as f64;
        Ok(ProjectionFrame {
            vfov_deg: model.intrinsics.vertical_fov_deg(height),
            aspect: image.width as f64 / height,
            image,
            undistorted,
        })
    }

    /// Push one frame to `sink` when projection is enabled. A frame that
    /// cannot be decoded is skipped. Returns whether a frame was shown.
    pub fn process<S: ProjectionSink + ?Sized>(
        &mut self,
        encoded: &str,
        model: &CameraModel,
        enabled: bool,
        sink: &mut S,
    ) -> bool {
        if !enabled {
            sink.hide();
            return false;
        }
        match self.prepare(encoded, model) {
            Ok(frame) => {
                sink.show(frame);
                true
            }
            Err(e) => {
                log::warn!("projection: skipping frame: {e}");
                false
            }
        }
    }
}
