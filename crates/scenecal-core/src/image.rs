//! Interleaved RGB buffers and remapping.

use crate::camera::CameraModel;
use nalgebra::Point2;

#[derive(Clone, Copy, Debug)]
pub struct RgbImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h*3
}

#[derive(Clone, Debug, PartialEq)]
pub struct RgbImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl RgbImage {
    /// `None` when the buffer length does not match `width * height * 3`.
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 || data.len() != width * height * 3 {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn view(&self) -> RgbImageView<'_> {
        RgbImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

#[inline]
fn get_rgb(src: &RgbImageView<'_>, x: i32, y: i32) -> [f32; 3] {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return [0.0; 3];
    }
    let i = (y as usize * src.width + x as usize) * 3;
    [
        src.data[i] as f32,
        src.data[i + 1] as f32,
        src.data[i + 2] as f32,
    ]
}

/// Bilinear sample with integer coordinates at pixel centers; outside
/// pixels read as black.
#[inline]
pub fn sample_bilinear_rgb(src: &RgbImageView<'_>, x: f32, y: f32) -> [f32; 3] {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_rgb(src, x0, y0);
    let p10 = get_rgb(src, x0 + 1, y0);
    let p01 = get_rgb(src, x0, y0 + 1);
    let p11 = get_rgb(src, x0 + 1, y0 + 1);

    let mut out = [0.0; 3];
    for c in 0..3 {
        let a = p00[c] + fx * (p10[c] - p00[c]);
        let b = p01[c] + fx * (p11[c] - p01[c]);
        out[c] = a + fy * (b - a);
    }
    out
}

#[inline]
pub fn sample_bilinear_rgb_u8(src: &RgbImageView<'_>, x: f32, y: f32) -> [u8; 3] {
    sample_bilinear_rgb(src, x, y).map(|v| v.round().clamp(0.0, 255.0) as u8)
}

/// Per-destination-pixel source coordinates.
#[derive(Clone, Debug)]
pub struct RemapTable {
    pub width: usize,
    pub height: usize,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl RemapTable {
    /// Undistortion maps with identity rectification and the source camera
    /// matrix reused as the destination one.
    pub fn undistort(model: &CameraModel, width: usize, height: usize) -> Self {
        let n = width * height;
        let mut map_x = Vec::with_capacity(n);
        let mut map_y = Vec::with_capacity(n);
        let k = &model.intrinsics;
        for v in 0..height {
            for u in 0..width {
                let ray = k.normalize(Point2::new(u as f64, v as f64));
                let src = k.denormalize(model.distortion.distort(ray));
                map_x.push(src.x as f32);
                map_y.push(src.y as f32);
            }
        }
        Self {
            width,
            height,
            map_x,
            map_y,
        }
    }
}

/// Sample `src` at every table entry.
pub fn remap_rgb(src: &RgbImageView<'_>, table: &RemapTable) -> RgbImage {
    let mut data = Vec::with_capacity(table.width * table.height * 3);
    for (&x, &y) in table.map_x.iter().zip(&table.map_y) {
        data.extend_from_slice(&sample_bilinear_rgb_u8(src, x, y));
    }
    RgbImage {
        width: table.width,
        height: table.height,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Distortion, Intrinsics};

    fn gradient(w: usize, h: usize) -> RgbImage {
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[(x * 10) as u8, (y * 10) as u8, 7]);
            }
        }
        RgbImage::from_raw(w, h, data).unwrap()
    }

    #[test]
    fn integer_coordinates_hit_pixel_centers() {
        let img = gradient(8, 6);
        assert_eq!(sample_bilinear_rgb_u8(&img.view(), 3.0, 2.0), [30, 20, 7]);
        assert_eq!(sample_bilinear_rgb_u8(&img.view(), 3.5, 2.0), [35, 20, 7]);
    }

    #[test]
    fn outside_reads_black() {
        let img = gradient(4, 4);
        assert_eq!(sample_bilinear_rgb_u8(&img.view(), -5.0, 1.0), [0, 0, 0]);
    }

    #[test]
    fn zero_distortion_table_is_identity() {
        let model = CameraModel::new(Intrinsics::new(50.0, 50.0, 4.0, 3.0), Distortion::default());
        let img = gradient(8, 6);
        let table = RemapTable::undistort(&model, 8, 6);
        assert_eq!(remap_rgb(&img.view(), &table), img);
    }

    #[test]
    fn barrel_distortion_pulls_corners_inward() {
        let model = CameraModel::new(
            Intrinsics::new(100.0, 100.0, 50.0, 50.0),
            Distortion::new(-0.3, 0.0, 0.0, 0.0, 0.0),
        );
        let table = RemapTable::undistort(&model, 101, 101);
        // Corner (0, 0) samples closer to the center.
        assert!(table.map_x[0] > 0.0 && table.map_y[0] > 0.0);
        // The center maps to itself.
        let c = 50 * 101 + 50;
        assert!((table.map_x[c] - 50.0).abs() < 1e-6);
    }

    #[test]
    fn from_raw_rejects_bad_length() {
        assert!(RgbImage::from_raw(2, 2, vec![0; 11]).is_none());
        assert!(RgbImage::from_raw(0, 2, vec![]).is_none());
    }
}
