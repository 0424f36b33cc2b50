//! Flat encoding of stored correspondences in a camera record.
//!
//! The current layout is every image `x, y` pair followed by every scene
//! `x, y, z` triple, so its length is a multiple of 5. Older records store
//! scene points as `x, y` pairs on the ground plane; a length divisible by 4
//! (and not by 5) is split in half.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// `transform_type` of records carrying point correspondences.
pub const POINT_CORRESPONDENCE: &str = "3d-2d point correspondence";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TransformDataError {
    #[error("transform array of length {0} is neither 5n nor 4n values")]
    BadLength(usize),
    #[error("{image} image points but {scene} scene points")]
    UnequalCounts { image: usize, scene: usize },
    #[error("transform value {index} is not finite")]
    NonFinite { index: usize },
    #[error("cannot parse transform value {0:?}")]
    BadNumber(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformData {
    pub image: Vec<Point2<f64>>,
    pub scene: Vec<Point3<f64>>,
}

impl TransformData {
    pub fn new(
        image: Vec<Point2<f64>>,
        scene: Vec<Point3<f64>>,
    ) -> Result<Self, TransformDataError> {
        if image.len() != scene.len() {
            return Err(TransformDataError::UnequalCounts {
                image: image.len(),
                scene: scene.len(),
            });
        }
        Ok(Self { image, scene })
    }

    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    pub fn to_values(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(5 * self.len());
        for p in &self.image {
            out.extend([p.x, p.y]);
        }
        for p in &self.scene {
            out.extend([p.x, p.y, p.z]);
        }
        out
    }

    /// Comma-joined form used by the camera record's `transforms` field.
    pub fn to_transform_string(&self) -> String {
        self.to_values()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn from_values(values: &[f64]) -> Result<Self, TransformDataError> {
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(TransformDataError::NonFinite { index });
        }
        let len = values.len();
        if len % 5 == 0 {
            let (image, scene) = values.split_at(len / 5 * 2);
            return Ok(Self {
                image: image.chunks_exact(2).map(|c| Point2::new(c[0], c[1])).collect(),
                scene: scene
                    .chunks_exact(3)
                    .map(|c| Point3::new(c[0], c[1], c[2]))
                    .collect(),
            });
        }
        if len % 4 == 0 {
            let (image, scene) = values.split_at(len / 2);
            return Ok(Self {
                image: image.chunks_exact(2).map(|c| Point2::new(c[0], c[1])).collect(),
                scene: scene
                    .chunks_exact(2)
                    .map(|c| Point3::new(c[0], c[1], 0.0))
                    .collect(),
            });
        }
        Err(TransformDataError::BadLength(len))
    }

    pub fn parse(s: &str) -> Result<Self, TransformDataError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let values = s
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|_| TransformDataError::BadNumber(v.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_values(&values)
    }
}
