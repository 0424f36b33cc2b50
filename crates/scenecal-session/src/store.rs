//! Named calibration points for the camera-image view and the scene view.
//!
//! Each view draws names `p0`, `p1`, ... from its own pool. A name is the
//! pairing key between views: `p3` in the camera view corresponds to `p3` in
//! the scene view. The pool always hands out the lowest free slot, so after
//! removals the next point reuses the gap.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{Point2, Point3};
use serde::Serialize;

/// Marker colors, cycled by slot number.
pub const PALETTE: [&str; 8] = [
    "#ff0000", "#00ff00", "#0000ff", "#ffff00", "#ff00ff", "#00ffff", "#ffa500", "#800080",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// Pixel coordinates on the camera frame.
    Camera,
    /// World coordinates in the scene.
    Scene,
}

pub fn slot_name(slot: usize) -> String {
    format!("p{slot}")
}

/// Slot number of a point name, `None` when it is not `p<n>`.
pub fn parse_slot(name: &str) -> Option<usize> {
    let digits = name.strip_prefix('p')?;
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return None;
    }
    digits.parse().ok()
}

pub fn palette_color(slot: usize) -> &'static str {
    PALETTE[slot % PALETTE.len()]
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationPoint {
    pub name: String,
    pub slot: usize,
    pub color: &'static str,
    /// Camera points keep `z = 0`.
    pub position: Point3<f64>,
}

impl CalibrationPoint {
    pub fn image_point(&self) -> Point2<f64> {
        self.position.xy()
    }
}

/// Points of one view plus its free-name pool.
#[derive(Clone, Debug)]
pub struct PointStore {
    view: View,
    capacity: usize,
    free: BTreeSet<usize>,
    points: BTreeMap<usize, CalibrationPoint>,
    updated: bool,
}

impl PointStore {
    pub fn new(view: View, capacity: usize) -> Self {
        Self {
            view,
            capacity,
            free: (0..capacity).collect(),
            points: BTreeMap::new(),
            updated: false,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Place a point under the lowest free name. `None` when the pool is
    /// exhausted.
    pub fn add_point(&mut self, position: Point3<f64>) -> Option<&CalibrationPoint> {
        let Some(slot) = self.free.pop_first() else {
            log::debug!("{:?} view: name pool exhausted", self.view);
            return None;
        };
        let point = CalibrationPoint {
            name: slot_name(slot),
            slot,
            color: palette_color(slot),
            position,
        };
        self.updated = true;
        let point = self.points.entry(slot).or_insert(point);
        Some(&*point)
    }

    pub fn remove_point(&mut self, name: &str) -> Option<CalibrationPoint> {
        let slot = parse_slot(name)?;
        let point = self.points.remove(&slot)?;
        self.free.insert(slot);
        self.updated = true;
        Some(point)
    }

    /// Drag update. Returns `false` for an unknown name.
    pub fn move_point(&mut self, name: &str, position: Point3<f64>) -> bool {
        let Some(point) = parse_slot(name).and_then(|s| self.points.get_mut(&s)) else {
            return false;
        };
        point.position = position;
        self.updated = true;
        true
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.free = (0..self.capacity).collect();
        self.updated = true;
    }

    pub fn get(&self, name: &str) -> Option<&CalibrationPoint> {
        self.points.get(&parse_slot(name)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Points in numeric slot order (`p2` before `p10`).
    pub fn iter(&self) -> impl Iterator<Item = &CalibrationPoint> {
        self.points.values()
    }

    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.points.keys().copied()
    }

    /// Name to coordinates, in numeric slot order.
    pub fn export_ordered(&self) -> Vec<(String, Point3<f64>)> {
        self.iter().map(|p| (p.name.clone(), p.position)).collect()
    }

    /// Closest point within `radius` of `at`, for hit testing.
    pub fn find_point_near(&self, at: Point3<f64>, radius: f64) -> Option<&CalibrationPoint> {
        self.iter()
            .map(|p| ((p.position - at).norm(), p))
            .filter(|(d, _)| *d <= radius)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, p)| p)
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Read and reset the "changed since last look" flag.
    pub fn take_updated(&mut self) -> bool {
        std::mem::take(&mut self.updated)
    }
}

/// Both views of one calibration session.
#[derive(Clone, Debug)]
pub struct CorrespondenceStore {
    camera: PointStore,
    scene: PointStore,
}

impl CorrespondenceStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            camera: PointStore::new(View::Camera, capacity),
            scene: PointStore::new(View::Scene, capacity),
        }
    }

    pub fn view(&self, view: View) -> &PointStore {
        match view {
            View::Camera => &self.camera,
            View::Scene => &self.scene,
        }
    }

    pub fn view_mut(&mut self, view: View) -> &mut PointStore {
        match view {
            View::Camera => &mut self.camera,
            View::Scene => &mut self.scene,
        }
    }

    pub fn camera(&self) -> &PointStore {
        &self.camera
    }

    pub fn scene(&self) -> &PointStore {
        &self.scene
    }

    /// Camera points ignore `z`.
    pub fn add_point(&mut self, view: View, x: f64, y: f64, z: f64) -> Option<String> {
        let z = if view == View::Camera { 0.0 } else { z };
        self.view_mut(view)
            .add_point(Point3::new(x, y, z))
            .map(|p| p.name.clone())
    }

    pub fn clear(&mut self) {
        self.camera.clear();
        self.scene.clear();
    }

    /// Scene/image pairs for every name present in both views, in slot
    /// order.
    pub fn paired(&self) -> (Vec<Point3<f64>>, Vec<Point2<f64>>) {
        self.scene
            .iter()
            .filter_map(|s| self.camera.get(&s.name).map(|c| (s.position, c.image_point())))
            .unzip()
    }
}
