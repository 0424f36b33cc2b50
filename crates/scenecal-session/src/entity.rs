//! Scene entities and their capabilities.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use scenecal_core::{CameraModel, PersistedPose, DEFAULT_RESOLUTION};

/// Placeholder name of a camera that has not been named yet.
pub const DEFAULT_CAMERA_NAME: &str = "new-camera";

/// Entities that can be placed in the scene.
pub trait PoseControllable {
    fn pose(&self) -> PersistedPose;
    fn set_pose(&mut self, pose: PersistedPose);

    fn translate(&mut self, delta: [f64; 3]) {
        let mut pose = self.pose();
        for (t, d) in pose.translation.iter_mut().zip(delta) {
            *t += d;
        }
        self.set_pose(pose);
    }
}

/// Entities whose form input can be checked before saving.
pub trait Validatable {
    fn validate_inputs(&self) -> bool;
}

fn identity_pose() -> PersistedPose {
    PersistedPose {
        translation: [0.0; 3],
        rotation: [0.0; 3],
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraEntity {
    pub uid: Option<String>,
    pub name: String,
    pub pose: PersistedPose,
    pub model: CameraModel,
    /// Frame size in pixels, `(width, height)`.
    pub resolution: (u32, u32),
}

impl CameraEntity {
    /// Unsaved camera with the default 70° model at 640x480.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: None,
            name: name.into(),
            pose: identity_pose(),
            model: CameraModel::default(),
            resolution: DEFAULT_RESOLUTION,
        }
    }

    /// Identifier used in camera topics: the uid once saved, else the name.
    pub fn topic_id(&self) -> &str {
        self.uid.as_deref().unwrap_or(&self.name)
    }
}

impl PoseControllable for CameraEntity {
    fn pose(&self) -> PersistedPose {
        self.pose
    }

    fn set_pose(&mut self, pose: PersistedPose) {
        self.pose = pose;
    }
}

impl Validatable for CameraEntity {
    fn validate_inputs(&self) -> bool {
        !self.name.is_empty() && self.name != DEFAULT_CAMERA_NAME
    }
}

/// Polygon on the ground plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionEntity {
    pub uid: Option<String>,
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub height: f64,
}

impl Validatable for RegionEntity {
    fn validate_inputs(&self) -> bool {
        !self.name.is_empty() && self.points.len() >= 3
    }
}

/// Directed line segment on the ground plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TripwireEntity {
    pub uid: Option<String>,
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub height: f64,
}

impl Validatable for TripwireEntity {
    fn validate_inputs(&self) -> bool {
        !self.name.is_empty() && self.points.len() == 2
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorEntity {
    pub uid: Option<String>,
    pub name: String,
    pub position: [f64; 3],
}

impl PoseControllable for SensorEntity {
    /// Sensors have a position only.
    fn pose(&self) -> PersistedPose {
        PersistedPose {
            translation: self.position,
            rotation: [0.0; 3],
        }
    }

    fn set_pose(&mut self, pose: PersistedPose) {
        self.position = pose.translation;
    }
}

impl Validatable for SensorEntity {
    fn validate_inputs(&self) -> bool {
        !self.name.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Camera,
    Region,
    Tripwire,
    Sensor,
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unknown entity kind {0:?}")]
pub struct UnknownEntityKind(pub String);

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [Self::Camera, Self::Region, Self::Tripwire, Self::Sensor];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Region => "region",
            Self::Tripwire => "tripwire",
            Self::Sensor => "sensor",
        }
    }

    /// Fresh, unsaved entity of this kind.
    pub fn create(self, name: &str) -> SceneEntity {
        let name = name.to_string();
        match self {
            Self::Camera => SceneEntity::Camera(CameraEntity::new(name)),
            Self::Region => SceneEntity::Region(RegionEntity {
                uid: None,
                name,
                points: Vec::new(),
                height: 1.0,
            }),
            Self::Tripwire => SceneEntity::Tripwire(TripwireEntity {
                uid: None,
                name,
                points: Vec::new(),
                height: 1.0,
            }),
            Self::Sensor => SceneEntity::Sensor(SensorEntity {
                uid: None,
                name,
                position: [0.0; 3],
            }),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownEntityKind(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SceneEntity {
    Camera(CameraEntity),
    Region(RegionEntity),
    Tripwire(TripwireEntity),
    Sensor(SensorEntity),
}

impl SceneEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Camera(_) => EntityKind::Camera,
            Self::Region(_) => EntityKind::Region,
            Self::Tripwire(_) => EntityKind::Tripwire,
            Self::Sensor(_) => EntityKind::Sensor,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Camera(e) => &e.name,
            Self::Region(e) => &e.name,
            Self::Tripwire(e) => &e.name,
            Self::Sensor(e) => &e.name,
        }
    }

    pub fn uid(&self) -> Option<&str> {
        match self {
            Self::Camera(e) => e.uid.as_deref(),
            Self::Region(e) => e.uid.as_deref(),
            Self::Tripwire(e) => e.uid.as_deref(),
            Self::Sensor(e) => e.uid.as_deref(),
        }
    }

    fn uid_mut(&mut self) -> &mut Option<String> {
        match self {
            Self::Camera(e) => &mut e.uid,
            Self::Region(e) => &mut e.uid,
            Self::Tripwire(e) => &mut e.uid,
            Self::Sensor(e) => &mut e.uid,
        }
    }

    pub fn as_pose_controllable(&self) -> Option<&dyn PoseControllable> {
        match self {
            Self::Camera(e) => Some(e),
            Self::Sensor(e) => Some(e),
            Self::Region(_) | Self::Tripwire(_) => None,
        }
    }

    pub fn as_pose_controllable_mut(&mut self) -> Option<&mut dyn PoseControllable> {
        match self {
            Self::Camera(e) => Some(e),
            Self::Sensor(e) => Some(e),
            Self::Region(_) | Self::Tripwire(_) => None,
        }
    }
}

impl Validatable for SceneEntity {
    fn validate_inputs(&self) -> bool {
        match self {
            Self::Camera(e) => e.validate_inputs(),
            Self::Region(e) => e.validate_inputs(),
            Self::Tripwire(e) => e.validate_inputs(),
            Self::Sensor(e) => e.validate_inputs(),
        }
    }
}

/// Saved entities keyed by uid, plus entities not yet stored.
#[derive(Clone, Debug, Default)]
pub struct EntityRegistry {
    saved: BTreeMap<String, SceneEntity>,
    pending: Vec<SceneEntity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// File `entity` by its uid, or as pending when it has none. Returns the
    /// entity it replaced, if any.
    pub fn insert(&mut self, entity: SceneEntity) -> Option<SceneEntity> {
        match entity.uid() {
            Some(uid) => self.saved.insert(uid.to_string(), entity),
            None => {
                self.pending.push(entity);
                None
            }
        }
    }

    /// Move the pending entity at `index` into the saved map under `uid`.
    pub fn mark_saved(&mut self, index: usize, uid: &str) -> Option<&SceneEntity> {
        if index >= self.pending.len() {
            return None;
        }
        let mut entity = self.pending.remove(index);
        *entity.uid_mut() = Some(uid.to_string());
        log::debug!("registry: {} {:?} saved as {uid}", entity.kind(), entity.name());
        self.saved.insert(uid.to_string(), entity);
        self.saved.get(uid)
    }

    pub fn get(&self, uid: &str) -> Option<&SceneEntity> {
        self.saved.get(uid)
    }

    pub fn get_mut(&mut self, uid: &str) -> Option<&mut SceneEntity> {
        self.saved.get_mut(uid)
    }

    pub fn remove(&mut self, uid: &str) -> Option<SceneEntity> {
        self.saved.remove(uid)
    }

    pub fn saved(&self) -> impl Iterator<Item = (&str, &SceneEntity)> {
        self.saved.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn pending(&self) -> &[SceneEntity] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.saved.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entities that would fail form validation, saved ones first.
    pub fn invalid(&self) -> Vec<&SceneEntity> {
        self.saved
            .values()
            .chain(&self.pending)
            .filter(|e| !e.validate_inputs())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_builds_each_kind() {
        for kind in EntityKind::ALL {
            let e = kind.create("x");
            assert_eq!(e.kind(), kind);
            assert_eq!(e.name(), "x");
            assert_eq!(e.uid(), None);
            assert_eq!(kind.to_string().parse::<EntityKind>(), Ok(kind));
        }
        assert!("door".parse::<EntityKind>().is_err());
    }

    #[test]
    fn camera_name_rules() {
        assert!(!EntityKind::Camera.create("").validate_inputs());
        assert!(!EntityKind::Camera.create(DEFAULT_CAMERA_NAME).validate_inputs());
        assert!(EntityKind::Camera.create("lobby-1").validate_inputs());
    }

    #[test]
    fn shape_rules() {
        let mut region = RegionEntity {
            uid: None,
            name: "r".into(),
            points: vec![[0.0, 0.0], [1.0, 0.0]],
            height: 1.0,
        };
        assert!(!region.validate_inputs());
        region.points.push([1.0, 1.0]);
        assert!(region.validate_inputs());

        let mut wire = TripwireEntity {
            uid: None,
            name: "t".into(),
            points: vec![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]],
            height: 1.0,
        };
        assert!(!wire.validate_inputs());
        wire.points.pop();
        assert!(wire.validate_inputs());
    }

    #[test]
    fn pose_capability_is_per_kind() {
        let mut cam = EntityKind::Camera.create("c");
        let pose = cam.as_pose_controllable_mut().unwrap();
        pose.translate([1.0, 2.0, 3.0]);
        pose.translate([1.0, 0.0, 0.0]);
        assert_eq!(cam.as_pose_controllable().unwrap().pose().translation, [2.0, 2.0, 3.0]);

        let mut sensor = EntityKind::Sensor.create("s");
        sensor.as_pose_controllable_mut().unwrap().set_pose(PersistedPose {
            translation: [4.0, 5.0, 0.0],
            rotation: [90.0, 0.0, 0.0],
        });
        let SceneEntity::Sensor(s) = &sensor else {
            panic!("expected sensor");
        };
        assert_eq!(s.position, [4.0, 5.0, 0.0]);
        assert!(EntityKind::Region.create("r").as_pose_controllable().is_none());
    }

    #[test]
    fn registry_routes_by_uid() {
        let mut reg = EntityRegistry::new();
        reg.insert(EntityKind::Region.create("pending"));
        let mut saved = EntityKind::Camera.create("cam");
        if let SceneEntity::Camera(c) = &mut saved {
            c.uid = Some("u1".into());
        }
        assert!(reg.insert(saved).is_none());
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.pending().len(), 1);
        assert_eq!(reg.get("u1").unwrap().name(), "cam");

        let stored = reg.mark_saved(0, "u2").unwrap();
        assert_eq!(stored.uid(), Some("u2"));
        assert!(reg.pending().is_empty());
        assert!(reg.mark_saved(0, "u3").is_none());
        assert_eq!(reg.saved().map(|(k, _)| k).collect::<Vec<_>>(), ["u1", "u2"]);

        // The region has no vertices yet.
        assert_eq!(reg.invalid().len(), 1);
        assert!(reg.remove("u2").is_some());
        assert!(reg.invalid().is_empty());
    }

    #[test]
    fn entities_serialize_with_kind_tag() {
        let v = serde_json::to_value(EntityKind::Tripwire.create("t")).unwrap();
        assert_eq!(v["kind"], "tripwire");
        let back: SceneEntity = serde_json::from_value(v).unwrap();
        assert_eq!(back.kind(), EntityKind::Tripwire);
    }
}
