use std::collections::BTreeMap;

use crate::geometry::{Mesh, ScalarName};
use crate::tree::Point3;

pub const LOBES_COLOR_TABLE: &str = "lapdMouseLobes";
pub const RAS_TO_LPS_TRANSFORM: &str = "ras2lps";
/// Built-in host color table used for every generated mesh.
pub const RAINBOW_COLOR_TABLE: &str = "Rainbow";

const LOBE_COLORS: [(&str, [f64; 4]); 6] = [
    ("background", [0.0, 0.0, 0.0, 0.0]),
    ("left lobe", [1.0, 0.0, 0.0, 1.0]),
    ("right cranial lobe", [0.0, 1.0, 0.0, 1.0]),
    ("right middle lobe", [0.0, 0.0, 1.0, 1.0]),
    ("right caudal lobe", [1.0, 1.0, 0.0, 1.0]),
    ("right accessory lobe", [0.0, 1.0, 1.0, 1.0]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ColorEntry {
    pub name: String,
    pub rgba: [f64; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorTable {
    pub name: String,
    pub category: String,
    pub entries: Vec<ColorEntry>,
}

impl ColorTable {
    pub fn lobes() -> Self {
        Self {
            name: LOBES_COLOR_TABLE.to_string(),
            category: "lapdMouse".to_string(),
            entries: LOBE_COLORS
                .iter()
                .map(|(name, rgba)| ColorEntry {
                    name: name.to_string(),
                    rgba: *rgba,
                })
                .collect(),
        }
    }
}

/// Affine transform as a row-major 4x4 matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub name: String,
    pub matrix: [[f64; 4]; 4],
}

impl Transform {
    /// Flips X and Y to take RAS coordinates into LPS.
    pub fn ras_to_lps() -> Self {
        Self {
            name: RAS_TO_LPS_TRANSFORM.to_string(),
            matrix: [
                [-1.0, 0.0, 0.0, 0.0],
                [0.0, -1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    pub fn apply(&self, point: Point3) -> Point3 {
        let m = &self.matrix;
        let mut out = [0.0; 3];
        for (row, value) in out.iter_mut().enumerate() {
            *value = m[row][0] * point[0] + m[row][1] * point[1] + m[row][2] * point[2] + m[row][3];
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneResource {
    ColorTable(ColorTable),
    Transform(Transform),
}

impl SceneResource {
    pub fn name(&self) -> &str {
        match self {
            SceneResource::ColorTable(table) => &table.name,
            SceneResource::Transform(transform) => &transform.name,
        }
    }
}

/// Named shared resources owned by the host application.
pub trait SceneRegistry {
    fn contains(&self, name: &str) -> bool;
    fn insert(&mut self, resource: SceneResource);
}

/// Registers the resource built by `make` unless `name` is already known.
/// Returns whether a new resource was inserted.
pub fn ensure_registered<R, F>(registry: &mut R, name: &str, make: F) -> bool
where
    R: SceneRegistry + ?Sized,
    F: FnOnce() -> SceneResource,
{
    if registry.contains(name) {
        return false;
    }
    let resource = make();
    log::debug!("Registering scene resource {}", resource.name());
    registry.insert(resource);
    true
}

pub fn register_well_known<R: SceneRegistry + ?Sized>(registry: &mut R) {
    ensure_registered(registry, LOBES_COLOR_TABLE, || {
        SceneResource::ColorTable(ColorTable::lobes())
    });
    ensure_registered(registry, RAS_TO_LPS_TRANSFORM, || {
        SceneResource::Transform(Transform::ras_to_lps())
    });
}

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    resources: BTreeMap<String, SceneResource>,
}

impl InMemoryRegistry {
    pub fn get(&self, name: &str) -> Option<&SceneResource> {
        self.resources.get(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl SceneRegistry for InMemoryRegistry {
    fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    fn insert(&mut self, resource: SceneResource) {
        self.resources.insert(resource.name().to_string(), resource);
    }
}

/// How a host should show a generated mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayHint {
    pub active_scalar: ScalarName,
    pub color_table: &'static str,
    pub opacity: f64,
    pub transform: &'static str,
}

impl DisplayHint {
    /// `None` for meshes without a scalar array.
    pub fn for_mesh(mesh: &Mesh) -> Option<Self> {
        let active_scalar = mesh.scalar_name()?;
        let opacity = match active_scalar {
            ScalarName::BranchLabel => 1.0,
            ScalarName::MeasurementMean => 0.2,
        };
        Some(Self {
            active_scalar,
            color_table: RAINBOW_COLOR_TABLE,
            opacity,
            transform: RAS_TO_LPS_TRANSFORM,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_happens_once() {
        let mut registry = InMemoryRegistry::default();
        let mut built = 0;
        for _ in 0..3 {
            ensure_registered(&mut registry, LOBES_COLOR_TABLE, || {
                built += 1;
                SceneResource::ColorTable(ColorTable::lobes())
            });
        }
        assert_eq!(built, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn well_known_resources_are_registered() {
        let mut registry = InMemoryRegistry::default();
        register_well_known(&mut registry);
        register_well_known(&mut registry);

        assert_eq!(registry.len(), 2);
        match registry.get(LOBES_COLOR_TABLE) {
            Some(SceneResource::ColorTable(table)) => {
                assert_eq!(table.entries.len(), 6);
                assert_eq!(table.entries[1].name, "left lobe");
                assert_eq!(table.entries[0].rgba[3], 0.0);
            }
            other => panic!("unexpected resource: {other:?}"),
        }
    }

    #[test]
    fn ras_to_lps_flips_x_and_y() {
        let transform = Transform::ras_to_lps();
        assert_eq!(transform.apply([1.0, 2.0, 3.0]), [-1.0, -2.0, 3.0]);
    }

    #[test]
    fn display_hints_follow_scalar_name() {
        let tree = DisplayHint::for_mesh(&Mesh::new(ScalarName::BranchLabel)).expect("hint");
        assert_eq!(tree.opacity, 1.0);
        assert_eq!(tree.color_table, RAINBOW_COLOR_TABLE);

        let spheres = DisplayHint::for_mesh(&Mesh::new(ScalarName::MeasurementMean)).expect("hint");
        assert_eq!(spheres.opacity, 0.2);
        assert!(DisplayHint::for_mesh(&Mesh::default()).is_none());
    }
}
