pub mod texture;

use bevy::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Identity of a loaded model asset. Shared by every object that renders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub u32);

/// Keyframes of one bone for one action.
///
/// Position and rotation arrays are expected to have the same length. When
/// they don't, the shorter one decides the usable key count.
#[derive(Debug, Clone, Default)]
pub struct BoneKeys {
    pub positions: Vec<Vec3>,
    pub rotations: Vec<Quat>,
}

impl BoneKeys {
    pub fn key_count(&self) -> usize {
        self.positions.len().min(self.rotations.len())
    }

    pub fn is_empty(&self) -> bool {
        self.key_count() == 0
    }
}

#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    /// Indexed by action. A missing entry means the bone has no keys for it.
    pub actions: Vec<BoneKeys>,
}

impl Bone {
    pub fn keys(&self, action: usize) -> Option<&BoneKeys> {
        self.actions.get(action).filter(|keys| !keys.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Action {
    pub key_count: usize,
    /// Keyframes advanced per second before the global speed multiplier.
    pub play_speed: f32,
    pub lock_root_position: bool,
}

impl Default for Action {
    fn default() -> Self {
        Self {
            key_count: 1,
            play_speed: 1.0,
            lock_root_position: false,
        }
    }
}

impl Action {
    pub fn is_animated(&self) -> bool {
        self.key_count > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub bone: u16,
}

#[derive(Debug, Clone, Default)]
pub struct MeshDesc {
    pub texture_path: String,
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
    pub two_sided: bool,
    /// Glow-style material that needs its own shader path.
    pub glow: bool,
}

/// Immutable model data supplied by the asset loader.
///
/// Model space is Z-up, as authored: the horizontal plane is XY.
#[derive(Debug, Clone, Default)]
pub struct ModelAsset {
    pub name: String,
    pub bones: Vec<Bone>,
    pub actions: Vec<Action>,
    pub meshes: Vec<MeshDesc>,
}

/// Inconsistencies tolerated at runtime but worth reporting once at load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetIssue {
    ParentAfterChild { bone: usize, parent: usize },
    MismatchedKeyCounts { bone: usize, action: usize, positions: usize, rotations: usize },
    KeylessBone { bone: usize, action: usize },
    VertexBoneOutOfRange { mesh: usize, bone: u16 },
    NoMeshes,
}

impl ModelAsset {
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn action(&self, index: usize) -> Option<&Action> {
        self.actions.get(index)
    }

    /// Nearest valid action index, or `None` when the model has no actions.
    pub fn clamp_action(&self, index: usize) -> Option<usize> {
        if self.actions.is_empty() {
            None
        } else {
            Some(index.min(self.actions.len() - 1))
        }
    }

    pub fn has_animated_actions(&self) -> bool {
        self.actions.iter().any(Action::is_animated)
    }

    /// True when the last key of the root bone repeats the first key's
    /// position, which marks an explicit loop point in some walk cycles.
    pub fn loop_restarts_early(&self, action: usize) -> bool {
        let Some(root) = self.bones.first() else {
            return false;
        };
        let Some(keys) = root.keys(action) else {
            return false;
        };
        let count = keys.key_count();
        if count < 3 {
            return false;
        }
        let displacement = keys.positions[count - 1] - keys.positions[0];
        displacement.length_squared() <= f32::EPSILON
    }

    pub fn validate(&self) -> Vec<AssetIssue> {
        let mut issues = Vec::new();

        if self.meshes.is_empty() {
            issues.push(AssetIssue::NoMeshes);
        }

        for (index, bone) in self.bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= index {
                    issues.push(AssetIssue::ParentAfterChild { bone: index, parent });
                }
            }

            for (action_index, action) in self.actions.iter().enumerate() {
                match bone.actions.get(action_index) {
                    Some(keys) if keys.positions.len() != keys.rotations.len() => {
                        issues.push(AssetIssue::MismatchedKeyCounts {
                            bone: index,
                            action: action_index,
                            positions: keys.positions.len(),
                            rotations: keys.rotations.len(),
                        });
                    }
                    Some(keys) if !keys.is_empty() => {}
                    _ if action.key_count > 0 => {
                        issues.push(AssetIssue::KeylessBone {
                            bone: index,
                            action: action_index,
                        });
                    }
                    _ => {}
                }
            }
        }

        let bone_count = self.bones.len();
        for (mesh_index, mesh) in self.meshes.iter().enumerate() {
            if let Some(vertex) = mesh
                .vertices
                .iter()
                .find(|vertex| usize::from(vertex.bone) >= bone_count.max(1))
            {
                issues.push(AssetIssue::VertexBoneOutOfRange {
                    mesh: mesh_index,
                    bone: vertex.bone,
                });
            }
        }

        issues
    }
}

/// Loaded models keyed by id. Assets are shared read-only across objects.
#[derive(Resource, Default)]
pub struct ModelLibrary {
    models: HashMap<ModelId, Arc<ModelAsset>>,
}

impl ModelLibrary {
    pub fn insert(&mut self, id: ModelId, asset: ModelAsset) -> Arc<ModelAsset> {
        let issues = asset.validate();
        if !issues.is_empty() {
            warn!(
                "Model '{}' ({:?}) loaded with {} inconsistencies: {:?}",
                asset.name,
                id,
                issues.len(),
                issues
            );
        }
        let asset = Arc::new(asset);
        self.models.insert(id, asset.clone());
        asset
    }

    pub fn get(&self, id: ModelId) -> Option<&Arc<ModelAsset>> {
        self.models.get(&id)
    }

    pub fn remove(&mut self, id: ModelId) -> Option<Arc<ModelAsset>> {
        self.models.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bone_model() -> ModelAsset {
        ModelAsset {
            name: "test".to_string(),
            bones: vec![
                Bone {
                    name: "root".to_string(),
                    parent: None,
                    actions: vec![BoneKeys {
                        positions: vec![Vec3::ZERO, Vec3::X, Vec3::ZERO],
                        rotations: vec![Quat::IDENTITY; 3],
                    }],
                },
                Bone {
                    name: "arm".to_string(),
                    parent: Some(0),
                    actions: vec![BoneKeys {
                        positions: vec![Vec3::Z; 3],
                        rotations: vec![Quat::IDENTITY; 2],
                    }],
                },
            ],
            actions: vec![Action {
                key_count: 3,
                ..Default::default()
            }],
            meshes: vec![MeshDesc::default()],
        }
    }

    #[test]
    fn clamp_action_picks_last_valid_index() {
        let model = two_bone_model();
        assert_eq!(model.clamp_action(0), Some(0));
        assert_eq!(model.clamp_action(17), Some(0));
        assert_eq!(ModelAsset::default().clamp_action(0), None);
    }

    #[test]
    fn loop_point_detected_from_root_displacement() {
        let model = two_bone_model();
        assert!(model.loop_restarts_early(0));
        assert!(!model.loop_restarts_early(1));
    }

    #[test]
    fn validate_reports_mismatched_key_counts() {
        let issues = two_bone_model().validate();
        assert_eq!(
            issues,
            vec![AssetIssue::MismatchedKeyCounts {
                bone: 1,
                action: 0,
                positions: 3,
                rotations: 2,
            }]
        );
    }

    #[test]
    fn validate_reports_parent_stored_after_child() {
        let mut model = two_bone_model();
        model.bones[0].parent = Some(1);
        assert!(
            model
                .validate()
                .contains(&AssetIssue::ParentAfterChild { bone: 0, parent: 1 })
        );
    }
}
