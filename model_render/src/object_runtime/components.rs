use super::dirty::RenderDirty;
use crate::animation::{AnimationState, PlaybackRules};
use crate::lighting::LightSelectionCache;
use crate::model::ModelId;
use crate::model::texture::TextureBinding;
use crate::render::buffers::MeshBufferCache;
use bevy::prelude::*;

/// Monster action that plays the death clip and must hold its pose.
pub const MONSTER_DIE_ACTION: usize = 6;

// ============================================================================
// OBJECT IDENTITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Character,
    Monster,
    Npc,
    Equipment,
    Wing,
    MapObject,
    Effect,
}

impl ObjectKind {
    pub fn default_playback_rules(self) -> PlaybackRules {
        match self {
            ObjectKind::Monster => PlaybackRules::default().with_terminal(MONSTER_DIE_ACTION),
            _ => PlaybackRules::default(),
        }
    }

    /// Only static props placed by the map are ever batched.
    pub fn may_instance(self) -> bool {
        matches!(self, ObjectKind::MapObject)
    }

    pub fn animates_continuously(self) -> bool {
        matches!(self, ObjectKind::Wing | ObjectKind::Effect)
    }
}

/// A renderable instance of a loaded model.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelObject {
    pub model: ModelId,
    pub kind: ObjectKind,
}

/// How a child object derives its placement from its parent.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLink {
    /// Renders with the parent's bone array and world transform
    /// (armor pieces, robes).
    Pose,
    /// Rigidly attached to one of the parent's bones (weapons, wings).
    Bone(usize),
}

// ============================================================================
// EXTERNALLY SET STATE
// ============================================================================

#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct ObjectAppearance {
    pub tint: Vec3,
    pub alpha: f32,
    pub render_shadow: bool,
    /// Mesh index hidden by gameplay (e.g. helmet under a hood).
    pub hidden_mesh: Option<usize>,
}

impl Default for ObjectAppearance {
    fn default() -> Self {
        Self {
            tint: Vec3::ONE,
            alpha: 1.0,
            render_shadow: false,
            hidden_mesh: None,
        }
    }
}

impl ObjectAppearance {
    pub fn tint_with_alpha(&self) -> Vec4 {
        self.tint.extend(self.alpha)
    }

    pub fn is_opaque(&self) -> bool {
        self.alpha >= 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrustumTest {
    #[default]
    Inside,
    Outside,
    Intersects,
}

/// Frustum test result written by the camera system before the frame runs.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewCulling(pub FrustumTest);

impl ViewCulling {
    pub fn is_visible(&self) -> bool {
        self.0 != FrustumTest::Outside
    }
}

// ============================================================================
// DERIVED STATE
// ============================================================================

/// One world-space matrix per bone, owned by the animated object.
#[derive(Component, Debug, Clone, Default, PartialEq)]
pub struct BoneMatrices(pub Vec<Mat4>);

/// Resolved texture per mesh. `None` means not ready (or failed) this frame.
#[derive(Component, Debug, Clone, Default)]
pub struct MeshTextures {
    bindings: Vec<Option<TextureBinding>>,
}

impl MeshTextures {
    pub fn ensure_len(&mut self, mesh_count: usize) {
        if self.bindings.len() != mesh_count {
            self.bindings.resize(mesh_count, None);
        }
    }

    pub fn get(&self, mesh: usize) -> Option<TextureBinding> {
        self.bindings.get(mesh).copied().flatten()
    }

    pub fn set(&mut self, mesh: usize, binding: TextureBinding) {
        if let Some(slot) = self.bindings.get_mut(mesh) {
            *slot = Some(binding);
        }
    }

    pub fn bindings(&self) -> &[Option<TextureBinding>] {
        &self.bindings
    }

    pub fn is_complete(&self, mesh_count: usize) -> bool {
        self.bindings.len() == mesh_count && self.bindings.iter().all(Option::is_some)
    }
}

/// Ambient plus selected dynamic lights at the object's position.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq)]
pub struct ObjectLighting {
    pub light: Vec3,
}

#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct WorldMatrix(pub Mat4);

impl Default for WorldMatrix {
    fn default() -> Self {
        Self(Mat4::IDENTITY)
    }
}

impl WorldMatrix {
    pub fn translation(&self) -> Vec3 {
        self.0.w_axis.truncate()
    }
}

// ============================================================================
// BUNDLES
// ============================================================================

fn render_state_bundle(model: ModelId, kind: ObjectKind, transform: Transform) -> impl Bundle {
    (
        ModelObject { model, kind },
        RenderDirty::default(),
        ObjectAppearance::default(),
        ViewCulling::default(),
        MeshTextures::default(),
        MeshBufferCache::default(),
        LightSelectionCache::default(),
        ObjectLighting::default(),
        WorldMatrix::default(),
        transform,
    )
}

fn animation_bundle(kind: ObjectKind) -> impl Bundle {
    (
        AnimationState::new(0)
            .with_rules(kind.default_playback_rules())
            .with_continuous(kind.animates_continuously()),
        BoneMatrices::default(),
    )
}

/// Standalone object with its own animation.
pub fn model_object_bundle(model: ModelId, kind: ObjectKind, transform: Transform) -> impl Bundle {
    (
        render_state_bundle(model, kind, transform),
        animation_bundle(kind),
    )
}

/// Child that renders with its parent's pose. It never owns a bone array.
pub fn pose_linked_bundle(
    model: ModelId,
    kind: ObjectKind,
    parent: Entity,
    transform: Transform,
) -> impl Bundle {
    (
        render_state_bundle(model, kind, transform),
        ParentLink::Pose,
        ChildOf(parent),
    )
}

/// Child attached to one of the parent's bones, animated on its own.
pub fn bone_attached_bundle(
    model: ModelId,
    kind: ObjectKind,
    parent: Entity,
    bone: usize,
    transform: Transform,
) -> impl Bundle {
    (
        render_state_bundle(model, kind, transform),
        animation_bundle(kind),
        ParentLink::Bone(bone),
        ChildOf(parent),
    )
}
