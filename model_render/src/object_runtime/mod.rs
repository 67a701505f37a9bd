pub mod components;
pub mod dirty;
pub mod pipeline;
pub mod registration;
pub mod systems;
pub mod transforms;

pub use components::{
    BoneMatrices, FrustumTest, MeshTextures, ModelObject, ObjectAppearance, ObjectKind,
    ObjectLighting, ParentLink, ViewCulling, WorldMatrix, bone_attached_bundle,
    model_object_bundle, pose_linked_bundle,
};
pub use dirty::{DirtyFlags, PendingInvalidations, RenderDirty, invalidate_hierarchy};
pub use pipeline::ModelRenderPipeline;
pub use registration::ModelRenderPlugin;
pub use systems::BufferOwnership;
