mod animation;
mod draw;
mod frame;
mod hierarchy;
mod lighting;
mod textures;

pub use animation::animate_model_objects;
pub use draw::{
    BufferOwnership, draw_model_objects, flush_static_instancing, release_buffers_on_exit,
    release_despawned_buffers,
};
pub use frame::{begin_model_frame, detect_object_changes};
pub use hierarchy::{apply_pending_invalidations, pose_bones, resolve_world_matrices};
pub use lighting::refresh_object_lighting;
pub use textures::{poll_texture_loads, resolve_mesh_textures};
