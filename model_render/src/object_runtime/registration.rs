use crate::animation::MatrixPool;
use crate::lighting::{BatchLightCache, LightingField};
use crate::model::ModelLibrary;
use crate::model::texture::TextureStreamer;
use crate::object_runtime::dirty::PendingInvalidations;
use crate::object_runtime::pipeline::ModelRenderPipeline;
use crate::object_runtime::systems::{
    BufferOwnership, animate_model_objects, apply_pending_invalidations, begin_model_frame,
    detect_object_changes, draw_model_objects, flush_static_instancing, poll_texture_loads,
    refresh_object_lighting, release_buffers_on_exit, release_despawned_buffers,
    resolve_mesh_textures, resolve_world_matrices,
};
use crate::render::{MeshGroups, RenderStats, StaticInstancingManager};
use crate::settings::RenderSettings;
use bevy::prelude::*;

/// Registers the model render frame. A `RenderBackend` and a `TextureLibrary`
/// are inserted by the host; without them drawing and texture binding are
/// skipped.
pub struct ModelRenderPlugin;

impl Plugin for ModelRenderPlugin {
    fn build(&self, app: &mut App) {
        let settings = app
            .world()
            .get_resource::<RenderSettings>()
            .cloned()
            .unwrap_or_default()
            .resolved();

        app.insert_resource(StaticInstancingManager::new(
            settings.instancing.enabled,
            settings.instancing.initial_instance_capacity,
        ))
        .insert_resource(settings)
        .init_resource::<ModelLibrary>()
        .init_resource::<TextureStreamer>()
        .init_resource::<MatrixPool>()
        .init_resource::<PendingInvalidations>()
        .init_resource::<MeshGroups>()
        .init_resource::<RenderStats>()
        .init_resource::<LightingField>()
        .init_resource::<BatchLightCache>()
        .init_resource::<BufferOwnership>()
        .configure_sets(
            Update,
            (
                ModelRenderPipeline::Prepare,
                ModelRenderPipeline::Animate,
                ModelRenderPipeline::Invalidate,
                ModelRenderPipeline::Lighting,
                ModelRenderPipeline::Draw,
                ModelRenderPipeline::Flush,
            )
                .chain(),
        )
        .add_systems(
            Update,
            (
                begin_model_frame,
                detect_object_changes,
                release_despawned_buffers,
                poll_texture_loads,
                resolve_mesh_textures,
            )
                .chain()
                .in_set(ModelRenderPipeline::Prepare),
        )
        .add_systems(
            Update,
            animate_model_objects.in_set(ModelRenderPipeline::Animate),
        )
        .add_systems(
            Update,
            (apply_pending_invalidations, resolve_world_matrices)
                .chain()
                .in_set(ModelRenderPipeline::Invalidate),
        )
        .add_systems(
            Update,
            refresh_object_lighting.in_set(ModelRenderPipeline::Lighting),
        )
        .add_systems(Update, draw_model_objects.in_set(ModelRenderPipeline::Draw))
        .add_systems(
            Update,
            flush_static_instancing.in_set(ModelRenderPipeline::Flush),
        )
        .add_systems(Last, release_buffers_on_exit);

        info!("Model render pipeline registered");
    }
}
