use crate::model::ModelLibrary;
use crate::model::texture::{TextureLibrary, TextureLookup, TextureStreamer};
use crate::object_runtime::components::{MeshTextures, ModelObject, ViewCulling};
use crate::object_runtime::dirty::{DirtyFlags, RenderDirty};
use bevy::prelude::*;

/// Moves finished background loads into the texture cache on the frame thread.
pub fn poll_texture_loads(
    library: Option<Res<TextureLibrary>>,
    mut streamer: ResMut<TextureStreamer>,
    objects: Query<(), With<ModelObject>>,
) {
    let Some(library) = library else {
        return;
    };
    if streamer.pending() == 0 {
        return;
    }

    let report = streamer.poll(&library, |entity| objects.contains(entity));
    if !report.ready.is_empty() || report.discarded > 0 {
        debug!(
            "Texture loads: {} ready, {} failed, {} discarded, {} pending",
            report.ready.len(),
            report.failed,
            report.discarded,
            streamer.pending()
        );
    }
}

/// Binds cached textures to visible objects and requests the missing ones.
/// Meshes whose texture is still loading are skipped until it arrives.
pub fn resolve_mesh_textures(
    library: Option<Res<TextureLibrary>>,
    models: Res<ModelLibrary>,
    mut streamer: ResMut<TextureStreamer>,
    mut objects: Query<(
        Entity,
        &ModelObject,
        &ViewCulling,
        &mut MeshTextures,
        &mut RenderDirty,
    )>,
) {
    let Some(library) = library else {
        return;
    };

    for (entity, object, culling, mut textures, mut dirty) in &mut objects {
        if !culling.is_visible() {
            continue;
        }
        let Some(model) = models.get(object.model) else {
            continue;
        };
        let mesh_count = model.meshes.len();
        if textures.is_complete(mesh_count) {
            continue;
        }

        textures.ensure_len(mesh_count);
        let mut resolved_any = false;
        for (index, mesh) in model.meshes.iter().enumerate() {
            if textures.get(index).is_some() {
                continue;
            }
            match library.lookup(&mesh.texture_path) {
                TextureLookup::Ready(binding) => {
                    textures.set(index, binding);
                    resolved_any = true;
                }
                TextureLookup::Unknown => {
                    streamer.request(&library, &mesh.texture_path, entity);
                }
                TextureLookup::Loading | TextureLookup::Failed => {}
            }
        }

        if resolved_any {
            dirty.mark(DirtyFlags::TEXTURE);
        }
    }
}
