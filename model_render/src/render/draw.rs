use super::backend::{DrawCall, GpuBackend, GpuResult, InstanceData, ShadowDrawCall};
use super::buffers::{BufferUpdate, MeshBufferCache, MeshBuildInputs};
use super::grouping::{MeshGroups, RenderStateKey};
use super::instancing::{BatchGeometry, InstancingBatchKey, StaticInstancingManager};
use super::path::{
    MeshShader, PathInputs, RenderPath, mesh_blend_mode, mesh_shader, select_render_path,
};
use super::stats::RenderStats;
use crate::lighting::LightUniforms;
use crate::model::{ModelAsset, ModelId};
use crate::object_runtime::components::{MeshTextures, ObjectAppearance};
use crate::object_runtime::dirty::DirtyFlags;
use bevy::prelude::*;

/// Everything one object contributes to a draw.
pub struct DrawTarget<'a> {
    pub model_id: ModelId,
    pub model: &'a ModelAsset,
    pub world: Mat4,
    pub appearance: &'a ObjectAppearance,
    pub textures: &'a MeshTextures,
    pub bones: &'a [Mat4],
    pub lights: &'a LightUniforms,
    pub light: Vec3,
    pub dirty: DirtyFlags,
    pub path_inputs: PathInputs,
    /// Restricts the draw to these meshes, used when part of an object was
    /// already drawn instanced.
    pub only_meshes: Option<&'a [usize]>,
}

/// Draws one object through the grouped per-object path: rebuild stale
/// buffers, bind each render state once, draw special meshes one by one.
pub fn draw_object(
    backend: &mut dyn GpuBackend,
    groups: &mut MeshGroups,
    cache: &mut MeshBufferCache,
    target: &DrawTarget,
    stats: &mut RenderStats,
) -> GpuResult<()> {
    if target.model.meshes.is_empty() {
        return Ok(());
    }

    cache.prepare(backend, target.model.meshes.len());
    groups.clear();

    let tint = target.appearance.tint_with_alpha();
    let mut uses_gpu_skinning = false;

    for (index, mesh) in target.model.meshes.iter().enumerate() {
        let requested = target.appearance.hidden_mesh != Some(index)
            && target
                .only_meshes
                .is_none_or(|meshes| meshes.contains(&index));
        if !requested {
            cache.skip_mesh(index, target.dirty);
            continue;
        }
        let Some(binding) = target.textures.get(index) else {
            stats.skipped_meshes += 1;
            cache.skip_mesh(index, target.dirty);
            continue;
        };
        if binding.flags.hidden {
            cache.skip_mesh(index, target.dirty);
            continue;
        }

        let shader = mesh_shader(mesh);
        let path = select_render_path(&PathInputs {
            instancing_eligible: false,
            shader,
            ..target.path_inputs
        });

        let update = cache.update_mesh(
            backend,
            index,
            &MeshBuildInputs {
                mesh,
                bones: target.bones,
                path,
                light: target.light,
                tint,
                dirty: target.dirty,
            },
        )?;
        if update == BufferUpdate::Rebuilt {
            stats.buffer_rebuilds += 1;
        }

        let key = RenderStateKey {
            texture: binding.handle,
            blend: mesh_blend_mode(&binding, target.appearance.alpha),
            two_sided: mesh.two_sided,
        };
        match shader {
            MeshShader::Standard => groups.push(key, index),
            MeshShader::Glow => groups.push_special(key, index),
        }
        uses_gpu_skinning |= path == RenderPath::GpuSkinned;
    }

    if uses_gpu_skinning {
        backend.upload_bone_matrices(target.bones)?;
        backend.upload_lights(target.lights)?;
    }

    for (key, meshes) in groups.groups() {
        backend.bind_state(&key)?;
        stats.state_binds += 1;
        for &mesh in meshes {
            draw_mesh(backend, cache, target, mesh, tint, stats)?;
        }
    }

    for &(key, mesh) in groups.special() {
        backend.bind_state(&key)?;
        stats.state_binds += 1;
        draw_mesh(backend, cache, target, mesh, tint, stats)?;
    }

    if target.appearance.render_shadow {
        let drawn = groups
            .groups()
            .flat_map(|(_, meshes)| meshes.iter().copied())
            .chain(groups.special().iter().map(|(_, mesh)| *mesh));
        for mesh in drawn {
            let Some((vertex_buffer, index_buffer, index_count)) =
                cache.entry(mesh).and_then(|entry| entry.draw_buffers())
            else {
                continue;
            };
            backend.draw_shadow(&ShadowDrawCall {
                vertex_buffer,
                index_buffer,
                index_count,
                world: target.world,
            })?;
            stats.shadow_draws += 1;
        }
    }

    Ok(())
}

fn draw_mesh(
    backend: &mut dyn GpuBackend,
    cache: &MeshBufferCache,
    target: &DrawTarget,
    mesh: usize,
    tint: Vec4,
    stats: &mut RenderStats,
) -> GpuResult<()> {
    let Some(entry) = cache.entry(mesh) else {
        return Ok(());
    };
    let Some((vertex_buffer, index_buffer, index_count)) = entry.draw_buffers() else {
        return Ok(());
    };

    backend.draw_indexed(&DrawCall {
        vertex_buffer,
        index_buffer,
        index_count,
        world: target.world,
        tint,
        shader: mesh_shader(&target.model.meshes[mesh]),
        gpu_skinned: entry.bind_pose,
    })?;
    stats.draw_calls += 1;
    Ok(())
}

/// Builds bind-pose buffers for every mesh and queues one instance record per
/// mesh. Returns false when the manager refused the object.
pub fn queue_instanced_object(
    manager: &mut StaticInstancingManager,
    backend: &mut dyn GpuBackend,
    cache: &mut MeshBufferCache,
    entity: Entity,
    target: &DrawTarget,
    stats: &mut RenderStats,
) -> GpuResult<bool> {
    if !manager.is_enabled() {
        return Ok(false);
    }

    cache.prepare(backend, target.model.meshes.len());
    let tint = target.appearance.tint_with_alpha();
    let mut records = Vec::with_capacity(target.model.meshes.len());

    for (index, mesh) in target.model.meshes.iter().enumerate() {
        let Some(binding) = target.textures.get(index) else {
            return Ok(false);
        };

        let update = cache.update_mesh(
            backend,
            index,
            &MeshBuildInputs {
                mesh,
                bones: target.bones,
                path: RenderPath::Instanced,
                light: target.light,
                tint,
                dirty: target.dirty,
            },
        )?;
        if update == BufferUpdate::Rebuilt {
            stats.buffer_rebuilds += 1;
        }

        let Some((vertex_buffer, index_buffer, index_count)) =
            cache.entry(index).and_then(|entry| entry.draw_buffers())
        else {
            return Ok(false);
        };

        records.push((
            InstancingBatchKey {
                model: target.model_id,
                mesh: index,
                texture: binding.handle,
                two_sided: mesh.two_sided,
            },
            BatchGeometry {
                vertex_buffer,
                index_buffer,
                index_count,
            },
        ));
    }

    let instance = InstanceData {
        world: target.world,
        tint,
    };
    for (key, geometry) in records {
        if !manager.queue(key, entity, geometry, target.bones, instance) {
            return Ok(false);
        }
    }
    Ok(true)
}
