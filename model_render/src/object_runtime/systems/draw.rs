use super::hierarchy::pose_bones;
use crate::lighting::{BatchLightCache, LightSelectionCache, LightUniforms, LightingField};
use crate::model::ModelLibrary;
use crate::object_runtime::components::{
    BoneMatrices, MeshTextures, ModelObject, ObjectAppearance, ObjectLighting, ParentLink,
    ViewCulling, WorldMatrix,
};
use crate::object_runtime::dirty::RenderDirty;
use crate::render::draw::{DrawTarget, draw_object, queue_instanced_object};
use crate::render::instancing::{EligibilityInputs, instancing_eligibility};
use crate::render::{
    BufferHandle, GpuBackend, GpuResult, MeshBufferCache, MeshGroups, MeshShader, PathInputs,
    RenderBackend, RenderStats, StaticInstancingManager,
};
use crate::settings::RenderSettings;
use bevy::prelude::*;
use std::collections::HashMap;

/// GPU buffers owned by each live object, kept outside the entity so they can
/// be released after it despawns.
#[derive(Resource, Debug, Default)]
pub struct BufferOwnership {
    owned: HashMap<Entity, Vec<BufferHandle>>,
}

impl BufferOwnership {
    pub fn track(&mut self, entity: Entity, handles: Vec<BufferHandle>) {
        if handles.is_empty() {
            self.owned.remove(&entity);
        } else {
            self.owned.insert(entity, handles);
        }
    }

    pub fn release(&mut self, entity: Entity) -> Vec<BufferHandle> {
        self.owned.remove(&entity).unwrap_or_default()
    }

    pub fn owned_by(&self, entity: Entity) -> &[BufferHandle] {
        self.owned.get(&entity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }

    pub fn clear(&mut self) {
        self.owned.clear();
    }
}

type DrawItem = (
    Entity,
    &'static ModelObject,
    &'static WorldMatrix,
    &'static ObjectAppearance,
    &'static MeshTextures,
    &'static ObjectLighting,
    &'static LightSelectionCache,
    &'static ViewCulling,
    &'static mut RenderDirty,
    &'static mut MeshBufferCache,
    Option<&'static ParentLink>,
    Option<&'static Children>,
);

/// Shared per-frame state for drawing one object.
struct FrameDraw<'a> {
    backend: &'a mut dyn GpuBackend,
    groups: &'a mut MeshGroups,
    stats: &'a mut RenderStats,
    ownership: &'a mut BufferOwnership,
    field: &'a LightingField,
    settings: &'a RenderSettings,
    models: &'a ModelLibrary,
}

fn draw_entity(
    frame: &mut FrameDraw,
    instancing: Option<&mut StaticInstancingManager>,
    item: DrawItemMut,
    bones: &[Mat4],
    only_meshes: Option<&[usize]>,
) {
    let DrawItemMut {
        entity,
        object,
        world,
        appearance,
        textures,
        lighting,
        light_cache,
        link,
        has_children,
        dirty,
        cache,
    } = item;

    let Some(model) = frame.models.get(object.model) else {
        return;
    };

    let instancing_enabled = instancing.as_ref().is_some_and(|manager| manager.is_enabled());
    let eligible = instancing_enabled
        && instancing_eligibility(&EligibilityInputs {
            kind: object.kind,
            model,
            has_children,
            parent_linked: link.is_some(),
            alpha: appearance.alpha,
            textures: textures.bindings(),
            hidden_mesh: appearance.hidden_mesh,
        })
        .is_ok();

    let lights = LightUniforms::from_selection(frame.field.active_lights(), light_cache.selection());
    let target = DrawTarget {
        model_id: object.model,
        model,
        world: world.0,
        appearance,
        textures,
        bones,
        lights: &lights,
        light: lighting.light,
        dirty: dirty.flags(),
        path_inputs: PathInputs {
            instancing_eligible: eligible,
            instancing_enabled,
            gpu_skinning: frame.settings.skinning.gpu_skinning,
            bone_count: bones.len(),
            max_gpu_bones: frame.settings.skinning.max_gpu_bones,
            shader: MeshShader::Standard,
        },
        only_meshes,
    };

    let result: GpuResult<()> = match instancing {
        Some(manager) if eligible => {
            match queue_instanced_object(manager, frame.backend, cache, entity, &target, frame.stats)
            {
                Ok(true) => Ok(()),
                Ok(false) => draw_object(frame.backend, frame.groups, cache, &target, frame.stats),
                Err(error) => Err(error),
            }
        }
        _ => draw_object(frame.backend, frame.groups, cache, &target, frame.stats),
    };

    match result {
        Ok(()) => {
            dirty.take();
        }
        Err(error) => {
            warn!("Object {:?} ({}) failed to draw: {}", entity, model.name, error);
            frame.stats.failed_objects += 1;
            cache.invalidate();
        }
    }

    if cache.take_allocations_changed() {
        frame.ownership.track(entity, cache.handles());
    }
}

struct DrawItemMut<'a> {
    entity: Entity,
    object: &'a ModelObject,
    world: &'a WorldMatrix,
    appearance: &'a ObjectAppearance,
    textures: &'a MeshTextures,
    lighting: &'a ObjectLighting,
    light_cache: &'a LightSelectionCache,
    link: Option<&'a ParentLink>,
    has_children: bool,
    dirty: &'a mut RenderDirty,
    cache: &'a mut MeshBufferCache,
}

/// Draws every visible object, queueing static props into instancing batches.
pub fn draw_model_objects(
    backend: Option<ResMut<RenderBackend>>,
    models: Res<ModelLibrary>,
    field: Res<LightingField>,
    settings: Res<RenderSettings>,
    mut groups: ResMut<MeshGroups>,
    mut instancing: ResMut<StaticInstancingManager>,
    mut stats: ResMut<RenderStats>,
    mut ownership: ResMut<BufferOwnership>,
    mut objects: Query<DrawItem>,
    links: Query<(Option<&ParentLink>, Option<&ChildOf>)>,
    bones: Query<&BoneMatrices>,
) {
    let Some(mut backend) = backend else {
        return;
    };
    let mut frame = FrameDraw {
        backend: &mut **backend,
        groups: &mut groups,
        stats: &mut stats,
        ownership: &mut ownership,
        field: &field,
        settings: &settings,
        models: &models,
    };

    for (
        entity,
        object,
        world,
        appearance,
        textures,
        lighting,
        light_cache,
        culling,
        mut dirty,
        mut cache,
        link,
        children,
    ) in &mut objects
    {
        if !culling.is_visible() {
            continue;
        }
        let object_bones = pose_bones(entity, &links, &bones).unwrap_or(&[]);
        draw_entity(
            &mut frame,
            Some(&mut *instancing),
            DrawItemMut {
                entity,
                object,
                world,
                appearance,
                textures,
                lighting,
                light_cache,
                link,
                has_children: children.is_some_and(|children| !children.is_empty()),
                dirty: &mut dirty,
                cache: &mut cache,
            },
            object_bones,
            None,
        );
    }
}

/// Draws the collected batches. Object meshes of a batch that could not be
/// drawn go through the per-object path in the same frame.
pub fn flush_static_instancing(
    backend: Option<ResMut<RenderBackend>>,
    models: Res<ModelLibrary>,
    field: Res<LightingField>,
    settings: Res<RenderSettings>,
    mut groups: ResMut<MeshGroups>,
    mut instancing: ResMut<StaticInstancingManager>,
    mut batch_lights: ResMut<BatchLightCache>,
    mut stats: ResMut<RenderStats>,
    mut ownership: ResMut<BufferOwnership>,
    mut objects: Query<DrawItem>,
    links: Query<(Option<&ParentLink>, Option<&ChildOf>)>,
    bones: Query<&BoneMatrices>,
) {
    let Some(mut backend) = backend else {
        return;
    };

    if instancing.queued_instances() > 0
        && batch_lights.refresh(&field, settings.lighting.max_batch_lights)
    {
        stats.light_scans += 1;
    }
    let outcome = instancing.flush(&mut **backend, batch_lights.uniforms());
    stats.instanced_batches += outcome.batches_drawn;
    stats.instances_drawn += outcome.instances_drawn;
    if outcome.fallback.is_empty() {
        return;
    }

    let mut frame = FrameDraw {
        backend: &mut **backend,
        groups: &mut groups,
        stats: &mut stats,
        ownership: &mut ownership,
        field: &field,
        settings: &settings,
        models: &models,
    };

    let mut fallback = outcome.fallback;
    fallback.sort_unstable();
    fallback.dedup();
    for run in fallback.chunk_by(|a, b| a.0 == b.0) {
        let meshes: Vec<usize> = run.iter().map(|&(_, mesh)| mesh).collect();
        let Ok((
            entity,
            object,
            world,
            appearance,
            textures,
            lighting,
            light_cache,
            _,
            mut dirty,
            mut cache,
            link,
            children,
        )) = objects.get_mut(run[0].0)
        else {
            continue;
        };
        let object_bones = pose_bones(entity, &links, &bones).unwrap_or(&[]);
        draw_entity(
            &mut frame,
            None,
            DrawItemMut {
                entity,
                object,
                world,
                appearance,
                textures,
                lighting,
                light_cache,
                link,
                has_children: children.is_some_and(|children| !children.is_empty()),
                dirty: &mut dirty,
                cache: &mut cache,
            },
            object_bones,
            Some(meshes.as_slice()),
        );
    }
}

/// Releases the buffers of objects that were despawned or lost their cache.
pub fn release_despawned_buffers(
    backend: Option<ResMut<RenderBackend>>,
    mut removed: RemovedComponents<MeshBufferCache>,
    mut ownership: ResMut<BufferOwnership>,
) {
    let Some(mut backend) = backend else {
        removed.clear();
        return;
    };

    let mut released = 0;
    for entity in removed.read() {
        for buffer in ownership.release(entity) {
            backend.release_buffer(buffer);
            released += 1;
        }
    }
    if released > 0 {
        debug!("Released {} buffers of despawned objects", released);
    }
}

/// Frees every buffer the frame still holds once the app is exiting.
pub fn release_buffers_on_exit(
    mut exits: MessageReader<AppExit>,
    backend: Option<ResMut<RenderBackend>>,
    mut instancing: ResMut<StaticInstancingManager>,
    mut ownership: ResMut<BufferOwnership>,
    mut caches: Query<&mut MeshBufferCache>,
) {
    if exits.read().last().is_none() {
        return;
    }
    let Some(mut backend) = backend else {
        return;
    };

    for mut cache in &mut caches {
        cache.release_all(&mut **backend);
    }
    ownership.clear();
    instancing.release(&mut **backend);
    info!("Released model render buffers on exit");
}
