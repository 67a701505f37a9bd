use super::backend::{
    BufferHandle, GpuBackend, GpuResult, InstanceData, InstancedDrawCall,
};
use super::grouping::RenderStateKey;
use super::path::{BlendMode, MeshShader, mesh_blend_mode, mesh_shader};
use crate::lighting::LightUniforms;
use crate::model::texture::{TextureBinding, TextureHandle};
use crate::model::{ModelAsset, ModelId};
use crate::object_runtime::components::ObjectKind;
use bevy::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    KindNeverInstanced,
    Animated,
    HasChildren,
    Translucent,
    ParentLinked,
    NoMeshes,
    TextureNotReady(usize),
    MeshHidden(usize),
    MeshNotOpaque(usize),
    MeshSpecialShader(usize),
}

pub struct EligibilityInputs<'a> {
    pub kind: ObjectKind,
    pub model: &'a ModelAsset,
    pub has_children: bool,
    pub parent_linked: bool,
    pub alpha: f32,
    pub textures: &'a [Option<TextureBinding>],
    pub hidden_mesh: Option<usize>,
}

/// Static-batch eligibility. An object whose textures are still loading is
/// not eligible yet and draws through the regular path meanwhile.
pub fn instancing_eligibility(inputs: &EligibilityInputs) -> Result<(), IneligibleReason> {
    if !inputs.kind.may_instance() {
        return Err(IneligibleReason::KindNeverInstanced);
    }
    if inputs.model.has_animated_actions() {
        return Err(IneligibleReason::Animated);
    }
    if inputs.has_children {
        return Err(IneligibleReason::HasChildren);
    }
    if inputs.alpha < 1.0 {
        return Err(IneligibleReason::Translucent);
    }
    if inputs.parent_linked {
        return Err(IneligibleReason::ParentLinked);
    }
    if inputs.model.meshes.is_empty() {
        return Err(IneligibleReason::NoMeshes);
    }

    for (index, mesh) in inputs.model.meshes.iter().enumerate() {
        if inputs.hidden_mesh == Some(index) {
            return Err(IneligibleReason::MeshHidden(index));
        }
        let Some(binding) = inputs.textures.get(index).copied().flatten() else {
            return Err(IneligibleReason::TextureNotReady(index));
        };
        if binding.flags.hidden {
            return Err(IneligibleReason::MeshHidden(index));
        }
        if mesh_blend_mode(&binding, inputs.alpha) != BlendMode::Opaque {
            return Err(IneligibleReason::MeshNotOpaque(index));
        }
        if mesh_shader(mesh) != MeshShader::Standard {
            return Err(IneligibleReason::MeshSpecialShader(index));
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstancingBatchKey {
    pub model: ModelId,
    pub mesh: usize,
    pub texture: TextureHandle,
    pub two_sided: bool,
}

/// Shared geometry of one batch, taken from the first queued object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchGeometry {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstancingPhase {
    #[default]
    Idle,
    Collecting,
    Flushed,
}

#[derive(Debug, Default)]
struct InstancingBatch {
    geometry: Option<BatchGeometry>,
    pose_source: Option<Entity>,
    pose: Vec<Mat4>,
    instances: Vec<InstanceData>,
    members: Vec<Entity>,
}

impl InstancingBatch {
    fn reset(&mut self) {
        self.geometry = None;
        self.pose_source = None;
        self.pose.clear();
        self.instances.clear();
        self.members.clear();
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    pub batches_drawn: usize,
    pub instances_drawn: usize,
    /// Object meshes whose batch could not be drawn; they go through the
    /// regular per-object path this frame.
    pub fallback: Vec<(Entity, usize)>,
}

/// Static-object instancing batches for the current frame.
#[derive(Resource, Debug)]
pub struct StaticInstancingManager {
    enabled: bool,
    phase: InstancingPhase,
    batches: BTreeMap<InstancingBatchKey, InstancingBatch>,
    instance_buffer: Option<BufferHandle>,
    instance_capacity: usize,
    initial_capacity: usize,
}

impl Default for StaticInstancingManager {
    fn default() -> Self {
        Self::new(true, 64)
    }
}

impl StaticInstancingManager {
    pub fn new(enabled: bool, initial_capacity: usize) -> Self {
        Self {
            enabled,
            phase: InstancingPhase::Idle,
            batches: BTreeMap::new(),
            instance_buffer: None,
            instance_capacity: 0,
            initial_capacity: initial_capacity.max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn phase(&self) -> InstancingPhase {
        self.phase
    }

    pub fn instance_capacity(&self) -> usize {
        self.instance_capacity
    }

    pub fn queued_instances(&self) -> usize {
        self.batches.values().map(|batch| batch.instances.len()).sum()
    }

    pub fn begin_frame(&mut self) {
        self.batches.retain(|_, batch| !batch.members.is_empty());
        for batch in self.batches.values_mut() {
            batch.reset();
        }
        self.phase = InstancingPhase::Collecting;
    }

    /// Adds one instance record. Returns false when instancing is off or the
    /// frame is not collecting, in which case the caller draws directly.
    pub fn queue(
        &mut self,
        key: InstancingBatchKey,
        entity: Entity,
        geometry: BatchGeometry,
        pose: &[Mat4],
        instance: InstanceData,
    ) -> bool {
        if !self.enabled || self.phase != InstancingPhase::Collecting {
            return false;
        }

        let batch = self.batches.entry(key).or_default();
        if batch.pose_source.is_none() {
            batch.pose_source = Some(entity);
            batch.geometry = Some(geometry);
            batch.pose.extend_from_slice(pose);
        }
        batch.instances.push(instance);
        if batch.members.last() != Some(&entity) {
            batch.members.push(entity);
        }
        true
    }

    /// Draws every non-empty batch. The first failure turns instancing off for
    /// the rest of the session and hands the undrawn objects back.
    pub fn flush(&mut self, backend: &mut dyn GpuBackend, lights: &LightUniforms) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        if self.phase != InstancingPhase::Collecting {
            return outcome;
        }
        self.phase = InstancingPhase::Flushed;

        if self.batches.values().all(|batch| batch.instances.is_empty()) {
            return outcome;
        }

        if let Err(error) = backend.upload_lights(lights) {
            self.disable(&error.to_string());
            outcome.fallback = self.all_members();
            return outcome;
        }

        let keys: Vec<InstancingBatchKey> = self.batches.keys().copied().collect();
        for (position, key) in keys.iter().enumerate() {
            match self.draw_batch(backend, key) {
                Ok(0) => {}
                Ok(count) => {
                    outcome.batches_drawn += 1;
                    outcome.instances_drawn += count;
                }
                Err(error) => {
                    self.disable(&error.to_string());
                    for pending in &keys[position..] {
                        if let Some(batch) = self.batches.get(pending) {
                            outcome
                                .fallback
                                .extend(batch.members.iter().map(|&entity| (entity, pending.mesh)));
                        }
                    }
                    break;
                }
            }
        }

        outcome
    }

    /// Releases the shared instance buffer.
    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(buffer) = self.instance_buffer.take() {
            backend.release_buffer(buffer);
        }
        self.instance_capacity = 0;
    }

    fn draw_batch(
        &mut self,
        backend: &mut dyn GpuBackend,
        key: &InstancingBatchKey,
    ) -> GpuResult<usize> {
        let Some((geometry, instance_count)) = self
            .batches
            .get(key)
            .and_then(|batch| Some((batch.geometry?, batch.instances.len())))
        else {
            return Ok(0);
        };
        if instance_count == 0 {
            return Ok(0);
        }

        let instance_buffer = self.ensure_instance_capacity(backend, instance_count)?;
        let Some(batch) = self.batches.get(key) else {
            return Ok(0);
        };

        backend.upload_bone_matrices(&batch.pose)?;
        backend.write_instances(instance_buffer, &batch.instances)?;
        backend.draw_instanced(&InstancedDrawCall {
            vertex_buffer: geometry.vertex_buffer,
            index_buffer: geometry.index_buffer,
            index_count: geometry.index_count,
            instance_buffer,
            instance_count: instance_count as u32,
            state: RenderStateKey {
                texture: key.texture,
                blend: BlendMode::Opaque,
                two_sided: key.two_sided,
            },
        })?;
        Ok(instance_count)
    }

    fn ensure_instance_capacity(
        &mut self,
        backend: &mut dyn GpuBackend,
        required: usize,
    ) -> GpuResult<BufferHandle> {
        if let Some(buffer) = self.instance_buffer {
            if self.instance_capacity >= required {
                return Ok(buffer);
            }
        }

        let capacity = required
            .max(self.initial_capacity)
            .max(self.instance_capacity * 2)
            .next_power_of_two();
        let buffer = backend.create_instance_buffer(capacity)?;
        if let Some(old) = self.instance_buffer.replace(buffer) {
            backend.release_buffer(old);
        }
        debug!("Instance buffer grown to {} records", capacity);
        self.instance_capacity = capacity;
        Ok(buffer)
    }

    fn disable(&mut self, reason: &str) {
        error!(
            "Static instancing failed ({}); disabling it for the rest of the session",
            reason
        );
        self.enabled = false;
    }

    fn all_members(&self) -> Vec<(Entity, usize)> {
        self.batches
            .iter()
            .flat_map(|(key, batch)| batch.members.iter().map(|&entity| (entity, key.mesh)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::texture::{TextureChannelInfo, TextureScriptFlags};
    use crate::model::{Action, MeshDesc};
    use crate::render::recording::{GpuCommand, RecordingBackend};

    fn prop() -> ModelAsset {
        ModelAsset {
            name: "tree".to_string(),
            bones: vec![],
            actions: vec![Action::default()],
            meshes: vec![MeshDesc::default(), MeshDesc::default()],
        }
    }

    fn opaque(handle: u64) -> Option<TextureBinding> {
        Some(TextureBinding {
            handle: TextureHandle(handle),
            flags: TextureScriptFlags::default(),
            channels: TextureChannelInfo::default(),
        })
    }

    fn eligibility<'a>(
        model: &'a ModelAsset,
        textures: &'a [Option<TextureBinding>],
    ) -> EligibilityInputs<'a> {
        EligibilityInputs {
            kind: ObjectKind::MapObject,
            model,
            has_children: false,
            parent_linked: false,
            alpha: 1.0,
            textures,
            hidden_mesh: None,
        }
    }

    fn key(mesh: usize) -> InstancingBatchKey {
        InstancingBatchKey {
            model: ModelId(7),
            mesh,
            texture: TextureHandle(mesh as u64 + 1),
            two_sided: false,
        }
    }

    fn geometry() -> BatchGeometry {
        BatchGeometry {
            vertex_buffer: BufferHandle(100),
            index_buffer: BufferHandle(101),
            index_count: 6,
        }
    }

    fn instance(x: f32) -> InstanceData {
        InstanceData {
            world: Mat4::from_translation(Vec3::new(x, 0.0, 0.0)),
            tint: Vec4::ONE,
        }
    }

    #[test]
    fn static_opaque_map_object_is_eligible() {
        let model = prop();
        let textures = [opaque(1), opaque(2)];
        assert_eq!(instancing_eligibility(&eligibility(&model, &textures)), Ok(()));
    }

    #[test]
    fn each_rule_rejects_on_its_own() {
        let model = prop();
        let textures = [opaque(1), opaque(2)];

        let mut inputs = eligibility(&model, &textures);
        inputs.kind = ObjectKind::Monster;
        assert_eq!(
            instancing_eligibility(&inputs),
            Err(IneligibleReason::KindNeverInstanced)
        );

        let mut inputs = eligibility(&model, &textures);
        inputs.has_children = true;
        assert_eq!(instancing_eligibility(&inputs), Err(IneligibleReason::HasChildren));

        let mut inputs = eligibility(&model, &textures);
        inputs.alpha = 0.5;
        assert_eq!(instancing_eligibility(&inputs), Err(IneligibleReason::Translucent));

        let mut inputs = eligibility(&model, &textures);
        inputs.parent_linked = true;
        assert_eq!(instancing_eligibility(&inputs), Err(IneligibleReason::ParentLinked));

        let mut inputs = eligibility(&model, &textures);
        inputs.hidden_mesh = Some(1);
        assert_eq!(instancing_eligibility(&inputs), Err(IneligibleReason::MeshHidden(1)));

        let alpha_tested = [
            opaque(1),
            Some(TextureBinding {
                handle: TextureHandle(2),
                flags: TextureScriptFlags::default(),
                channels: TextureChannelInfo { component_count: 4 },
            }),
        ];
        assert_eq!(
            instancing_eligibility(&eligibility(&model, &alpha_tested)),
            Err(IneligibleReason::MeshNotOpaque(1))
        );

        let loading = [opaque(1), None];
        assert_eq!(
            instancing_eligibility(&eligibility(&model, &loading)),
            Err(IneligibleReason::TextureNotReady(1))
        );

        let mut animated = prop();
        animated.actions.push(Action {
            key_count: 12,
            ..Default::default()
        });
        assert_eq!(
            instancing_eligibility(&eligibility(&animated, &textures)),
            Err(IneligibleReason::Animated)
        );
    }

    #[test]
    fn flush_draws_one_call_per_batch_and_grows_buffer() {
        let observer = RecordingBackend::new();
        let mut backend = observer.clone();
        let mut manager = StaticInstancingManager::new(true, 2);
        let pose = [Mat4::IDENTITY];
        let objects: Vec<Entity> = {
            let mut world = World::new();
            (0..5).map(|_| world.spawn_empty().id()).collect()
        };

        manager.begin_frame();
        for (index, entity) in objects.iter().enumerate() {
            assert!(manager.queue(key(0), *entity, geometry(), &pose, instance(index as f32)));
        }
        assert!(manager.queue(key(1), objects[0], geometry(), &pose, instance(0.0)));

        let outcome = manager.flush(&mut backend, &LightUniforms::default());
        assert_eq!(outcome.batches_drawn, 2);
        assert_eq!(outcome.instances_drawn, 6);
        assert!(outcome.fallback.is_empty());
        assert_eq!(manager.instance_capacity(), 8);
        assert_eq!(manager.phase(), InstancingPhase::Flushed);

        let commands = observer.commands();
        let draws = commands
            .iter()
            .filter(|command| matches!(command, GpuCommand::DrawInstanced(_)))
            .count();
        let pose_uploads = commands
            .iter()
            .filter(|command| matches!(command, GpuCommand::UploadBones { .. }))
            .count();
        assert_eq!(draws, 2);
        assert_eq!(pose_uploads, 2);

        // Next frame reuses the buffer.
        manager.begin_frame();
        manager.queue(key(0), objects[0], geometry(), &pose, instance(0.0));
        manager.flush(&mut backend, &LightUniforms::default());
        let allocations = observer
            .commands()
            .iter()
            .filter(|command| matches!(command, GpuCommand::CreateInstanceBuffer { .. }))
            .count();
        assert_eq!(allocations, 1);
    }

    #[test]
    fn draw_failure_disables_instancing_and_returns_pending_objects() {
        let observer = RecordingBackend::new();
        let mut backend = observer.clone();
        observer.fail_instanced_draws(true);
        let mut manager = StaticInstancingManager::new(true, 4);
        let mut world = World::new();
        let first = world.spawn_empty().id();
        let second = world.spawn_empty().id();

        manager.begin_frame();
        manager.queue(key(0), first, geometry(), &[], instance(0.0));
        manager.queue(key(1), second, geometry(), &[], instance(1.0));
        let outcome = manager.flush(&mut backend, &LightUniforms::default());

        assert!(!manager.is_enabled());
        assert_eq!(outcome.batches_drawn, 0);
        assert_eq!(outcome.fallback, vec![(first, 0), (second, 1)]);

        manager.begin_frame();
        assert!(!manager.queue(key(0), first, geometry(), &[], instance(0.0)));
    }

    #[test]
    fn late_failure_returns_only_the_undrawn_meshes() {
        let observer = RecordingBackend::new();
        let mut backend = observer.clone();
        observer.fail_instanced_draws_after(1);
        let mut manager = StaticInstancingManager::new(true, 4);
        let mut world = World::new();
        let first = world.spawn_empty().id();
        let second = world.spawn_empty().id();

        manager.begin_frame();
        for (index, entity) in [first, second].into_iter().enumerate() {
            manager.queue(key(0), entity, geometry(), &[], instance(index as f32));
            manager.queue(key(1), entity, geometry(), &[], instance(index as f32));
        }
        let outcome = manager.flush(&mut backend, &LightUniforms::default());

        assert!(!manager.is_enabled());
        assert_eq!(outcome.batches_drawn, 1);
        assert_eq!(outcome.instances_drawn, 2);
        assert_eq!(outcome.fallback, vec![(first, 1), (second, 1)]);
    }

    #[test]
    fn release_frees_the_instance_buffer() {
        let observer = RecordingBackend::new();
        let mut backend = observer.clone();
        let mut manager = StaticInstancingManager::new(true, 4);

        manager.begin_frame();
        manager.queue(key(0), Entity::PLACEHOLDER, geometry(), &[], instance(0.0));
        manager.flush(&mut backend, &LightUniforms::default());
        assert_eq!(observer.live_buffers(), 1);

        manager.release(&mut backend);
        assert_eq!(observer.live_buffers(), 0);
        assert_eq!(manager.instance_capacity(), 0);
    }

    #[test]
    fn queue_outside_collection_is_refused() {
        let mut manager = StaticInstancingManager::default();
        assert!(!manager.queue(key(0), Entity::PLACEHOLDER, geometry(), &[], instance(0.0)));
    }
}
