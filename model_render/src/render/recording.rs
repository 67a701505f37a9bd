use super::backend::{
    BufferHandle, DrawCall, GpuBackend, GpuError, GpuResult, InstanceData, InstancedDrawCall,
    ShadowDrawCall, SkinnedVertex,
};
use super::grouping::RenderStateKey;
use crate::lighting::LightUniforms;
use bevy::prelude::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    CreateVertexBuffer { buffer: BufferHandle, vertex_count: usize },
    UpdateVertexBuffer { buffer: BufferHandle, vertex_count: usize },
    CreateIndexBuffer { buffer: BufferHandle, index_count: usize },
    CreateInstanceBuffer { buffer: BufferHandle, capacity: usize },
    WriteInstances { buffer: BufferHandle, instances: Vec<InstanceData> },
    UploadBones { count: usize },
    UploadLights { count: u32 },
    BindState(RenderStateKey),
    Draw(DrawCall),
    DrawInstanced(InstancedDrawCall),
    DrawShadow(ShadowDrawCall),
    Release(BufferHandle),
}

#[derive(Debug)]
enum BufferContents {
    Vertices(Vec<SkinnedVertex>),
    Indices(usize),
    Instances(usize),
}

#[derive(Debug, Default)]
struct RecorderState {
    commands: Vec<GpuCommand>,
    buffers: HashMap<BufferHandle, BufferContents>,
    next_handle: u64,
    fail_instanced_draws: bool,
    /// Instanced draws still accepted before they start failing.
    instanced_draws_left: Option<usize>,
    fail_allocations: bool,
}

impl RecorderState {
    fn allocate(&mut self, contents: BufferContents, bytes: usize) -> GpuResult<BufferHandle> {
        if self.fail_allocations {
            return Err(GpuError::OutOfMemory { bytes });
        }
        self.next_handle += 1;
        let handle = BufferHandle(self.next_handle);
        self.buffers.insert(handle, contents);
        Ok(handle)
    }
}

/// Headless backend that records every command.
///
/// Clones share the same log, so a test can keep one clone and hand the other
/// to the app.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    state: Arc<Mutex<RecorderState>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<GpuCommand> {
        self.state.lock().commands.clone()
    }

    pub fn take_commands(&self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.state.lock().commands)
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn vertices(&self, buffer: BufferHandle) -> Option<Vec<SkinnedVertex>> {
        match self.state.lock().buffers.get(&buffer) {
            Some(BufferContents::Vertices(vertices)) => Some(vertices.clone()),
            _ => None,
        }
    }

    pub fn fail_instanced_draws(&self, fail: bool) {
        self.state.lock().fail_instanced_draws = fail;
    }

    /// Accepts `count` more instanced draws, then rejects every later one.
    pub fn fail_instanced_draws_after(&self, count: usize) {
        self.state.lock().instanced_draws_left = Some(count);
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.state.lock().fail_allocations = fail;
    }
}

impl GpuBackend for RecordingBackend {
    fn create_vertex_buffer(&mut self, vertices: &[SkinnedVertex]) -> GpuResult<BufferHandle> {
        let mut state = self.state.lock();
        let bytes = std::mem::size_of_val(vertices);
        let buffer = state.allocate(BufferContents::Vertices(vertices.to_vec()), bytes)?;
        state.commands.push(GpuCommand::CreateVertexBuffer {
            buffer,
            vertex_count: vertices.len(),
        });
        Ok(buffer)
    }

    fn update_vertex_buffer(
        &mut self,
        buffer: BufferHandle,
        vertices: &[SkinnedVertex],
    ) -> GpuResult<()> {
        let mut state = self.state.lock();
        match state.buffers.get_mut(&buffer) {
            Some(BufferContents::Vertices(stored)) => {
                stored.clear();
                stored.extend_from_slice(vertices);
            }
            _ => return Err(GpuError::UnknownBuffer(buffer)),
        }
        state.commands.push(GpuCommand::UpdateVertexBuffer {
            buffer,
            vertex_count: vertices.len(),
        });
        Ok(())
    }

    fn create_index_buffer(&mut self, indices: &[u32]) -> GpuResult<BufferHandle> {
        let mut state = self.state.lock();
        let bytes = std::mem::size_of_val(indices);
        let buffer = state.allocate(BufferContents::Indices(indices.len()), bytes)?;
        state.commands.push(GpuCommand::CreateIndexBuffer {
            buffer,
            index_count: indices.len(),
        });
        Ok(buffer)
    }

    fn create_instance_buffer(&mut self, capacity: usize) -> GpuResult<BufferHandle> {
        let mut state = self.state.lock();
        let bytes = capacity * std::mem::size_of::<InstanceData>();
        let buffer = state.allocate(BufferContents::Instances(capacity), bytes)?;
        state
            .commands
            .push(GpuCommand::CreateInstanceBuffer { buffer, capacity });
        Ok(buffer)
    }

    fn write_instances(
        &mut self,
        buffer: BufferHandle,
        instances: &[InstanceData],
    ) -> GpuResult<()> {
        let mut state = self.state.lock();
        match state.buffers.get(&buffer) {
            Some(BufferContents::Instances(capacity)) if *capacity >= instances.len() => {}
            Some(BufferContents::Instances(_)) => {
                return Err(GpuError::DrawRejected(format!(
                    "{} instances overflow buffer {:?}",
                    instances.len(),
                    buffer
                )));
            }
            _ => return Err(GpuError::UnknownBuffer(buffer)),
        }
        state.commands.push(GpuCommand::WriteInstances {
            buffer,
            instances: instances.to_vec(),
        });
        Ok(())
    }

    fn upload_bone_matrices(&mut self, bones: &[Mat4]) -> GpuResult<()> {
        self.state
            .lock()
            .commands
            .push(GpuCommand::UploadBones { count: bones.len() });
        Ok(())
    }

    fn upload_lights(&mut self, lights: &LightUniforms) -> GpuResult<()> {
        self.state
            .lock()
            .commands
            .push(GpuCommand::UploadLights { count: lights.count });
        Ok(())
    }

    fn bind_state(&mut self, state: &RenderStateKey) -> GpuResult<()> {
        self.state.lock().commands.push(GpuCommand::BindState(*state));
        Ok(())
    }

    fn draw_indexed(&mut self, call: &DrawCall) -> GpuResult<()> {
        let mut state = self.state.lock();
        for buffer in [call.vertex_buffer, call.index_buffer] {
            if !state.buffers.contains_key(&buffer) {
                return Err(GpuError::UnknownBuffer(buffer));
            }
        }
        state.commands.push(GpuCommand::Draw(*call));
        Ok(())
    }

    fn draw_instanced(&mut self, call: &InstancedDrawCall) -> GpuResult<()> {
        let mut state = self.state.lock();
        if state.fail_instanced_draws || state.instanced_draws_left == Some(0) {
            return Err(GpuError::DrawRejected("instanced draw failed".to_string()));
        }
        if let Some(left) = state.instanced_draws_left.as_mut() {
            *left -= 1;
        }
        state.commands.push(GpuCommand::DrawInstanced(*call));
        Ok(())
    }

    fn draw_shadow(&mut self, call: &ShadowDrawCall) -> GpuResult<()> {
        self.state.lock().commands.push(GpuCommand::DrawShadow(*call));
        Ok(())
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        if state.buffers.remove(&buffer).is_some() {
            state.commands.push(GpuCommand::Release(buffer));
        }
    }
}
