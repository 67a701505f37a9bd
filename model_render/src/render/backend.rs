//! The GPU seam. Everything above this module only deals in handles and
//! draw descriptors; a backend turns them into API calls.

use super::grouping::RenderStateKey;
use super::path::MeshShader;
use crate::lighting::LightUniforms;
use bevy::prelude::*;
use std::ops::{Deref, DerefMut};
use thiserror::Error;

pub type GpuResult<T> = Result<T, GpuError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("buffer allocation of {bytes} bytes failed")]
    OutOfMemory { bytes: usize },
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferHandle),
    #[error("draw rejected: {0}")]
    DrawRejected(String),
    #[error("device lost")]
    DeviceLost,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkinnedVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub color: Vec4,
    pub bone: u32,
}

/// Per-instance record of a static instancing batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceData {
    pub world: Mat4,
    /// RGB tint with the object's alpha in `w`.
    pub tint: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub world: Mat4,
    pub tint: Vec4,
    pub shader: MeshShader,
    pub gpu_skinned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstancedDrawCall {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub instance_buffer: BufferHandle,
    pub instance_count: u32,
    pub state: RenderStateKey,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowDrawCall {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub world: Mat4,
}

pub trait GpuBackend: Send + Sync + 'static {
    fn create_vertex_buffer(&mut self, vertices: &[SkinnedVertex]) -> GpuResult<BufferHandle>;

    fn update_vertex_buffer(
        &mut self,
        buffer: BufferHandle,
        vertices: &[SkinnedVertex],
    ) -> GpuResult<()>;

    fn create_index_buffer(&mut self, indices: &[u32]) -> GpuResult<BufferHandle>;

    /// Allocates room for `capacity` instance records.
    fn create_instance_buffer(&mut self, capacity: usize) -> GpuResult<BufferHandle>;

    fn write_instances(&mut self, buffer: BufferHandle, instances: &[InstanceData])
    -> GpuResult<()>;

    fn upload_bone_matrices(&mut self, bones: &[Mat4]) -> GpuResult<()>;

    fn upload_lights(&mut self, lights: &LightUniforms) -> GpuResult<()>;

    fn bind_state(&mut self, state: &RenderStateKey) -> GpuResult<()>;

    fn draw_indexed(&mut self, call: &DrawCall) -> GpuResult<()>;

    fn draw_instanced(&mut self, call: &InstancedDrawCall) -> GpuResult<()>;

    fn draw_shadow(&mut self, call: &ShadowDrawCall) -> GpuResult<()>;

    fn release_buffer(&mut self, buffer: BufferHandle);
}

/// The active backend for the frame thread.
#[derive(Resource)]
pub struct RenderBackend(pub Box<dyn GpuBackend>);

impl RenderBackend {
    pub fn new(backend: impl GpuBackend) -> Self {
        Self(Box::new(backend))
    }
}

impl Deref for RenderBackend {
    type Target = dyn GpuBackend;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for RenderBackend {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}
