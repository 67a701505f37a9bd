use super::backend::{BufferHandle, GpuBackend, GpuError, GpuResult, SkinnedVertex};
use super::path::RenderPath;
use crate::model::MeshDesc;
use crate::object_runtime::dirty::DirtyFlags;
use bevy::prelude::*;

/// Light and tint closer than this count as unchanged for the rebuild gate.
const COLOR_EPSILON: f32 = 1e-4;

/// GPU buffers last built for one mesh of one object.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeshBufferEntry {
    pub vertex_buffer: Option<BufferHandle>,
    pub index_buffer: Option<BufferHandle>,
    pub index_count: u32,
    pub light: Vec3,
    pub tint: Vec4,
    pub valid: bool,
    /// Buffer holds unskinned vertices for GPU skinning or instancing.
    pub bind_pose: bool,
    /// The mesh sat out a frame that changed the pose.
    pub pose_stale: bool,
}

pub struct MeshBuildInputs<'a> {
    pub mesh: &'a MeshDesc,
    pub bones: &'a [Mat4],
    pub path: RenderPath,
    pub light: Vec3,
    pub tint: Vec4,
    pub dirty: DirtyFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUpdate {
    Reused,
    Rebuilt,
}

impl MeshBufferEntry {
    pub fn needs_rebuild(&self, inputs: &MeshBuildInputs) -> bool {
        let bind_pose = inputs.path.uses_bind_pose_buffers();
        if !self.valid
            || self.vertex_buffer.is_none()
            || self.index_buffer.is_none()
            || self.bind_pose != bind_pose
        {
            return true;
        }

        // Bind-pose vertices depend on nothing but the mesh.
        if bind_pose {
            return false;
        }

        if self.pose_stale || inputs.dirty.contains(DirtyFlags::ANIMATION) {
            return true;
        }

        if inputs
            .dirty
            .intersects(DirtyFlags::LIGHTING | DirtyFlags::TRANSFORM)
        {
            return !(self.light.abs_diff_eq(inputs.light, COLOR_EPSILON)
                && self.tint.abs_diff_eq(inputs.tint, COLOR_EPSILON));
        }

        false
    }

    pub fn draw_buffers(&self) -> Option<(BufferHandle, BufferHandle, u32)> {
        if !self.valid {
            return None;
        }
        Some((self.vertex_buffer?, self.index_buffer?, self.index_count))
    }
}

/// Per-object mesh buffers, rebuilt only when the dirty flags say so.
#[derive(Component, Debug, Default)]
pub struct MeshBufferCache {
    entries: Vec<MeshBufferEntry>,
    rebuilds: u64,
    allocations_changed: bool,
}

impl MeshBufferCache {
    /// Sizes the cache to the model's mesh count, releasing surplus entries.
    pub fn prepare(&mut self, backend: &mut dyn GpuBackend, mesh_count: usize) {
        if self.entries.len() > mesh_count {
            for entry in self.entries.drain(mesh_count..) {
                release_entry(backend, &entry);
            }
            self.allocations_changed = true;
        }
        self.entries.resize(mesh_count, MeshBufferEntry::default());
    }

    pub fn entry(&self, mesh: usize) -> Option<&MeshBufferEntry> {
        self.entries.get(mesh)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn update_mesh(
        &mut self,
        backend: &mut dyn GpuBackend,
        index: usize,
        inputs: &MeshBuildInputs,
    ) -> GpuResult<BufferUpdate> {
        let Some(entry) = self.entries.get_mut(index) else {
            return Err(GpuError::DrawRejected(format!(
                "mesh {index} has no buffer entry"
            )));
        };

        if !entry.needs_rebuild(inputs) {
            return Ok(BufferUpdate::Reused);
        }

        entry.valid = false;
        let bind_pose = inputs.path.uses_bind_pose_buffers();
        let vertices = if bind_pose {
            bind_pose_vertices(inputs.mesh)
        } else {
            skin_vertices(inputs.mesh, inputs.bones, inputs.light, inputs.tint)
        };

        match entry.vertex_buffer {
            Some(buffer) => backend.update_vertex_buffer(buffer, &vertices)?,
            None => {
                entry.vertex_buffer = Some(backend.create_vertex_buffer(&vertices)?);
                self.allocations_changed = true;
            }
        }

        if entry.index_buffer.is_none() {
            entry.index_buffer = Some(backend.create_index_buffer(&inputs.mesh.indices)?);
            entry.index_count = inputs.mesh.indices.len() as u32;
            self.allocations_changed = true;
        }

        entry.light = inputs.light;
        entry.tint = inputs.tint;
        entry.bind_pose = bind_pose;
        entry.pose_stale = false;
        entry.valid = true;
        self.rebuilds += 1;
        Ok(BufferUpdate::Rebuilt)
    }

    /// Records a mesh that was not drawn this frame. A pose change it missed
    /// forces a CPU rebuild the next time it is drawn.
    pub fn skip_mesh(&mut self, index: usize, dirty: DirtyFlags) {
        if !dirty.contains(DirtyFlags::ANIMATION) {
            return;
        }
        if let Some(entry) = self.entries.get_mut(index) {
            entry.pose_stale = true;
        }
    }

    /// Forces every mesh to rebuild on its next draw.
    pub fn invalidate(&mut self) {
        for entry in &mut self.entries {
            entry.valid = false;
        }
    }

    pub fn handles(&self) -> Vec<BufferHandle> {
        self.entries
            .iter()
            .flat_map(|entry| [entry.vertex_buffer, entry.index_buffer])
            .flatten()
            .collect()
    }

    /// True once after buffers were created or released.
    pub fn take_allocations_changed(&mut self) -> bool {
        std::mem::take(&mut self.allocations_changed)
    }

    pub fn release_all(&mut self, backend: &mut dyn GpuBackend) {
        for entry in self.entries.drain(..) {
            release_entry(backend, &entry);
        }
        self.allocations_changed = true;
    }
}

fn release_entry(backend: &mut dyn GpuBackend, entry: &MeshBufferEntry) {
    for buffer in [entry.vertex_buffer, entry.index_buffer].into_iter().flatten() {
        backend.release_buffer(buffer);
    }
}

/// CPU skinning: each vertex moved by its bone matrix, lighting and tint baked
/// into the vertex color. Vertices naming a missing bone stay in place.
pub fn skin_vertices(mesh: &MeshDesc, bones: &[Mat4], light: Vec3, tint: Vec4) -> Vec<SkinnedVertex> {
    let color = (light * tint.truncate()).extend(tint.w);
    mesh.vertices
        .iter()
        .map(|vertex| {
            let bone = bones
                .get(usize::from(vertex.bone))
                .copied()
                .unwrap_or(Mat4::IDENTITY);
            SkinnedVertex {
                position: bone.transform_point3(vertex.position),
                normal: bone.transform_vector3(vertex.normal).normalize_or_zero(),
                uv: vertex.uv,
                color,
                bone: u32::from(vertex.bone),
            }
        })
        .collect()
}

pub fn bind_pose_vertices(mesh: &MeshDesc) -> Vec<SkinnedVertex> {
    mesh.vertices
        .iter()
        .map(|vertex| SkinnedVertex {
            position: vertex.position,
            normal: vertex.normal,
            uv: vertex.uv,
            color: Vec4::ONE,
            bone: u32::from(vertex.bone),
        })
        .collect()
}
