use crate::model::MeshDesc;
use crate::model::texture::TextureBinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlendMode {
    Opaque,
    AlphaTest,
    AlphaBlend,
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MeshShader {
    Standard,
    /// Glow materials have their own program and are never grouped.
    Glow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPath {
    /// Bones applied on the CPU, lighting baked into vertex colors.
    CpuSkinned,
    /// Bind-pose buffers, bones and lights uploaded as uniforms.
    GpuSkinned,
    /// Bind-pose buffers drawn through a static instancing batch.
    Instanced,
}

impl RenderPath {
    pub fn uses_bind_pose_buffers(self) -> bool {
        !matches!(self, RenderPath::CpuSkinned)
    }
}

/// Everything the path decision depends on, captured for one mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathInputs {
    pub instancing_eligible: bool,
    pub instancing_enabled: bool,
    pub gpu_skinning: bool,
    pub bone_count: usize,
    pub max_gpu_bones: usize,
    pub shader: MeshShader,
}

/// Picks the cheapest legal path. Pure; evaluated fresh every draw.
pub fn select_render_path(inputs: &PathInputs) -> RenderPath {
    if inputs.instancing_eligible && inputs.instancing_enabled {
        return RenderPath::Instanced;
    }

    // The glow program has no skinning variant.
    if inputs.gpu_skinning
        && inputs.shader == MeshShader::Standard
        && inputs.bone_count <= inputs.max_gpu_bones
    {
        RenderPath::GpuSkinned
    } else {
        RenderPath::CpuSkinned
    }
}

pub fn mesh_shader(mesh: &MeshDesc) -> MeshShader {
    if mesh.glow {
        MeshShader::Glow
    } else {
        MeshShader::Standard
    }
}

/// Blend state of a mesh given its texture and the object's alpha.
pub fn mesh_blend_mode(binding: &TextureBinding, alpha: f32) -> BlendMode {
    if binding.flags.additive {
        BlendMode::Additive
    } else if alpha < 1.0 {
        BlendMode::AlphaBlend
    } else if binding.channels.has_alpha() {
        BlendMode::AlphaTest
    } else {
        BlendMode::Opaque
    }
}
