pub mod backend;
pub mod buffers;
pub mod draw;
pub mod grouping;
pub mod instancing;
pub mod path;
pub mod recording;
pub mod stats;

pub use backend::{
    BufferHandle, DrawCall, GpuBackend, GpuError, GpuResult, InstanceData, InstancedDrawCall,
    RenderBackend, ShadowDrawCall, SkinnedVertex,
};
pub use buffers::{BufferUpdate, MeshBufferCache, MeshBufferEntry};
pub use grouping::{MeshGroups, RenderStateKey};
pub use instancing::{
    FlushOutcome, IneligibleReason, InstancingBatchKey, InstancingPhase, StaticInstancingManager,
    instancing_eligibility,
};
pub use path::{BlendMode, MeshShader, PathInputs, RenderPath, select_render_path};
pub use recording::{GpuCommand, RecordingBackend};
pub use stats::RenderStats;
