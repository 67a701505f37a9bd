use bevy::prelude::*;

/// Counters for the current frame. Reset when the frame begins.
#[derive(Resource, Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub pose_evaluations: usize,
    pub buffer_rebuilds: usize,
    pub draw_calls: usize,
    pub state_binds: usize,
    pub shadow_draws: usize,
    pub instanced_batches: usize,
    pub instances_drawn: usize,
    pub light_scans: usize,
    pub skipped_meshes: usize,
    pub failed_objects: usize,
    pub culled_objects: usize,
}

impl RenderStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
