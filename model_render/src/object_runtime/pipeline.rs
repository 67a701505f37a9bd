use bevy::prelude::*;

/// Stages of one model render frame, chained in this order.
#[derive(SystemSet, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ModelRenderPipeline {
    Prepare,
    Animate,
    Invalidate,
    Lighting,
    Draw,
    Flush,
}
