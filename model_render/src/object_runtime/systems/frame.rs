use crate::object_runtime::components::{ModelObject, ObjectAppearance};
use crate::object_runtime::dirty::{DirtyFlags, PendingInvalidations};
use crate::render::{RenderStats, StaticInstancingManager};
use bevy::prelude::*;

/// Resets per-frame counters and opens the instancing batches for collection.
pub fn begin_model_frame(
    mut stats: ResMut<RenderStats>,
    mut instancing: ResMut<StaticInstancingManager>,
) {
    stats.reset();
    instancing.begin_frame();
}

/// Turns externally written object state into dirty requests.
pub fn detect_object_changes(
    objects: Query<(Entity, Ref<Transform>, Ref<ObjectAppearance>), With<ModelObject>>,
    mut pending: ResMut<PendingInvalidations>,
) {
    for (entity, transform, appearance) in &objects {
        // Fresh objects start fully dirty.
        if transform.is_added() || appearance.is_added() {
            continue;
        }

        let mut flags = DirtyFlags::empty();
        if transform.is_changed() {
            flags |= DirtyFlags::TRANSFORM;
        }
        if appearance.is_changed() {
            // Tint feeds the baked vertex colors; the hidden mesh changes grouping.
            flags |= DirtyFlags::LIGHTING | DirtyFlags::TEXTURE;
        }
        pending.push(entity, flags);
    }
}
