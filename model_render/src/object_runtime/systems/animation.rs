use crate::animation::{AnimationClock, AnimationState, MatrixPool};
use crate::model::ModelLibrary;
use crate::object_runtime::components::{BoneMatrices, ModelObject, ViewCulling};
use crate::object_runtime::dirty::{DirtyFlags, PendingInvalidations};
use crate::render::RenderStats;
use crate::settings::RenderSettings;
use bevy::prelude::*;

/// Advances every animated object and refreshes its bone array. A pose that
/// actually changed is reported for dirty propagation.
pub fn animate_model_objects(
    time: Res<Time>,
    settings: Res<RenderSettings>,
    models: Res<ModelLibrary>,
    mut pool: ResMut<MatrixPool>,
    mut pending: ResMut<PendingInvalidations>,
    mut stats: ResMut<RenderStats>,
    mut objects: Query<(
        Entity,
        &ModelObject,
        &mut AnimationState,
        &mut BoneMatrices,
        &ViewCulling,
    )>,
) {
    let clock = AnimationClock {
        delta_secs: time.delta_secs(),
        speed_multiplier: settings.animation.speed_multiplier,
        blend_duration: settings.animation.blend_duration_secs,
    };

    for (entity, object, mut state, mut bones, culling) in &mut objects {
        let Some(model) = models.get(object.model) else {
            continue;
        };

        if bones.0.len() != model.bone_count() {
            bones.0.clear();
            bones.0.resize(model.bone_count(), Mat4::IDENTITY);
            state.invalidate_sample();
        }

        if !culling.is_visible() {
            // Keep the clock running; the pose is evaluated once visible again.
            state.advance(model, &clock);
            state.invalidate_sample();
            continue;
        }

        let evaluations = state.pose_evaluations();
        let changed = state.animate(model, &clock, &mut bones.0, &mut pool);
        stats.pose_evaluations += (state.pose_evaluations() - evaluations) as usize;

        if changed {
            pending.push(entity, DirtyFlags::ANIMATION);
        }
    }
}
