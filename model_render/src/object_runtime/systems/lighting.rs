use crate::lighting::{LightSelectionCache, LightingField, light_vector};
use crate::object_runtime::components::{ModelObject, ObjectLighting, ViewCulling, WorldMatrix};
use crate::object_runtime::dirty::{DirtyFlags, RenderDirty};
use crate::render::RenderStats;
use crate::settings::RenderSettings;
use bevy::prelude::*;

const LIGHT_EPSILON: f32 = 1e-4;

/// Refreshes the per-object light selection and light vector of visible
/// objects. A changed light vector marks the object's lighting dirty.
pub fn refresh_object_lighting(
    field: Res<LightingField>,
    settings: Res<RenderSettings>,
    mut stats: ResMut<RenderStats>,
    mut objects: Query<
        (
            &WorldMatrix,
            &ViewCulling,
            &mut LightSelectionCache,
            &mut ObjectLighting,
            &mut RenderDirty,
        ),
        With<ModelObject>,
    >,
) {
    let capacity = settings.lighting.max_object_lights;
    let zone_size = settings.lighting.influence_zone_size;

    for (world, culling, mut cache, mut lighting, mut dirty) in &mut objects {
        if !culling.is_visible() {
            stats.culled_objects += 1;
            continue;
        }

        let position = world.translation();
        if cache.refresh(&field, position, capacity, zone_size) {
            stats.light_scans += 1;
        }

        let light = light_vector(&field, position, cache.selection());
        if !lighting.light.abs_diff_eq(light, LIGHT_EPSILON) {
            lighting.light = light;
            dirty.mark(DirtyFlags::LIGHTING);
        }
    }
}
