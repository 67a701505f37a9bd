pub mod field;
pub mod selection;

pub use field::{AmbientSampler, ConstantAmbient, DynamicLightSnapshot, LightingField};
pub use selection::{
    BatchLightCache, LightSelection, LightSelectionCache, LightUniforms, MAX_SHADER_LIGHTS,
    ScoredLight, batch_influence, influence_zone, light_vector, object_influence,
    select_batch_lights, select_object_lights,
};
