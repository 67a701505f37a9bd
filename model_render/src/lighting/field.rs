use bevy::prelude::*;
use std::sync::Arc;

/// Read-only copy of one active point light for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicLightSnapshot {
    pub position: Vec3,
    pub color: Vec3,
    pub radius: f32,
    pub intensity: f32,
}

impl DynamicLightSnapshot {
    pub fn new(position: Vec3, color: Vec3, radius: f32, intensity: f32) -> Self {
        Self {
            position,
            color,
            radius,
            intensity,
        }
    }
}

/// Ambient light provider (terrain lightmap or similar), sampled on the
/// horizontal plane.
pub trait AmbientSampler: Send + Sync + 'static {
    fn ambient_at(&self, x: f32, y: f32) -> Vec3;
}

pub struct ConstantAmbient(pub Vec3);

impl AmbientSampler for ConstantAmbient {
    fn ambient_at(&self, _x: f32, _y: f32) -> Vec3 {
        self.0
    }
}

/// Active light set plus the ambient field.
///
/// `version` changes every time the active set is replaced; selection caches
/// compare against it.
#[derive(Resource, Clone)]
pub struct LightingField {
    lights: Vec<DynamicLightSnapshot>,
    version: u64,
    ambient: Arc<dyn AmbientSampler>,
}

impl Default for LightingField {
    fn default() -> Self {
        Self::new(Arc::new(ConstantAmbient(Vec3::splat(0.5))))
    }
}

impl LightingField {
    pub fn new(ambient: Arc<dyn AmbientSampler>) -> Self {
        Self {
            lights: Vec::new(),
            version: 0,
            ambient,
        }
    }

    pub fn active_lights(&self) -> &[DynamicLightSnapshot] {
        &self.lights
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_active_lights(&mut self, lights: Vec<DynamicLightSnapshot>) {
        self.lights = lights;
        self.version = self.version.wrapping_add(1);
    }

    pub fn set_ambient(&mut self, ambient: Arc<dyn AmbientSampler>) {
        self.ambient = ambient;
        self.version = self.version.wrapping_add(1);
    }

    pub fn ambient_at(&self, x: f32, y: f32) -> Vec3 {
        self.ambient.ambient_at(x, y)
    }
}
