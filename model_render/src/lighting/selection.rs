use super::field::{DynamicLightSnapshot, LightingField};
use bevy::prelude::*;
use smallvec::SmallVec;

/// Size of the per-draw light arrays in the shaders.
pub const MAX_SHADER_LIGHTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredLight {
    /// Index into the active light list the selection was made from.
    pub index: usize,
    pub score: f32,
}

/// Running top-K over scored lights.
///
/// K never exceeds [`MAX_SHADER_LIGHTS`], so the entries live inline and the
/// weakest slot is found by a linear rescan after each replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct LightSelection {
    capacity: usize,
    entries: SmallVec<[ScoredLight; MAX_SHADER_LIGHTS]>,
    weakest: usize,
}

impl Default for LightSelection {
    fn default() -> Self {
        Self::with_capacity(4)
    }
}

impl LightSelection {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(1, MAX_SHADER_LIGHTS),
            entries: SmallVec::new(),
            weakest: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.weakest = 0;
    }

    pub fn entries(&self) -> &[ScoredLight] {
        &self.entries
    }

    pub fn weakest_score(&self) -> Option<f32> {
        self.entries.get(self.weakest).map(|entry| entry.score)
    }

    /// Offers one candidate. Returns whether it was kept.
    pub fn offer(&mut self, index: usize, score: f32) -> bool {
        if !score.is_finite() || score <= 0.0 {
            return false;
        }

        let candidate = ScoredLight { index, score };
        if self.entries.len() < self.capacity {
            self.entries.push(candidate);
            let last = self.entries.len() - 1;
            if last == 0 || score < self.entries[self.weakest].score {
                self.weakest = last;
            }
            return true;
        }

        if score <= self.entries[self.weakest].score {
            return false;
        }

        self.entries[self.weakest] = candidate;
        self.rescan_weakest();
        true
    }

    /// Entries sorted strongest first.
    pub fn ranked(&self) -> SmallVec<[ScoredLight; MAX_SHADER_LIGHTS]> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
        ranked
    }

    fn rescan_weakest(&mut self) {
        self.weakest = self
            .entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.score.total_cmp(&b.score))
            .map(|(index, _)| index)
            .unwrap_or(0);
    }
}

/// Distance-attenuated influence of a light on a point. Zero outside the radius.
pub fn object_influence(light: &DynamicLightSnapshot, position: Vec3) -> f32 {
    let radius_squared = light.radius * light.radius;
    if radius_squared <= 0.0 {
        return 0.0;
    }
    let distance_squared = light.position.distance_squared(position);
    if distance_squared >= radius_squared {
        return 0.0;
    }
    light.intensity * (1.0 - distance_squared / radius_squared)
}

/// Position-independent score used for instanced batches.
pub fn batch_influence(light: &DynamicLightSnapshot) -> f32 {
    light.radius * light.intensity
}

pub fn select_object_lights(
    lights: &[DynamicLightSnapshot],
    position: Vec3,
    capacity: usize,
) -> LightSelection {
    let mut selection = LightSelection::with_capacity(capacity);
    for (index, light) in lights.iter().enumerate() {
        selection.offer(index, object_influence(light, position));
    }
    selection
}

pub fn select_batch_lights(lights: &[DynamicLightSnapshot], capacity: usize) -> LightSelection {
    let mut selection = LightSelection::with_capacity(capacity);
    for (index, light) in lights.iter().enumerate() {
        selection.offer(index, batch_influence(light));
    }
    selection
}

pub fn influence_zone(position: Vec3, zone_size: f32) -> IVec3 {
    let zone_size = if zone_size.is_finite() && zone_size > 0.0 {
        zone_size
    } else {
        1.0
    };
    (position / zone_size).floor().as_ivec3()
}

/// Per-object selection, rescanned only when the active light set changes or
/// the object crosses into another influence zone.
#[derive(Component, Debug, Clone, Default)]
pub struct LightSelectionCache {
    key: Option<(u64, IVec3)>,
    selection: LightSelection,
    scans: u64,
}

impl LightSelectionCache {
    /// Returns true when a rescan happened.
    pub fn refresh(
        &mut self,
        field: &LightingField,
        position: Vec3,
        capacity: usize,
        zone_size: f32,
    ) -> bool {
        let key = (field.version(), influence_zone(position, zone_size));
        if self.key == Some(key) && self.selection.capacity() == capacity.clamp(1, MAX_SHADER_LIGHTS)
        {
            return false;
        }

        self.selection = select_object_lights(field.active_lights(), position, capacity);
        self.key = Some(key);
        self.scans += 1;
        true
    }

    pub fn selection(&self) -> &LightSelection {
        &self.selection
    }

    pub fn scans(&self) -> u64 {
        self.scans
    }

    pub fn invalidate(&mut self) {
        self.key = None;
    }
}

/// Lights shared by every instancing batch, rebuilt only when the active set
/// or the batch light budget changes.
#[derive(Resource, Debug, Clone, Default)]
pub struct BatchLightCache {
    key: Option<(u64, usize)>,
    uniforms: LightUniforms,
    scans: u64,
}

impl BatchLightCache {
    /// Returns true when a rescan happened.
    pub fn refresh(&mut self, field: &LightingField, capacity: usize) -> bool {
        let key = (field.version(), capacity);
        if self.key == Some(key) {
            return false;
        }

        let selection = select_batch_lights(field.active_lights(), capacity);
        self.uniforms = LightUniforms::from_selection(field.active_lights(), &selection);
        self.key = Some(key);
        self.scans += 1;
        true
    }

    pub fn uniforms(&self) -> &LightUniforms {
        &self.uniforms
    }

    pub fn scans(&self) -> u64 {
        self.scans
    }
}

/// Ambient at the object's horizontal position plus every selected light's
/// color weighted by its current influence.
pub fn light_vector(field: &LightingField, position: Vec3, selection: &LightSelection) -> Vec3 {
    let mut light = field.ambient_at(position.x, position.y);
    for entry in selection.entries() {
        if let Some(snapshot) = field.active_lights().get(entry.index) {
            light += snapshot.color * object_influence(snapshot, position);
        }
    }
    light
}

/// Fixed-size light arrays uploaded with a draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightUniforms {
    pub position_radius: [Vec4; MAX_SHADER_LIGHTS],
    pub color_intensity: [Vec4; MAX_SHADER_LIGHTS],
    pub count: u32,
}

impl Default for LightUniforms {
    fn default() -> Self {
        Self {
            position_radius: [Vec4::ZERO; MAX_SHADER_LIGHTS],
            color_intensity: [Vec4::ZERO; MAX_SHADER_LIGHTS],
            count: 0,
        }
    }
}

impl LightUniforms {
    pub fn from_selection(lights: &[DynamicLightSnapshot], selection: &LightSelection) -> Self {
        let mut uniforms = Self::default();
        for entry in selection.ranked() {
            let Some(light) = lights.get(entry.index) else {
                continue;
            };
            let slot = uniforms.count as usize;
            if slot >= MAX_SHADER_LIGHTS {
                break;
            }
            uniforms.position_radius[slot] = light.position.extend(light.radius);
            uniforms.color_intensity[slot] = light.color.extend(light.intensity);
            uniforms.count += 1;
        }
        uniforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(x: f32, radius: f32, intensity: f32) -> DynamicLightSnapshot {
        DynamicLightSnapshot::new(Vec3::new(x, 0.0, 0.0), Vec3::ONE, radius, intensity)
    }

    #[test]
    fn object_influence_falls_off_quadratically() {
        let light = light(0.0, 10.0, 2.0);
        assert_eq!(object_influence(&light, Vec3::ZERO), 2.0);
        assert!((object_influence(&light, Vec3::new(5.0, 0.0, 0.0)) - 1.5).abs() < 1e-5);
        assert_eq!(object_influence(&light, Vec3::new(10.0, 0.0, 0.0)), 0.0);
        assert_eq!(object_influence(&light, Vec3::new(50.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn full_selection_replaces_only_weaker_entries() {
        let mut selection = LightSelection::with_capacity(2);
        assert!(selection.offer(0, 1.0));
        assert!(selection.offer(1, 3.0));
        assert!(!selection.offer(2, 0.5));
        assert!(selection.offer(3, 2.0));
        assert_eq!(selection.weakest_score(), Some(2.0));

        let kept: Vec<usize> = selection.ranked().iter().map(|entry| entry.index).collect();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn out_of_range_lights_are_never_selected() {
        let lights = vec![light(0.0, 5.0, 1.0), light(100.0, 5.0, 100.0)];
        let selection = select_object_lights(&lights, Vec3::ZERO, 4);
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.entries()[0].index, 0);
    }

    #[test]
    fn batch_score_ignores_distance() {
        let lights = vec![light(0.0, 5.0, 1.0), light(10_000.0, 50.0, 1.0)];
        let selection = select_batch_lights(&lights, 1);
        assert_eq!(selection.entries()[0].index, 1);
    }

    #[test]
    fn capacity_is_bounded_by_shader_arrays() {
        assert_eq!(LightSelection::with_capacity(64).capacity(), MAX_SHADER_LIGHTS);
        assert_eq!(LightSelection::with_capacity(0).capacity(), 1);
    }

    #[test]
    fn cache_rescans_on_zone_change_only() {
        let mut field = LightingField::default();
        field.set_active_lights(vec![light(0.0, 500.0, 1.0)]);
        let mut cache = LightSelectionCache::default();

        assert!(cache.refresh(&field, Vec3::new(10.0, 10.0, 0.0), 4, 100.0));
        assert!(!cache.refresh(&field, Vec3::new(90.0, 10.0, 0.0), 4, 100.0));
        assert!(cache.refresh(&field, Vec3::new(110.0, 10.0, 0.0), 4, 100.0));
        assert_eq!(cache.scans(), 2);
    }

    #[test]
    fn batch_cache_rescans_on_new_light_sets_only() {
        let mut field = LightingField::default();
        field.set_active_lights(vec![light(0.0, 100.0, 1.0), light(900.0, 400.0, 1.0)]);
        let mut cache = BatchLightCache::default();

        assert!(cache.refresh(&field, 1));
        assert!(!cache.refresh(&field, 1));
        assert_eq!(cache.uniforms().count, 1);
        assert_eq!(cache.uniforms().position_radius[0].w, 400.0);

        assert!(cache.refresh(&field, 2));
        assert_eq!(cache.uniforms().count, 2);

        field.set_active_lights(Vec::new());
        assert!(cache.refresh(&field, 2));
        assert_eq!(cache.uniforms().count, 0);
        assert_eq!(cache.scans(), 3);
    }

    #[test]
    fn uniforms_pack_strongest_first() {
        let lights = vec![light(0.0, 10.0, 1.0), light(1.0, 10.0, 4.0)];
        let selection = select_object_lights(&lights, Vec3::ZERO, 4);
        let uniforms = LightUniforms::from_selection(&lights, &selection);
        assert_eq!(uniforms.count, 2);
        assert_eq!(uniforms.color_intensity[0].w, 4.0);
        assert_eq!(uniforms.position_radius[1], Vec4::new(0.0, 0.0, 0.0, 10.0));
    }

    #[test]
    fn light_vector_adds_ambient_and_influences() {
        let mut field = LightingField::default();
        field.set_active_lights(vec![DynamicLightSnapshot::new(
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            10.0,
            1.0,
        )]);
        let selection = select_object_lights(field.active_lights(), Vec3::ZERO, 4);
        let vector = light_vector(&field, Vec3::ZERO, &selection);
        assert!((vector - Vec3::new(1.5, 0.5, 0.5)).length() < 1e-5);
    }
}
