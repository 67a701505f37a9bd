use super::path::BlendMode;
use crate::model::texture::TextureHandle;
use bevy::prelude::*;
use std::collections::HashMap;

/// State bound once per group of meshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderStateKey {
    pub texture: TextureHandle,
    pub blend: BlendMode,
    pub two_sided: bool,
}

/// Per-frame partition of one object's meshes by render state.
///
/// Cleared before each object; the index lists go back to a pool instead of
/// being freed.
#[derive(Resource, Default, Debug)]
pub struct MeshGroups {
    order: Vec<RenderStateKey>,
    groups: HashMap<RenderStateKey, Vec<usize>>,
    pool: Vec<Vec<usize>>,
    special: Vec<(RenderStateKey, usize)>,
}

impl MeshGroups {
    pub fn clear(&mut self) {
        for (_, mut list) in self.groups.drain() {
            list.clear();
            self.pool.push(list);
        }
        self.order.clear();
        self.special.clear();
    }

    pub fn push(&mut self, key: RenderStateKey, mesh: usize) {
        if let Some(list) = self.groups.get_mut(&key) {
            list.push(mesh);
            return;
        }

        let mut list = self.pool.pop().unwrap_or_default();
        list.push(mesh);
        self.groups.insert(key, list);
        self.order.push(key);
    }

    /// Meshes with their own shader path, drawn one by one.
    pub fn push_special(&mut self, key: RenderStateKey, mesh: usize) {
        self.special.push((key, mesh));
    }

    /// Groups in first-seen order.
    pub fn groups(&self) -> impl Iterator<Item = (RenderStateKey, &[usize])> + '_ {
        self.order.iter().filter_map(|key| {
            self.groups
                .get(key)
                .map(|meshes| (*key, meshes.as_slice()))
        })
    }

    pub fn special(&self) -> &[(RenderStateKey, usize)] {
        &self.special
    }

    pub fn group_count(&self) -> usize {
        self.order.len()
    }

    pub fn pooled_lists(&self) -> usize {
        self.pool.len()
    }
}
