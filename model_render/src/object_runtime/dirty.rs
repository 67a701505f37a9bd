use super::components::ParentLink;
use bevy::prelude::*;

bitflags::bitflags! {
    /// Cached GPU data that is stale for an object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u8 {
        const TRANSFORM = 1 << 0;
        const ANIMATION = 1 << 1;
        const LIGHTING = 1 << 2;
        const TEXTURE = 1 << 3;
        const ALL = Self::TRANSFORM.bits()
            | Self::ANIMATION.bits()
            | Self::LIGHTING.bits()
            | Self::TEXTURE.bits();
    }
}

/// Dirty bits of one object. New objects start fully dirty.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderDirty(DirtyFlags);

impl Default for RenderDirty {
    fn default() -> Self {
        Self(DirtyFlags::ALL)
    }
}

impl RenderDirty {
    pub fn clean() -> Self {
        Self(DirtyFlags::empty())
    }

    pub fn flags(&self) -> DirtyFlags {
        self.0
    }

    pub fn mark(&mut self, flags: DirtyFlags) {
        self.0 |= flags;
    }

    pub fn is_clean(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the accumulated flags and clears them in one step.
    pub fn take(&mut self) -> DirtyFlags {
        std::mem::take(&mut self.0)
    }
}

/// Flags a child inherits from its parent. Linked children derive their
/// transform from the parent every frame, so they never inherit the
/// transform bit.
pub fn inherited_flags(link: Option<&ParentLink>, flags: DirtyFlags) -> DirtyFlags {
    if link.is_some() {
        flags.difference(DirtyFlags::TRANSFORM)
    } else {
        flags
    }
}

/// Invalidations requested during the frame, applied with hierarchy
/// propagation in the `Invalidate` stage.
#[derive(Resource, Default, Debug)]
pub struct PendingInvalidations {
    requests: Vec<(Entity, DirtyFlags)>,
}

impl PendingInvalidations {
    pub fn push(&mut self, entity: Entity, flags: DirtyFlags) {
        if !flags.is_empty() {
            self.requests.push((entity, flags));
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (Entity, DirtyFlags)> + '_ {
        self.requests.drain(..)
    }
}

/// Marks `root` and propagates depth-first through `Children`. Traversal
/// stops at any child for which nothing is left to inherit.
pub fn propagate_dirty(
    root: Entity,
    flags: DirtyFlags,
    targets: &mut Query<(&mut RenderDirty, Option<&ParentLink>)>,
    children: &Query<&Children>,
    stack: &mut Vec<(Entity, DirtyFlags)>,
) {
    let mut child_list: Vec<Entity> = Vec::new();
    stack.clear();
    stack.push((root, flags));

    while let Some((entity, flags)) = stack.pop() {
        if let Ok((mut dirty, _)) = targets.get_mut(entity) {
            dirty.mark(flags);
        }

        child_list.clear();
        if let Ok(entity_children) = children.get(entity) {
            child_list.extend(entity_children.iter());
        }
        for &child in &child_list {
            let link = targets.get(child).ok().and_then(|(_, link)| link.copied());
            let inherited = inherited_flags(link.as_ref(), flags);
            if inherited.is_empty() {
                continue;
            }
            stack.push((child, inherited));
        }
    }
}

/// World-access variant for gameplay code running outside the frame systems.
pub fn invalidate_hierarchy(world: &mut World, root: Entity, flags: DirtyFlags) {
    let mut stack = vec![(root, flags)];

    while let Some((entity, flags)) = stack.pop() {
        let Ok(mut entity_mut) = world.get_entity_mut(entity) else {
            continue;
        };
        if let Some(mut dirty) = entity_mut.get_mut::<RenderDirty>() {
            dirty.mark(flags);
        }

        let mut child_list: Vec<Entity> = Vec::new();
        if let Some(children) = world.get::<Children>(entity) {
            child_list.extend(children.iter());
        }
        for child in child_list {
            let link = world.get::<ParentLink>(child).copied();
            let inherited = inherited_flags(link.as_ref(), flags);
            if !inherited.is_empty() {
                stack.push((child, inherited));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_accumulated_flags() {
        let mut dirty = RenderDirty::clean();
        dirty.mark(DirtyFlags::TRANSFORM);
        dirty.mark(DirtyFlags::TEXTURE);
        assert_eq!(dirty.take(), DirtyFlags::TRANSFORM | DirtyFlags::TEXTURE);
        assert!(dirty.is_clean());
    }

    #[test]
    fn linked_children_drop_the_transform_bit() {
        let link = ParentLink::Bone(3);
        assert_eq!(
            inherited_flags(Some(&link), DirtyFlags::ALL),
            DirtyFlags::ANIMATION | DirtyFlags::LIGHTING | DirtyFlags::TEXTURE
        );
        assert!(inherited_flags(Some(&link), DirtyFlags::TRANSFORM).is_empty());
        assert_eq!(inherited_flags(None, DirtyFlags::TRANSFORM), DirtyFlags::TRANSFORM);
    }

    #[test]
    fn world_invalidation_reaches_grandchildren() {
        let mut world = World::new();
        let root = world.spawn(RenderDirty::clean()).id();
        let plain_child = world.spawn((RenderDirty::clean(), ChildOf(root))).id();
        let grandchild = world.spawn((RenderDirty::clean(), ChildOf(plain_child))).id();
        let linked_child = world
            .spawn((RenderDirty::clean(), ParentLink::Bone(0), ChildOf(root)))
            .id();

        invalidate_hierarchy(&mut world, root, DirtyFlags::TRANSFORM);

        let flags = |entity: Entity| world.get::<RenderDirty>(entity).map(RenderDirty::flags);
        assert_eq!(flags(root), Some(DirtyFlags::TRANSFORM));
        assert_eq!(flags(plain_child), Some(DirtyFlags::TRANSFORM));
        assert_eq!(flags(grandchild), Some(DirtyFlags::TRANSFORM));
        assert_eq!(flags(linked_child), Some(DirtyFlags::empty()));
    }
}
