use crate::object_runtime::components::{BoneMatrices, ModelObject, ParentLink, WorldMatrix};
use crate::object_runtime::dirty::{DirtyFlags, PendingInvalidations, RenderDirty, propagate_dirty};
use crate::object_runtime::transforms::{linked_world_matrix, local_matrix};
use bevy::prelude::*;

/// Pose links deeper than this are treated as broken.
const MAX_POSE_LINK_DEPTH: usize = 8;

/// Applies every invalidation requested this frame, root first, down through
/// the attachment hierarchy.
pub fn apply_pending_invalidations(
    mut pending: ResMut<PendingInvalidations>,
    mut targets: Query<(&mut RenderDirty, Option<&ParentLink>)>,
    children: Query<&Children>,
    mut stack: Local<Vec<(Entity, DirtyFlags)>>,
) {
    if pending.is_empty() {
        return;
    }
    for (entity, flags) in pending.drain() {
        propagate_dirty(entity, flags, &mut targets, &children, &mut stack);
    }
}

/// Resolves world matrices parent before child. Objects whose parent is not a
/// model object are placed by their own transform.
pub fn resolve_world_matrices(
    mut objects: Query<(Entity, &Transform, &mut WorldMatrix, Option<&ParentLink>), With<ModelObject>>,
    parents: Query<&ChildOf>,
    model_objects: Query<(), With<ModelObject>>,
    children: Query<&Children>,
    links: Query<(Option<&ParentLink>, Option<&ChildOf>)>,
    bones: Query<&BoneMatrices>,
    mut roots: Local<Vec<Entity>>,
    mut stack: Local<Vec<(Entity, Entity, Mat4)>>,
) {
    roots.clear();
    for (entity, _, _, _) in &objects {
        let parent_is_model = parents
            .get(entity)
            .is_ok_and(|child_of| model_objects.contains(child_of.parent()));
        if !parent_is_model {
            roots.push(entity);
        }
    }

    let mut child_list: Vec<Entity> = Vec::new();
    for &root in roots.iter() {
        let Ok((_, transform, mut world, _)) = objects.get_mut(root) else {
            continue;
        };
        let root_world = local_matrix(transform);
        world.0 = root_world;

        stack.clear();
        push_children(root, root_world, &children, &mut child_list, &mut stack);

        while let Some((entity, parent, parent_world)) = stack.pop() {
            let Ok((_, transform, mut world, link)) = objects.get_mut(entity) else {
                continue;
            };
            let local = local_matrix(transform);
            let resolved = match link {
                Some(&link) => {
                    let parent_bones = pose_bones(parent, &links, &bones).unwrap_or(&[]);
                    linked_world_matrix(parent_world, parent_bones, link, local)
                }
                None => parent_world * local,
            };
            world.0 = resolved;
            push_children(entity, resolved, &children, &mut child_list, &mut stack);
        }
    }
}

fn push_children(
    entity: Entity,
    world: Mat4,
    children: &Query<&Children>,
    scratch: &mut Vec<Entity>,
    stack: &mut Vec<(Entity, Entity, Mat4)>,
) {
    scratch.clear();
    if let Ok(entity_children) = children.get(entity) {
        scratch.extend(entity_children.iter());
    }
    stack.extend(scratch.iter().map(|&child| (child, entity, world)));
}

/// Bone array an object renders with. Pose-linked objects borrow the array of
/// the nearest ancestor that owns one.
pub fn pose_bones<'a>(
    entity: Entity,
    links: &Query<(Option<&ParentLink>, Option<&ChildOf>)>,
    bones: &'a Query<&BoneMatrices>,
) -> Option<&'a [Mat4]> {
    let mut current = entity;
    for _ in 0..MAX_POSE_LINK_DEPTH {
        match links.get(current) {
            Ok((Some(ParentLink::Pose), Some(child_of))) => current = child_of.parent(),
            _ => return bones.get(current).ok().map(|owned| owned.0.as_slice()),
        }
    }
    None
}
