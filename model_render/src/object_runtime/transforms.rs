use super::components::ParentLink;
use bevy::prelude::*;

pub fn local_matrix(transform: &Transform) -> Mat4 {
    Mat4::from_scale_rotation_translation(transform.scale, transform.rotation, transform.translation)
}

/// World matrix of a linked child. A bone attachment pointing past the
/// parent's bone array falls back to the parent's origin.
pub fn linked_world_matrix(
    parent_world: Mat4,
    parent_bones: &[Mat4],
    link: ParentLink,
    local: Mat4,
) -> Mat4 {
    match link {
        ParentLink::Pose => parent_world * local,
        ParentLink::Bone(bone) => {
            let bone = parent_bones.get(bone).copied().unwrap_or(Mat4::IDENTITY);
            parent_world * bone * local
        }
    }
}
