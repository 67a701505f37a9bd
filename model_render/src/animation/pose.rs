use super::frames::FramePosition;
use crate::model::ModelAsset;
use bevy::prelude::*;

/// Matrices closer than this are treated as unchanged between frames.
const MATRIX_CHANGE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub action: usize,
    pub position: FramePosition,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendSample {
    pub source: PoseSample,
    /// Weight of the primary (incoming) pose, in `[0, 1]`.
    pub factor: f32,
}

/// What the pipeline has to evaluate for one object this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosePlan {
    pub primary: PoseSample,
    pub blend: Option<BlendSample>,
}

/// Reusable matrix arrays for blend scratch space.
#[derive(Resource, Default)]
pub struct MatrixPool {
    free: Vec<Vec<Mat4>>,
}

impl MatrixPool {
    pub fn acquire(&mut self, len: usize) -> Vec<Mat4> {
        let mut matrices = self.free.pop().unwrap_or_default();
        matrices.clear();
        matrices.resize(len, Mat4::IDENTITY);
        matrices
    }

    pub fn release(&mut self, matrices: Vec<Mat4>) {
        self.free.push(matrices);
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

/// Writes the hierarchical bone matrices for `sample` into `out` and reports
/// whether any of them changed.
///
/// Bones are visited in storage order, which the asset guarantees to list
/// parents before children. A bone pointing at a later parent is treated as
/// unparented.
pub fn compute_bone_matrices(model: &ModelAsset, sample: PoseSample, out: &mut [Mat4]) -> bool {
    let lock_root = model
        .action(sample.action)
        .is_some_and(|action| action.lock_root_position);
    let mut any_changed = false;

    for (index, bone) in model.bones.iter().enumerate().take(out.len()) {
        let local = match bone.keys(sample.action) {
            Some(keys) => {
                let last = keys.key_count() - 1;
                let frame0 = sample.position.frame0.min(last);
                let frame1 = sample.position.frame1.min(last);
                let t = sample.position.t;

                let rotation = keys.rotations[frame0]
                    .slerp(keys.rotations[frame1], t)
                    .normalize();
                let mut translation = keys.positions[frame0].lerp(keys.positions[frame1], t);

                if lock_root && index == 0 && bone.parent.is_none() {
                    let rest = keys.positions[0];
                    translation.x = rest.x;
                    translation.y = rest.y;
                }

                Mat4::from_rotation_translation(rotation, translation)
            }
            None => Mat4::IDENTITY,
        };

        let world = match bone.parent {
            Some(parent) if parent < index => out[parent] * local,
            _ => local,
        };

        if !out[index].abs_diff_eq(world, MATRIX_CHANGE_EPSILON) {
            any_changed = true;
        }
        out[index] = world;
    }

    any_changed
}

/// Normalized quaternion interpolation along the shortest arc.
pub fn nlerp(from: Quat, to: Quat, factor: f32) -> Quat {
    let from = if from.dot(to) < 0.0 { -from } else { from };
    let blended = from * (1.0 - factor) + to * factor;
    if blended.length_squared() <= f32::EPSILON {
        to
    } else {
        blended.normalize()
    }
}

/// Per-bone blend of two poses into `out`. Returns whether `out` changed.
pub fn blend_bone_matrices(from: &[Mat4], to: &[Mat4], factor: f32, out: &mut [Mat4]) -> bool {
    let factor = factor.clamp(0.0, 1.0);
    let mut any_changed = false;

    for ((target, source), incoming) in out.iter_mut().zip(from).zip(to) {
        let (scale_a, rotation_a, translation_a) = source.to_scale_rotation_translation();
        let (scale_b, rotation_b, translation_b) = incoming.to_scale_rotation_translation();

        let blended = Mat4::from_scale_rotation_translation(
            scale_a.lerp(scale_b, factor),
            nlerp(rotation_a, rotation_b, factor),
            translation_a.lerp(translation_b, factor),
        );

        if !target.abs_diff_eq(blended, MATRIX_CHANGE_EPSILON) {
            any_changed = true;
        }
        *target = blended;
    }

    any_changed
}

/// Evaluates `plan` into `out`, blending through pooled scratch arrays when a
/// transition is in progress.
pub fn evaluate_pose(
    model: &ModelAsset,
    plan: &PosePlan,
    out: &mut [Mat4],
    pool: &mut MatrixPool,
) -> bool {
    let Some(blend) = plan.blend else {
        return compute_bone_matrices(model, plan.primary, out);
    };

    let mut incoming = pool.acquire(out.len());
    let mut outgoing = pool.acquire(out.len());
    compute_bone_matrices(model, plan.primary, &mut incoming);
    compute_bone_matrices(model, blend.source, &mut outgoing);
    let changed = blend_bone_matrices(&outgoing, &incoming, blend.factor, out);
    pool.release(incoming);
    pool.release(outgoing);
    changed
}
