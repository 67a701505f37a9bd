pub mod frames;
pub mod pose;
pub mod state;

pub use frames::{FramePosition, PlaybackMode, frame_position};
pub use pose::{
    BlendSample, MatrixPool, PosePlan, PoseSample, blend_bone_matrices, compute_bone_matrices,
    evaluate_pose, nlerp,
};
pub use state::{AnimationClock, AnimationState, AnimationStep, PlaybackRules};
