use super::frames::{FramePosition, PlaybackMode, frame_position};
use super::pose::{BlendSample, MatrixPool, PosePlan, PoseSample, evaluate_pose};
use crate::model::ModelAsset;
use bevy::prelude::*;
use smallvec::SmallVec;

/// Which actions of an object stop instead of looping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackRules {
    pub terminal: SmallVec<[usize; 4]>,
    pub once: SmallVec<[usize; 4]>,
}

impl PlaybackRules {
    pub fn with_terminal(mut self, action: usize) -> Self {
        self.terminal.push(action);
        self
    }

    pub fn with_once(mut self, action: usize) -> Self {
        self.once.push(action);
        self
    }

    pub fn mode_for(&self, action: usize) -> PlaybackMode {
        if self.terminal.contains(&action) {
            PlaybackMode::HoldLast
        } else if self.once.contains(&action) {
            PlaybackMode::Once
        } else {
            PlaybackMode::Loop
        }
    }
}

/// Per-frame inputs shared by every animated object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationClock {
    pub delta_secs: f32,
    pub speed_multiplier: f32,
    pub blend_duration: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BlendState {
    source_action: usize,
    source_time: f32,
    elapsed: f32,
    duration: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SampleKey {
    action: usize,
    frame0: usize,
    frame1: usize,
    t_bits: u32,
}

impl SampleKey {
    fn new(action: usize, position: &FramePosition) -> Self {
        Self {
            action,
            frame0: position.frame0,
            frame1: position.frame1,
            t_bits: position.t.to_bits(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnimationStep {
    /// Same sample as last frame; the bone array is still valid.
    Unchanged,
    Evaluate(PosePlan),
}

/// Playback state machine of one animated object.
///
/// `current_action` is written by gameplay code; everything else is driven by
/// [`AnimationState::advance`].
#[derive(Component, Debug, Clone)]
pub struct AnimationState {
    pub current_action: usize,
    /// Re-evaluate the pose every tick even when the sample repeats.
    pub continuous: bool,
    pub speed: f32,
    pub rules: PlaybackRules,
    active_action: Option<usize>,
    previous_action: Option<usize>,
    play_time: f32,
    blend: Option<BlendState>,
    last_sample: Option<SampleKey>,
    one_shot_complete: bool,
    pose_evaluations: u64,
    warned_action: Option<usize>,
}

impl Default for AnimationState {
    fn default() -> Self {
        Self::new(0)
    }
}

impl AnimationState {
    pub fn new(action: usize) -> Self {
        Self {
            current_action: action,
            continuous: false,
            speed: 1.0,
            rules: PlaybackRules::default(),
            active_action: None,
            previous_action: None,
            play_time: 0.0,
            blend: None,
            last_sample: None,
            one_shot_complete: false,
            pose_evaluations: 0,
            warned_action: None,
        }
    }

    pub fn with_rules(mut self, rules: PlaybackRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn play_time(&self) -> f32 {
        self.play_time
    }

    pub fn active_action(&self) -> Option<usize> {
        self.active_action
    }

    pub fn previous_action(&self) -> Option<usize> {
        self.previous_action
    }

    pub fn is_blending(&self) -> bool {
        self.blend.is_some()
    }

    pub fn blend_source(&self) -> Option<(usize, f32)> {
        self.blend
            .map(|blend| (blend.source_action, blend.source_time))
    }

    pub fn blend_elapsed(&self) -> Option<f32> {
        self.blend.map(|blend| blend.elapsed)
    }

    pub fn one_shot_complete(&self) -> bool {
        self.one_shot_complete
    }

    /// Number of times a pose was actually evaluated for this object.
    pub fn pose_evaluations(&self) -> u64 {
        self.pose_evaluations
    }

    /// Forces the next tick to evaluate the pose again.
    pub fn invalidate_sample(&mut self) {
        self.last_sample = None;
    }

    /// Advances playback by one tick and decides what to evaluate.
    pub fn advance(&mut self, model: &ModelAsset, clock: &AnimationClock) -> AnimationStep {
        let Some(action_index) = model.clamp_action(self.current_action) else {
            return self.rest_pose_step();
        };

        if action_index != self.current_action && self.warned_action != Some(self.current_action) {
            warn!(
                "Model '{}' has no action {}; clamping to {}",
                model.name, self.current_action, action_index
            );
            self.warned_action = Some(self.current_action);
        }

        if self.active_action != Some(action_index) {
            self.switch_to(model, action_index, clock.blend_duration);
        }

        let action = model.actions[action_index];
        self.play_time += clock.delta_secs * action.play_speed * clock.speed_multiplier * self.speed;

        let mode = self.rules.mode_for(action_index);
        let position = frame_position(
            self.play_time,
            action.key_count,
            mode,
            mode == PlaybackMode::Loop && model.loop_restarts_early(action_index),
        );
        if position.finished {
            self.one_shot_complete = true;
        }

        let blend = self.advance_blend(model, clock.delta_secs);
        let key = SampleKey::new(action_index, &position);

        if blend.is_none() && !self.continuous && self.last_sample == Some(key) {
            return AnimationStep::Unchanged;
        }

        // While blending the output differs every frame, so the cache only
        // holds once the transition is over.
        self.last_sample = if blend.is_none() { Some(key) } else { None };

        AnimationStep::Evaluate(PosePlan {
            primary: PoseSample {
                action: action_index,
                position,
            },
            blend,
        })
    }

    /// Advances playback and writes the resulting pose into `bones`.
    /// Returns whether any bone matrix changed.
    pub fn animate(
        &mut self,
        model: &ModelAsset,
        clock: &AnimationClock,
        bones: &mut [Mat4],
        pool: &mut MatrixPool,
    ) -> bool {
        match self.advance(model, clock) {
            AnimationStep::Unchanged => false,
            AnimationStep::Evaluate(plan) => {
                self.pose_evaluations += 1;
                evaluate_pose(model, &plan, bones, pool)
            }
        }
    }

    fn rest_pose_step(&mut self) -> AnimationStep {
        let key = SampleKey::new(0, &FramePosition::REST);
        if self.last_sample == Some(key) {
            return AnimationStep::Unchanged;
        }
        self.last_sample = Some(key);
        AnimationStep::Evaluate(PosePlan {
            primary: PoseSample {
                action: 0,
                position: FramePosition::REST,
            },
            blend: None,
        })
    }

    fn switch_to(&mut self, model: &ModelAsset, next: usize, blend_duration: f32) {
        if let Some(outgoing) = self.active_action {
            let has_keys = |index: usize| model.action(index).is_some_and(|a| a.key_count > 0);
            let blendable = blend_duration > 0.0 && has_keys(outgoing) && has_keys(next);

            self.previous_action = Some(outgoing);
            self.blend = blendable.then_some(BlendState {
                source_action: outgoing,
                source_time: self.play_time,
                elapsed: 0.0,
                duration: blend_duration,
            });
        }

        self.active_action = Some(next);
        self.play_time = 0.0;
        self.one_shot_complete = false;
        self.last_sample = None;
    }

    fn advance_blend(&mut self, model: &ModelAsset, delta_secs: f32) -> Option<BlendSample> {
        let blend = self.blend.as_mut()?;
        blend.elapsed = (blend.elapsed + delta_secs.max(0.0)).min(blend.duration);
        let factor = if blend.duration > 0.0 {
            (blend.elapsed / blend.duration).min(1.0)
        } else {
            1.0
        };

        let source = *blend;
        let Some(source_action) = model.action(source.source_action) else {
            self.blend = None;
            return None;
        };

        if factor >= 1.0 {
            self.blend = None;
            return None;
        }

        let mode = self.rules.mode_for(source.source_action);
        let position = frame_position(
            source.source_time,
            source_action.key_count,
            mode,
            mode == PlaybackMode::Loop && model.loop_restarts_early(source.source_action),
        );

        Some(BlendSample {
            source: PoseSample {
                action: source.source_action,
                position,
            },
            factor,
        })
    }
}
