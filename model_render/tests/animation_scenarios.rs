mod support;

use bevy::prelude::*;
use model_render::animation::{AnimationState, PlaybackRules};
use model_render::model::ModelId;
use model_render::object_runtime::{
    BoneMatrices, FrustumTest, ObjectKind, ViewCulling, model_object_bundle,
};
use model_render::render::RecordingBackend;
use model_render::render::RenderStats;
use support::{root_track_model, insert_model, render_app, settings_without_blending, step};

const PROBE: ModelId = ModelId(1);
const IDLE: usize = 0;
const ATTACK: usize = 1;
const PLAY_SPEED: f32 = 10.0;
const TICK: f32 = 0.1;

fn root_x(app: &App, entity: Entity) -> f32 {
    app.world()
        .get::<BoneMatrices>(entity)
        .and_then(|bones| bones.0.first())
        .map(|root| root.w_axis.x)
        .unwrap_or(f32::NAN)
}

fn state(app: &App, entity: Entity) -> &AnimationState {
    app.world()
        .get::<AnimationState>(entity)
        .expect("object keeps its animation state")
}

#[test]
fn terminal_attack_freezes_one_frame_before_the_last_key() {
    let backend = RecordingBackend::new();
    let mut app = render_app(settings_without_blending(), Some(&backend));
    insert_model(&mut app, PROBE, root_track_model(&[1, 20], PLAY_SPEED));

    let object = app
        .world_mut()
        .spawn(model_object_bundle(PROBE, ObjectKind::Character, Transform::IDENTITY))
        .id();
    app.world_mut()
        .get_mut::<AnimationState>(object)
        .expect("spawned with animation state")
        .rules = PlaybackRules::default().with_terminal(ATTACK);

    step(&mut app, TICK);
    assert_eq!(state(&app, object).active_action(), Some(IDLE));

    app.world_mut()
        .get_mut::<AnimationState>(object)
        .expect("spawned with animation state")
        .current_action = ATTACK;

    // 19 keys at 10 keys per second, then well past the end.
    let mut highest = f32::MIN;
    for _ in 0..40 {
        step(&mut app, TICK);
        highest = highest.max(root_x(&app, object));
    }

    assert!((root_x(&app, object) - 18.0).abs() < 1e-3);
    assert!(highest <= 18.0 + 1e-3, "frame reached {highest}");
    assert!(!state(&app, object).one_shot_complete());
}

#[test]
fn static_action_is_evaluated_once() {
    let backend = RecordingBackend::new();
    let mut app = render_app(settings_without_blending(), Some(&backend));
    insert_model(&mut app, PROBE, root_track_model(&[1, 20], PLAY_SPEED));

    let object = app
        .world_mut()
        .spawn(model_object_bundle(PROBE, ObjectKind::Character, Transform::IDENTITY))
        .id();

    step(&mut app, TICK);
    let first = app.world().get::<BoneMatrices>(object).cloned();
    for _ in 0..10 {
        step(&mut app, TICK);
        assert_eq!(app.world().resource::<RenderStats>().pose_evaluations, 0);
    }

    assert_eq!(state(&app, object).pose_evaluations(), 1);
    assert_eq!(app.world().get::<BoneMatrices>(object).cloned(), first);
}

#[test]
fn offscreen_objects_keep_time_without_evaluating() {
    let backend = RecordingBackend::new();
    let mut app = render_app(settings_without_blending(), Some(&backend));
    insert_model(&mut app, PROBE, root_track_model(&[40], PLAY_SPEED));

    let object = app
        .world_mut()
        .spawn(model_object_bundle(PROBE, ObjectKind::Monster, Transform::IDENTITY))
        .id();
    step(&mut app, TICK);
    let evaluated = state(&app, object).pose_evaluations();

    app.world_mut()
        .entity_mut(object)
        .insert(ViewCulling(FrustumTest::Outside));
    for _ in 0..10 {
        step(&mut app, TICK);
    }
    assert_eq!(state(&app, object).pose_evaluations(), evaluated);
    assert!((state(&app, object).play_time() - 11.0).abs() < 1e-3);

    app.world_mut()
        .entity_mut(object)
        .insert(ViewCulling(FrustumTest::Intersects));
    step(&mut app, TICK);
    assert_eq!(state(&app, object).pose_evaluations(), evaluated + 1);
    assert!((root_x(&app, object) - 12.0).abs() < 1e-3);
}

#[test]
fn rapid_action_switches_keep_the_blend_bounded() {
    let backend = RecordingBackend::new();
    let mut settings = settings_without_blending();
    settings.animation.blend_duration_secs = 0.5;
    let mut app = render_app(settings, Some(&backend));
    insert_model(&mut app, PROBE, root_track_model(&[8, 12, 6], PLAY_SPEED));

    let object = app
        .world_mut()
        .spawn(model_object_bundle(PROBE, ObjectKind::Character, Transform::IDENTITY))
        .id();
    step(&mut app, TICK);

    for action in [1, 2, 1, 0, 2] {
        app.world_mut()
            .get_mut::<AnimationState>(object)
            .expect("spawned with animation state")
            .current_action = action;
        step(&mut app, TICK);

        let current = state(&app, object);
        assert_eq!(current.active_action(), Some(action));
        if let Some(elapsed) = current.blend_elapsed() {
            assert!(elapsed <= 0.5 + 1e-6);
        }
        assert!(root_x(&app, object).is_finite());
    }

    for _ in 0..10 {
        step(&mut app, TICK);
    }
    assert!(!state(&app, object).is_blending());
}
