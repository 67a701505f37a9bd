mod support;

use bevy::prelude::*;
use model_render::model::ModelId;
use model_render::object_runtime::{
    ObjectAppearance, ObjectKind, WorldMatrix, model_object_bundle,
};
use model_render::render::{GpuCommand, RecordingBackend, RenderStats, StaticInstancingManager};
use support::{insert_model, prop_model, render_app, settings_without_blending, step};

const PILLAR: ModelId = ModelId(20);

fn spawn_props(app: &mut App, count: usize) -> Vec<Entity> {
    (0..count)
        .map(|index| {
            let transform = Transform::from_xyz(100.0 * (index + 1) as f32, 30.0, 0.0)
                .with_rotation(Quat::from_rotation_z(0.3 * index as f32))
                .with_scale(Vec3::splat(1.5));
            app.world_mut()
                .spawn(model_object_bundle(PILLAR, ObjectKind::MapObject, transform))
                .id()
        })
        .collect()
}

fn world_of(app: &App, entity: Entity) -> Mat4 {
    app.world()
        .get::<WorldMatrix>(entity)
        .map(|world| world.0)
        .unwrap_or(Mat4::NAN)
}

fn instanced_worlds(commands: &[GpuCommand]) -> Vec<Mat4> {
    commands
        .iter()
        .filter_map(|command| match command {
            GpuCommand::WriteInstances { instances, .. } => Some(instances),
            _ => None,
        })
        .flatten()
        .map(|instance| instance.world)
        .collect()
}

fn direct_draw_worlds(commands: &[GpuCommand]) -> Vec<Mat4> {
    commands
        .iter()
        .filter_map(|command| match command {
            GpuCommand::Draw(call) => Some(call.world),
            _ => None,
        })
        .collect()
}

fn instanced_draw_count(commands: &[GpuCommand]) -> usize {
    commands
        .iter()
        .filter(|command| matches!(command, GpuCommand::DrawInstanced(_)))
        .count()
}

#[test]
fn static_props_draw_as_one_batch_per_mesh() {
    let backend = RecordingBackend::new();
    let mut app = render_app(settings_without_blending(), Some(&backend));
    insert_model(&mut app, PILLAR, prop_model());
    let props = spawn_props(&mut app, 3);

    step(&mut app, 0.1);
    let commands = backend.take_commands();

    assert_eq!(instanced_draw_count(&commands), 2);
    assert!(direct_draw_worlds(&commands).is_empty());

    let stats = app.world().resource::<RenderStats>();
    assert_eq!(stats.instanced_batches, 2);
    assert_eq!(stats.instances_drawn, 6);

    let worlds = instanced_worlds(&commands);
    for &prop in &props {
        let expected = world_of(&app, prop);
        assert_eq!(
            worlds.iter().filter(|world| **world == expected).count(),
            2,
            "each mesh of {prop:?} carries its world matrix"
        );
    }
}

#[test]
fn losing_eligibility_keeps_the_world_matrix() {
    let backend = RecordingBackend::new();
    let mut app = render_app(settings_without_blending(), Some(&backend));
    insert_model(&mut app, PILLAR, prop_model());
    let props = spawn_props(&mut app, 2);

    step(&mut app, 0.1);
    let instanced = instanced_worlds(&backend.take_commands());
    let faded = props[1];
    let before = world_of(&app, faded);
    assert!(instanced.contains(&before));

    app.world_mut()
        .get_mut::<ObjectAppearance>(faded)
        .expect("prop has an appearance")
        .alpha = 0.5;
    step(&mut app, 0.1);
    let commands = backend.take_commands();

    let direct = direct_draw_worlds(&commands);
    assert_eq!(direct, vec![before, before]);
    assert!(!instanced_worlds(&commands).contains(&before));
    assert!(instanced_worlds(&commands).contains(&world_of(&app, props[0])));

    // Opaque again: back into the batches with the same world matrix.
    app.world_mut()
        .get_mut::<ObjectAppearance>(faded)
        .expect("prop has an appearance")
        .alpha = 1.0;
    step(&mut app, 0.1);
    let commands = backend.take_commands();

    assert_eq!(world_of(&app, faded), before);
    assert!(direct_draw_worlds(&commands).is_empty());
    let worlds = instanced_worlds(&commands);
    assert_eq!(worlds.iter().filter(|world| **world == before).count(), 2);
}

#[test]
fn failed_batch_disables_instancing_and_falls_back() {
    let backend = RecordingBackend::new();
    let mut app = render_app(settings_without_blending(), Some(&backend));
    insert_model(&mut app, PILLAR, prop_model());
    let props = spawn_props(&mut app, 3);

    backend.fail_instanced_draws(true);
    step(&mut app, 0.1);
    let commands = backend.take_commands();

    assert!(!app.world().resource::<StaticInstancingManager>().is_enabled());
    let stats = app.world().resource::<RenderStats>().clone();
    assert_eq!(stats.instanced_batches, 0);
    assert_eq!(stats.draw_calls, 6);
    assert_eq!(stats.failed_objects, 0);

    let direct = direct_draw_worlds(&commands);
    for &prop in &props {
        let expected = world_of(&app, prop);
        assert_eq!(direct.iter().filter(|world| **world == expected).count(), 2);
    }

    // Instancing stays off for the session even after the backend recovers.
    backend.fail_instanced_draws(false);
    step(&mut app, 0.1);
    let commands = backend.take_commands();
    assert_eq!(instanced_draw_count(&commands), 0);
    assert_eq!(direct_draw_worlds(&commands).len(), 6);
}

#[test]
fn late_batch_failure_redraws_only_the_undrawn_meshes() {
    let backend = RecordingBackend::new();
    let mut app = render_app(settings_without_blending(), Some(&backend));
    insert_model(&mut app, PILLAR, prop_model());
    let props = spawn_props(&mut app, 3);

    // The first mesh batch draws, the second is rejected.
    backend.fail_instanced_draws_after(1);
    step(&mut app, 0.1);
    let commands = backend.take_commands();

    assert!(!app.world().resource::<StaticInstancingManager>().is_enabled());
    let stats = app.world().resource::<RenderStats>().clone();
    assert_eq!(stats.instanced_batches, 1);
    assert_eq!(stats.instances_drawn, 3);
    assert_eq!(stats.draw_calls, 3);

    assert_eq!(instanced_draw_count(&commands), 1);
    let direct = direct_draw_worlds(&commands);
    for &prop in &props {
        let expected = world_of(&app, prop);
        assert_eq!(direct.iter().filter(|world| **world == expected).count(), 1);
    }
}
