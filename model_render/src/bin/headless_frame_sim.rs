use bevy::app::TaskPoolPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;
use model_render::animation::AnimationState;
use model_render::lighting::{DynamicLightSnapshot, LightingField};
use model_render::model::texture::{
    StaticTextureSource, TextureChannelInfo, TextureLibrary, TextureScriptFlags,
};
use model_render::model::{
    Action, Bone, BoneKeys, MeshDesc, ModelAsset, ModelId, ModelLibrary, ModelVertex,
};
use model_render::object_runtime::{
    ObjectKind, ParentLink, bone_attached_bundle, model_object_bundle, pose_linked_bundle,
};
use model_render::render::{RecordingBackend, RenderBackend, RenderStats};
use model_render::settings::{ensure_settings_file_exists, load_settings_or_default};
use model_render::ModelRenderPlugin;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

const FRAME_COUNT: u32 = 120;
const FRAME_TIME: Duration = Duration::from_millis(16);
const CROWD_SIZE: usize = 40;
const PROP_COUNT: usize = 200;
const LIGHT_COUNT: usize = 24;
const ACTION_SWITCH_INTERVAL: u32 = 30;

const CHARACTER_MODEL: ModelId = ModelId(1);
const ARMOR_MODEL: ModelId = ModelId(2);
const SWORD_MODEL: ModelId = ModelId(3);
const TREE_MODEL: ModelId = ModelId(10);

fn main() {
    let settings = load_settings_or_default();
    if let Err(error) = ensure_settings_file_exists(&settings) {
        eprintln!("Could not write default settings: {}", error);
    }

    let backend = RecordingBackend::new();
    let mut app = App::new();
    app.add_plugins((TaskPoolPlugin::default(), LogPlugin::default()))
        .init_resource::<Time>()
        .insert_resource(settings)
        .insert_resource(RenderBackend::new(backend.clone()))
        .insert_resource(TextureLibrary::new(Arc::new(texture_source())))
        .add_plugins(ModelRenderPlugin);

    load_models(app.world_mut());
    spawn_scene(app.world_mut());

    let mut totals = RenderStats::default();
    for frame in 0..FRAME_COUNT {
        app.world_mut().resource_mut::<Time>().advance_by(FRAME_TIME);
        if frame > 0 && frame % ACTION_SWITCH_INTERVAL == 0 {
            switch_crowd_actions(app.world_mut(), frame / ACTION_SWITCH_INTERVAL);
        }
        app.update();

        let stats = app.world().resource::<RenderStats>().clone();
        debug!("Frame {}: {:?}", frame, stats);
        accumulate(&mut totals, &stats);
    }

    info!(
        "{} frames: {} pose evaluations, {} buffer rebuilds, {} draws, {} state binds, {} instanced batches ({} instances), {} light scans, {} failed objects",
        FRAME_COUNT,
        totals.pose_evaluations,
        totals.buffer_rebuilds,
        totals.draw_calls,
        totals.state_binds,
        totals.instanced_batches,
        totals.instances_drawn,
        totals.light_scans,
        totals.failed_objects,
    );
    info!(
        "Recorded {} backend commands, {} live buffers",
        backend.commands().len(),
        backend.live_buffers()
    );

    app.world_mut().write_message(AppExit::Success);
    app.update();
    info!("{} live buffers after exit", backend.live_buffers());
}

fn accumulate(totals: &mut RenderStats, frame: &RenderStats) {
    totals.pose_evaluations += frame.pose_evaluations;
    totals.buffer_rebuilds += frame.buffer_rebuilds;
    totals.draw_calls += frame.draw_calls;
    totals.state_binds += frame.state_binds;
    totals.shadow_draws += frame.shadow_draws;
    totals.instanced_batches += frame.instanced_batches;
    totals.instances_drawn += frame.instances_drawn;
    totals.light_scans += frame.light_scans;
    totals.skipped_meshes += frame.skipped_meshes;
    totals.failed_objects += frame.failed_objects;
    totals.culled_objects += frame.culled_objects;
}

fn texture_source() -> StaticTextureSource {
    let opaque = TextureChannelInfo { component_count: 3 };
    StaticTextureSource::default()
        .with_texture("body.jpg", TextureScriptFlags::default(), opaque)
        .with_texture("armor.jpg", TextureScriptFlags::default(), opaque)
        .with_texture(
            "sword.tga",
            TextureScriptFlags::default(),
            TextureChannelInfo { component_count: 4 },
        )
        .with_texture("bark.jpg", TextureScriptFlags::default(), opaque)
        .with_texture("leaves.jpg", TextureScriptFlags::default(), opaque)
}

fn quad(texture_path: &str, bone: u16, offset: Vec3) -> MeshDesc {
    let corner = |x: f32, y: f32| ModelVertex {
        position: offset + Vec3::new(x, y, 0.0),
        normal: Vec3::Z,
        uv: Vec2::new(x.max(0.0), y.max(0.0)),
        bone,
    };
    MeshDesc {
        texture_path: texture_path.to_string(),
        vertices: vec![
            corner(-1.0, -1.0),
            corner(1.0, -1.0),
            corner(1.0, 1.0),
            corner(-1.0, 1.0),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
        two_sided: false,
        glow: false,
    }
}

/// Two-bone rig: a root and a swinging arm, with idle, walk and attack.
fn character_model() -> ModelAsset {
    let key_counts = [1usize, 8, 12];
    let root_keys = key_counts
        .iter()
        .map(|&count| BoneKeys {
            positions: vec![Vec3::ZERO; count],
            rotations: vec![Quat::IDENTITY; count],
        })
        .collect();
    let arm_keys = key_counts
        .iter()
        .map(|&count| BoneKeys {
            positions: vec![Vec3::new(0.0, 0.0, 100.0); count],
            rotations: (0..count)
                .map(|key| Quat::from_rotation_x(key as f32 * 0.2))
                .collect(),
        })
        .collect();

    ModelAsset {
        name: "character".to_string(),
        bones: vec![
            Bone {
                name: "root".to_string(),
                parent: None,
                actions: root_keys,
            },
            Bone {
                name: "arm".to_string(),
                parent: Some(0),
                actions: arm_keys,
            },
        ],
        actions: key_counts
            .iter()
            .map(|&key_count| Action {
                key_count,
                play_speed: 8.0,
                lock_root_position: false,
            })
            .collect(),
        meshes: vec![quad("body.jpg", 0, Vec3::ZERO), quad("body.jpg", 1, Vec3::Z)],
    }
}

fn static_model(name: &str, meshes: Vec<MeshDesc>) -> ModelAsset {
    ModelAsset {
        name: name.to_string(),
        bones: vec![Bone {
            name: "root".to_string(),
            parent: None,
            actions: vec![BoneKeys {
                positions: vec![Vec3::ZERO],
                rotations: vec![Quat::IDENTITY],
            }],
        }],
        actions: vec![Action::default()],
        meshes,
    }
}

fn load_models(world: &mut World) {
    let mut library = world.resource_mut::<ModelLibrary>();
    library.insert(CHARACTER_MODEL, character_model());
    library.insert(
        ARMOR_MODEL,
        ModelAsset {
            name: "armor".to_string(),
            bones: Vec::new(),
            actions: Vec::new(),
            meshes: vec![quad("armor.jpg", 0, Vec3::Z * 0.5), quad("armor.jpg", 0, Vec3::Z)],
        },
    );
    library.insert(
        SWORD_MODEL,
        static_model("sword", vec![quad("sword.tga", 0, Vec3::ZERO)]),
    );
    library.insert(
        TREE_MODEL,
        static_model(
            "tree",
            vec![
                quad("bark.jpg", 0, Vec3::ZERO),
                quad("leaves.jpg", 0, Vec3::Z * 3.0),
            ],
        ),
    );

    let textures = world.resource::<TextureLibrary>().clone();
    for path in ["bark.jpg", "leaves.jpg"] {
        textures.preload(path);
    }
}

fn spawn_scene(world: &mut World) {
    let mut rng = StdRng::seed_from_u64(7);

    let lights: Vec<DynamicLightSnapshot> = (0..LIGHT_COUNT)
        .map(|_| {
            DynamicLightSnapshot::new(
                Vec3::new(rng.gen_range(0.0..4000.0), rng.gen_range(0.0..4000.0), 150.0),
                Vec3::new(1.0, rng.gen_range(0.5..1.0), 0.4),
                rng.gen_range(200.0..600.0),
                rng.gen_range(0.5..2.0),
            )
        })
        .collect();
    world.resource_mut::<LightingField>().set_active_lights(lights);

    for index in 0..CROWD_SIZE {
        let position = Vec3::new(rng.gen_range(0.0..4000.0), rng.gen_range(0.0..4000.0), 0.0);
        let kind = if index % 4 == 0 {
            ObjectKind::Monster
        } else {
            ObjectKind::Character
        };
        let body = world
            .spawn(model_object_bundle(
                CHARACTER_MODEL,
                kind,
                Transform::from_translation(position),
            ))
            .id();
        world.spawn(pose_linked_bundle(
            ARMOR_MODEL,
            ObjectKind::Equipment,
            body,
            Transform::IDENTITY,
        ));
        world.spawn(bone_attached_bundle(
            SWORD_MODEL,
            ObjectKind::Equipment,
            body,
            1,
            Transform::from_xyz(0.0, 0.0, 20.0),
        ));
    }

    for _ in 0..PROP_COUNT {
        let position = Vec3::new(rng.gen_range(0.0..4000.0), rng.gen_range(0.0..4000.0), 0.0);
        world.spawn(model_object_bundle(
            TREE_MODEL,
            ObjectKind::MapObject,
            Transform::from_translation(position)
                .with_rotation(Quat::from_rotation_z(rng.gen_range(0.0..std::f32::consts::TAU))),
        ));
    }

    info!(
        "Spawned {} characters with attachments and {} props",
        CROWD_SIZE, PROP_COUNT
    );
}

/// Cycles the crowd between walk and attack so blends happen mid-run.
fn switch_crowd_actions(world: &mut World, round: u32) {
    let action = if round % 2 == 1 { 2 } else { 1 };
    let mut query = world.query_filtered::<&mut AnimationState, Without<ParentLink>>();
    for mut state in query.iter_mut(world) {
        state.current_action = action;
    }
}
