#![allow(dead_code)]

use bevy::app::TaskPoolPlugin;
use bevy::prelude::*;
use model_render::ModelRenderPlugin;
use model_render::model::texture::{
    StaticTextureSource, TextureChannelInfo, TextureLibrary, TextureScriptFlags,
};
use model_render::model::{Action, Bone, BoneKeys, MeshDesc, ModelAsset, ModelId, ModelLibrary, ModelVertex};
use model_render::render::{RecordingBackend, RenderBackend};
use model_render::settings::RenderSettings;
use std::sync::Arc;
use std::time::Duration;

pub const OPAQUE_TEXTURE: &str = "stone.jpg";
pub const ALPHA_TEXTURE: &str = "fence.tga";

pub fn texture_library() -> TextureLibrary {
    let source = StaticTextureSource::default()
        .with_texture(
            OPAQUE_TEXTURE,
            TextureScriptFlags::default(),
            TextureChannelInfo { component_count: 3 },
        )
        .with_texture(
            ALPHA_TEXTURE,
            TextureScriptFlags::default(),
            TextureChannelInfo { component_count: 4 },
        );
    let library = TextureLibrary::new(Arc::new(source));
    library.preload(OPAQUE_TEXTURE);
    library.preload(ALPHA_TEXTURE);
    library
}

/// App with the render plugin, a manual clock and a recording backend.
/// Pass `None` to leave the backend out, which keeps dirty flags from being
/// consumed by the draw stage.
pub fn render_app(settings: RenderSettings, backend: Option<&RecordingBackend>) -> App {
    let mut app = App::new();
    app.add_plugins(TaskPoolPlugin::default())
        .init_resource::<Time>()
        .insert_resource(settings)
        .insert_resource(texture_library());
    if let Some(backend) = backend {
        app.insert_resource(RenderBackend::new(backend.clone()));
    }
    app.add_plugins(ModelRenderPlugin);
    app
}

pub fn step(app: &mut App, seconds: f32) {
    app.world_mut()
        .resource_mut::<Time>()
        .advance_by(Duration::from_secs_f32(seconds));
    app.update();
}

pub fn insert_model(app: &mut App, id: ModelId, model: ModelAsset) {
    app.world_mut().resource_mut::<ModelLibrary>().insert(id, model);
}

pub fn triangle(texture_path: &str) -> MeshDesc {
    let vertex = |x: f32, y: f32| ModelVertex {
        position: Vec3::new(x, y, 0.0),
        normal: Vec3::Z,
        uv: Vec2::new(x, y),
        bone: 0,
    };
    MeshDesc {
        texture_path: texture_path.to_string(),
        vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(0.0, 1.0)],
        indices: vec![0, 1, 2],
        two_sided: false,
        glow: false,
    }
}

/// One root bone whose key `k` sits at `x = k`, so the root translation
/// reads back the sampled frame. One action per entry of `key_counts`.
pub fn root_track_model(key_counts: &[usize], play_speed: f32) -> ModelAsset {
    let actions: Vec<BoneKeys> = key_counts
        .iter()
        .map(|&count| BoneKeys {
            positions: (0..count).map(|key| Vec3::new(key as f32, 0.0, 0.0)).collect(),
            rotations: vec![Quat::IDENTITY; count],
        })
        .collect();

    ModelAsset {
        name: "walker".to_string(),
        bones: vec![Bone {
            name: "root".to_string(),
            parent: None,
            actions,
        }],
        actions: key_counts
            .iter()
            .map(|&key_count| Action {
                key_count,
                play_speed,
                lock_root_position: false,
            })
            .collect(),
        meshes: vec![triangle(OPAQUE_TEXTURE)],
    }
}

/// Unanimated map prop with two opaque meshes.
pub fn prop_model() -> ModelAsset {
    ModelAsset {
        name: "pillar".to_string(),
        bones: vec![Bone {
            name: "root".to_string(),
            parent: None,
            actions: vec![BoneKeys {
                positions: vec![Vec3::ZERO],
                rotations: vec![Quat::IDENTITY],
            }],
        }],
        actions: vec![Action::default()],
        meshes: vec![triangle(OPAQUE_TEXTURE), triangle(OPAQUE_TEXTURE)],
    }
}

pub fn settings_without_blending() -> RenderSettings {
    let mut settings = RenderSettings::default();
    settings.animation.blend_duration_secs = 0.0;
    settings
}
