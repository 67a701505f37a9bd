use crate::lighting::MAX_SHADER_LIGHTS;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SETTINGS_FILE_PATH: &str = "./render_settings.yaml";

const OBJECT_LIGHTS_ENV: &str = "MODEL_RENDER_OBJECT_LIGHTS";
const ZONE_SIZE_ENV: &str = "MODEL_RENDER_ZONE_SIZE";
const MIN_OBJECT_LIGHTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationSettings {
    pub speed_multiplier: f32,
    pub blend_duration_secs: f32,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            blend_duration_secs: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingSettings {
    pub max_object_lights: usize,
    pub max_batch_lights: usize,
    pub influence_zone_size: f32,
}

impl Default for LightingSettings {
    fn default() -> Self {
        Self {
            max_object_lights: 8,
            max_batch_lights: 4,
            influence_zone_size: 400.0,
        }
    }
}

impl LightingSettings {
    /// Overlays environment overrides and clamps everything into the range the
    /// shaders accept.
    pub fn resolved(&self) -> Self {
        let max_object_lights = std::env::var(OBJECT_LIGHTS_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .unwrap_or(self.max_object_lights)
            .clamp(MIN_OBJECT_LIGHTS, MAX_SHADER_LIGHTS);

        let influence_zone_size = std::env::var(ZONE_SIZE_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<f32>().ok())
            .filter(|value| value.is_finite() && *value > 0.0)
            .unwrap_or(self.influence_zone_size);
        let influence_zone_size = if influence_zone_size.is_finite() && influence_zone_size > 0.0
        {
            influence_zone_size
        } else {
            Self::default().influence_zone_size
        };

        Self {
            max_object_lights,
            max_batch_lights: self.max_batch_lights.clamp(1, MAX_SHADER_LIGHTS),
            influence_zone_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinningSettings {
    pub gpu_skinning: bool,
    /// Models with more bones than this fall back to CPU skinning.
    pub max_gpu_bones: usize,
}

impl Default for SkinningSettings {
    fn default() -> Self {
        Self {
            gpu_skinning: true,
            max_gpu_bones: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancingSettings {
    pub enabled: bool,
    pub initial_instance_capacity: usize,
}

impl Default for InstancingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_instance_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Resource, Default)]
#[serde(default)]
pub struct RenderSettings {
    pub animation: AnimationSettings,
    pub lighting: LightingSettings,
    pub skinning: SkinningSettings,
    pub instancing: InstancingSettings,
}

impl RenderSettings {
    /// Settings as the frame systems consume them: environment overrides
    /// applied, out-of-range values clamped.
    pub fn resolved(&self) -> Self {
        let mut resolved = self.clone();
        resolved.lighting = self.lighting.resolved();
        if !resolved.animation.speed_multiplier.is_finite() {
            resolved.animation.speed_multiplier = 1.0;
        }
        if !resolved.animation.blend_duration_secs.is_finite() {
            resolved.animation.blend_duration_secs = 0.0;
        }
        resolved.animation.blend_duration_secs = resolved.animation.blend_duration_secs.max(0.0);
        resolved.instancing.initial_instance_capacity =
            resolved.instancing.initial_instance_capacity.max(1);
        resolved
    }
}

#[derive(Debug, Error)]
pub enum SettingsIoError {
    #[error("failed to read settings file: {0}")]
    Read(std::io::Error),
    #[error("failed to write settings file: {0}")]
    Write(std::io::Error),
    #[error("failed to decode YAML settings: {0}")]
    Deserialize(serde_yaml::Error),
    #[error("failed to encode YAML settings: {0}")]
    Serialize(serde_yaml::Error),
}

pub fn settings_path() -> PathBuf {
    PathBuf::from(SETTINGS_FILE_PATH)
}

pub fn load_settings_or_default() -> RenderSettings {
    load_settings_from_path_or_default(Path::new(SETTINGS_FILE_PATH))
}

pub fn load_settings_from_path_or_default(path: &Path) -> RenderSettings {
    if !path.exists() {
        return RenderSettings::default();
    }

    match load_settings_from_path(path) {
        Ok(settings) => settings,
        Err(error) => {
            warn!(
                "Failed to load render settings from '{}': {}. Falling back to defaults.",
                path.display(),
                error
            );
            RenderSettings::default()
        }
    }
}

pub fn ensure_settings_file_exists(settings: &RenderSettings) -> Result<(), SettingsIoError> {
    let path = Path::new(SETTINGS_FILE_PATH);
    if path.exists() {
        return Ok(());
    }

    write_settings_to_path(settings, path)
}

pub fn load_settings_from_path(path: &Path) -> Result<RenderSettings, SettingsIoError> {
    let raw = fs::read_to_string(path).map_err(SettingsIoError::Read)?;
    serde_yaml::from_str::<RenderSettings>(&raw).map_err(SettingsIoError::Deserialize)
}

pub fn write_settings_to_path(settings: &RenderSettings, path: &Path) -> Result<(), SettingsIoError> {
    let encoded = serde_yaml::to_string(settings).map_err(SettingsIoError::Serialize)?;
    fs::write(path, encoded).map_err(SettingsIoError::Write)
}
