use bevy::prelude::*;
use bevy::tasks::{AsyncComputeTaskPool, Task, TaskPool, block_on};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// GPU texture handle handed out by the texture system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Flags read from the per-texture script file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureScriptFlags {
    pub hidden: bool,
    pub additive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureChannelInfo {
    pub component_count: u8,
}

impl Default for TextureChannelInfo {
    fn default() -> Self {
        Self { component_count: 3 }
    }
}

impl TextureChannelInfo {
    pub fn has_alpha(&self) -> bool {
        self.component_count >= 4
    }
}

/// Everything the draw path needs to know about a mesh texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub handle: TextureHandle,
    pub flags: TextureScriptFlags,
    pub channels: TextureChannelInfo,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TextureError {
    #[error("texture '{0}' not found")]
    Missing(String),
    #[error("texture '{path}' could not be decoded: {reason}")]
    Decode { path: String, reason: String },
}

/// Contract of the texture/material loader.
pub trait TextureSource: Send + Sync + 'static {
    fn load(&self, path: &str) -> Result<TextureHandle, TextureError>;
    fn script_flags(&self, path: &str) -> TextureScriptFlags;
    fn channel_info(&self, path: &str) -> TextureChannelInfo;
}

fn resolve_binding(source: &dyn TextureSource, path: &str) -> Result<TextureBinding, TextureError> {
    let handle = source.load(path)?;
    Ok(TextureBinding {
        handle,
        flags: source.script_flags(path),
        channels: source.channel_info(path),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureLookup {
    Ready(TextureBinding),
    Loading,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
enum TextureSlot {
    Loading,
    Ready(TextureBinding),
    Failed,
}

/// Path-keyed texture cache in front of a [`TextureSource`].
///
/// The cache is the one structure shared with background tasks, so it sits
/// behind a mutex.
#[derive(Resource, Clone)]
pub struct TextureLibrary {
    source: Arc<dyn TextureSource>,
    slots: Arc<Mutex<HashMap<String, TextureSlot>>>,
}

impl TextureLibrary {
    pub fn new(source: Arc<dyn TextureSource>) -> Self {
        Self {
            source,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn lookup(&self, path: &str) -> TextureLookup {
        match self.slots.lock().get(path) {
            Some(TextureSlot::Ready(binding)) => TextureLookup::Ready(*binding),
            Some(TextureSlot::Loading) => TextureLookup::Loading,
            Some(TextureSlot::Failed) => TextureLookup::Failed,
            None => TextureLookup::Unknown,
        }
    }

    /// Claims `path` for loading. Returns false when it is already cached or
    /// in flight.
    fn begin_load(&self, path: &str) -> bool {
        let mut slots = self.slots.lock();
        if slots.contains_key(path) {
            return false;
        }
        slots.insert(path.to_string(), TextureSlot::Loading);
        true
    }

    fn complete(&self, path: &str, result: &Result<TextureBinding, TextureError>) {
        let slot = match result {
            Ok(binding) => TextureSlot::Ready(*binding),
            Err(_) => TextureSlot::Failed,
        };
        self.slots.lock().insert(path.to_string(), slot);
    }

    fn forget(&self, path: &str) {
        self.slots.lock().remove(path);
    }

    /// Loads `path` on the calling thread, e.g. to warm the cache during a map
    /// load. Paths already cached or in flight are left alone.
    pub fn preload(&self, path: &str) -> TextureLookup {
        if self.begin_load(path) {
            let result = resolve_binding(self.source.as_ref(), path);
            if let Err(error) = &result {
                warn!("Texture preload failed: {}", error);
            }
            self.complete(path, &result);
        }
        self.lookup(path)
    }
}

struct PendingTextureLoad {
    path: String,
    requester: Entity,
    task: Task<Result<TextureBinding, TextureError>>,
}

/// Background texture loads dispatched from the frame thread.
#[derive(Resource, Default)]
pub struct TextureStreamer {
    pending: Vec<PendingTextureLoad>,
}

/// Result of polling the finished loads for one frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TexturePollReport {
    pub ready: Vec<Entity>,
    pub failed: usize,
    pub discarded: usize,
}

impl TextureStreamer {
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Starts loading `path` on the async compute pool unless the library
    /// already knows about it.
    pub fn request(&mut self, library: &TextureLibrary, path: &str, requester: Entity) -> bool {
        if !library.begin_load(path) {
            return false;
        }

        let source = library.source.clone();
        let owned_path = path.to_string();
        let task = AsyncComputeTaskPool::get_or_init(TaskPool::new)
            .spawn(async move { resolve_binding(source.as_ref(), &owned_path) });

        debug!("Texture load dispatched for '{}'", path);
        self.pending.push(PendingTextureLoad {
            path: path.to_string(),
            requester,
            task,
        });
        true
    }

    /// Moves finished loads into the library. Loads whose requester no longer
    /// exists are dropped and the path is released for a later request.
    pub fn poll(
        &mut self,
        library: &TextureLibrary,
        requester_alive: impl Fn(Entity) -> bool,
    ) -> TexturePollReport {
        let mut report = TexturePollReport::default();
        let mut index = 0;

        while index < self.pending.len() {
            if !self.pending[index].task.is_finished() {
                index += 1;
                continue;
            }

            let load = self.pending.swap_remove(index);
            let result = block_on(load.task);

            if !requester_alive(load.requester) {
                debug!(
                    "Discarding texture '{}' loaded for despawned object {:?}",
                    load.path, load.requester
                );
                library.forget(&load.path);
                report.discarded += 1;
                continue;
            }

            if let Err(error) = &result {
                warn!("Texture load failed: {}", error);
                report.failed += 1;
            }
            library.complete(&load.path, &result);
            report.ready.push(load.requester);
        }

        report
    }
}

/// In-memory texture table. Every registered path resolves to a fresh handle.
#[derive(Default)]
pub struct StaticTextureSource {
    entries: HashMap<String, (TextureScriptFlags, TextureChannelInfo)>,
    next_handle: AtomicU64,
}

impl StaticTextureSource {
    pub fn with_texture(
        mut self,
        path: &str,
        flags: TextureScriptFlags,
        channels: TextureChannelInfo,
    ) -> Self {
        self.entries.insert(path.to_string(), (flags, channels));
        self
    }
}

impl TextureSource for StaticTextureSource {
    fn load(&self, path: &str) -> Result<TextureHandle, TextureError> {
        if !self.entries.contains_key(path) {
            return Err(TextureError::Missing(path.to_string()));
        }
        Ok(TextureHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1))
    }

    fn script_flags(&self, path: &str) -> TextureScriptFlags {
        self.entries.get(path).map(|entry| entry.0).unwrap_or_default()
    }

    fn channel_info(&self, path: &str) -> TextureChannelInfo {
        self.entries.get(path).map(|entry| entry.1).unwrap_or_default()
    }
}
