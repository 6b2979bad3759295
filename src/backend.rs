//! Capability interfaces to the windowing server and GPU
//!
//! The core never talks to X11 or GLX directly; everything it needs from
//! its surroundings comes through these traits. A compositor instance can
//! therefore be driven by a live server (`crate::x11::X11Backend`) or by
//! the in-memory fake used in tests, and multiple instances can coexist
//! without sharing ambient state.

use crate::error::Result;
use crate::events::Notification;
use crate::registry::{PixmapId, TextureId, WindowId};

/// One GPU-importable pixel format, pre-extracted from whatever the
/// backend enumerates (GLX FBConfigs on the live backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Backend-opaque identifier for the underlying config.
    pub id: u64,
    /// Binds with an alpha channel (RGBA rather than RGB).
    pub alpha: bool,
    /// Multisample count; texture-from-pixmap needs single-sampled.
    pub samples: u8,
    /// Supported bind targets include 2-D textures.
    pub texture_2d: bool,
}

/// Source of structural notifications, in arrival order.
pub trait EventSource {
    /// Number of notifications queued right now. The event pump snapshots
    /// this once per drain so a single call does bounded work.
    fn pending_notifications(&mut self) -> Result<usize>;

    /// Pop the next queued notification, if any.
    fn next_notification(&mut self) -> Result<Option<Notification>>;
}

/// Offscreen pixmap provider and GPU binder.
pub trait TextureBackend {
    /// Root window the mirrored tree hangs off.
    fn root(&self) -> WindowId;

    /// Children of the root in stacking order (bottom to top), used once
    /// at startup to seed the registry.
    fn enumerate_initial_children(&mut self) -> Result<Vec<(WindowId, WindowId)>>;

    /// Reported pixel depth of the window; 32 means an alpha channel.
    fn window_depth(&mut self, window: WindowId) -> Result<u8>;

    /// Available pixel formats for texture binding.
    fn pixel_formats(&mut self) -> Result<Vec<PixelFormat>>;

    /// Derive an offscreen pixmap from the window's current contents.
    fn name_offscreen_pixmap(&mut self, window: WindowId) -> Result<PixmapId>;

    /// Derive a GPU-sampleable handle from the pixmap and format.
    fn create_gpu_texture(&mut self, pixmap: PixmapId, format: &PixelFormat)
        -> Result<TextureId>;

    /// Detach the texture from sampling. Cheap and reversible; the
    /// underlying resources stay valid.
    fn release_gpu_texture(&mut self, texture: TextureId);

    /// Destroy the GPU handle.
    fn destroy_gpu_texture(&mut self, texture: TextureId);

    /// Destroy the offscreen pixmap.
    fn destroy_offscreen_pixmap(&mut self, pixmap: PixmapId);
}

/// Everything a compositor instance needs from its surroundings.
pub trait Backend: EventSource + TextureBackend {}

impl<T: EventSource + TextureBackend> Backend for T {}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory backend for driving the core in tests.

    use std::collections::{HashMap, HashSet, VecDeque};

    use super::*;

    pub const FAKE_ROOT: WindowId = 1;

    pub struct FakeBackend {
        pub queue: VecDeque<Notification>,
        pub formats: Vec<PixelFormat>,
        pub depths: HashMap<WindowId, u8>,
        pub default_depth: u8,
        pub initial: Vec<(WindowId, WindowId)>,
        next_pixmap: PixmapId,
        next_texture: TextureId,
        pub live_pixmaps: HashSet<PixmapId>,
        pub live_textures: HashSet<TextureId>,
        pub pixmap_destroys: HashMap<PixmapId, u32>,
        pub texture_destroys: HashMap<TextureId, u32>,
        pub texture_releases: u32,
        pub format_enumerations: u32,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self {
                queue: VecDeque::new(),
                formats: vec![
                    PixelFormat { id: 0, alpha: false, samples: 0, texture_2d: true },
                    PixelFormat { id: 1, alpha: true, samples: 0, texture_2d: true },
                    // Multisampled and off-target configs the scan must skip.
                    PixelFormat { id: 2, alpha: true, samples: 4, texture_2d: true },
                    PixelFormat { id: 3, alpha: false, samples: 0, texture_2d: false },
                ],
                depths: HashMap::new(),
                default_depth: 24,
                initial: Vec::new(),
                next_pixmap: 1000,
                next_texture: 5000,
                live_pixmaps: HashSet::new(),
                live_textures: HashSet::new(),
                pixmap_destroys: HashMap::new(),
                texture_destroys: HashMap::new(),
                texture_releases: 0,
                format_enumerations: 0,
            }
        }

        pub fn push(&mut self, notification: Notification) {
            self.queue.push_back(notification);
        }

        pub fn destroy_count_pixmap(&self, pixmap: PixmapId) -> u32 {
            self.pixmap_destroys.get(&pixmap).copied().unwrap_or(0)
        }

        pub fn destroy_count_texture(&self, texture: TextureId) -> u32 {
            self.texture_destroys.get(&texture).copied().unwrap_or(0)
        }
    }

    impl EventSource for FakeBackend {
        fn pending_notifications(&mut self) -> Result<usize> {
            Ok(self.queue.len())
        }

        fn next_notification(&mut self) -> Result<Option<Notification>> {
            Ok(self.queue.pop_front())
        }
    }

    impl TextureBackend for FakeBackend {
        fn root(&self) -> WindowId {
            FAKE_ROOT
        }

        fn enumerate_initial_children(&mut self) -> Result<Vec<(WindowId, WindowId)>> {
            Ok(self.initial.clone())
        }

        fn window_depth(&mut self, window: WindowId) -> Result<u8> {
            Ok(self.depths.get(&window).copied().unwrap_or(self.default_depth))
        }

        fn pixel_formats(&mut self) -> Result<Vec<PixelFormat>> {
            self.format_enumerations += 1;
            Ok(self.formats.clone())
        }

        fn name_offscreen_pixmap(&mut self, _window: WindowId) -> Result<PixmapId> {
            self.next_pixmap += 1;
            self.live_pixmaps.insert(self.next_pixmap);
            Ok(self.next_pixmap)
        }

        fn create_gpu_texture(
            &mut self,
            _pixmap: PixmapId,
            _format: &PixelFormat,
        ) -> Result<TextureId> {
            self.next_texture += 1;
            self.live_textures.insert(self.next_texture);
            Ok(self.next_texture)
        }

        fn release_gpu_texture(&mut self, _texture: TextureId) {
            self.texture_releases += 1;
        }

        fn destroy_gpu_texture(&mut self, texture: TextureId) {
            self.live_textures.remove(&texture);
            *self.texture_destroys.entry(texture).or_insert(0) += 1;
        }

        fn destroy_offscreen_pixmap(&mut self, pixmap: PixmapId) {
            self.live_pixmaps.remove(&pixmap);
            *self.pixmap_destroys.entry(pixmap).or_insert(0) += 1;
        }
    }
}
