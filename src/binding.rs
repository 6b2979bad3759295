//! Texture Binding Cache
//!
//! Lazily materializes a window's offscreen contents as a GPU-sampleable
//! texture and guarantees no stale GPU resource outlives the window's
//! mapped lifetime. The cache, not the registry, owns the release path
//! for binding resources: registry removal always routes through
//! `invalidate` first.
//!
//! Binding is deferred to the first render request because most tracked
//! windows are never drawn in a given frame (unmapped, minimized, or
//! fully occluded).

use tracing::{debug, trace};

use crate::backend::{PixelFormat, TextureBackend};
use crate::error::{Error, Result};
use crate::registry::{Binding, BindingState, TextureId, WindowRecord};

/// Depth of an ARGB visual; anything shallower binds as RGB.
const DEPTH_RGBA: u8 = 32;

/// Creates and destroys per-window offscreen-to-GPU bindings.
#[derive(Debug, Default)]
pub struct TextureCache {
    /// Fetched from the backend once and kept: format compatibility
    /// depends only on window depth, which cannot change without an
    /// unmap/remap cycle that already invalidates the binding.
    formats: Option<Vec<PixelFormat>>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the window's GPU texture handle, binding it first if the
    /// record is unbound. An existing binding is returned as-is: contents
    /// are re-sampled live through the offscreen/GPU linkage, never
    /// re-snapshotted.
    pub fn acquire<B: TextureBackend>(
        &mut self,
        record: &mut WindowRecord,
        backend: &mut B,
    ) -> Result<TextureId> {
        if let BindingState::Bound(binding) = record.binding {
            return Ok(binding.texture);
        }

        let depth = backend.window_depth(record.window)?;
        let format = self.select_format(backend, depth)?;
        let pixmap = backend.name_offscreen_pixmap(record.window)?;
        let texture = match backend.create_gpu_texture(pixmap, &format) {
            Ok(texture) => texture,
            Err(err) => {
                // Never leave a half-built binding behind.
                backend.destroy_offscreen_pixmap(pixmap);
                return Err(err);
            }
        };

        debug!(
            "Bound window {}: pixmap {} -> texture {} (depth {}, format {})",
            record.window, pixmap, texture, depth, format.id
        );
        record.binding = BindingState::Bound(Binding { pixmap, texture });
        Ok(texture)
    }

    /// Detach the bound texture from sampling without destroying the
    /// underlying resources. No-op on an unbound record.
    pub fn release<B: TextureBackend>(&self, record: &WindowRecord, backend: &mut B) {
        if let BindingState::Bound(binding) = record.binding {
            backend.release_gpu_texture(binding.texture);
        }
    }

    /// Destroy both handles of the record's binding, if present, and mark
    /// it unbound. Idempotent: a second call finds nothing to free.
    pub fn invalidate<B: TextureBackend>(&self, record: &mut WindowRecord, backend: &mut B) {
        if let BindingState::Bound(binding) = std::mem::take(&mut record.binding) {
            trace!(
                "Invalidating binding for window {} (pixmap {}, texture {})",
                record.window, binding.pixmap, binding.texture
            );
            backend.destroy_gpu_texture(binding.texture);
            backend.destroy_offscreen_pixmap(binding.pixmap);
        }
    }

    /// First format that binds 2-D, single-sampled, and matches the
    /// window's alpha capability: depth-32 windows need an RGBA format,
    /// everything else an RGB one.
    fn select_format<B: TextureBackend>(
        &mut self,
        backend: &mut B,
        depth: u8,
    ) -> Result<PixelFormat> {
        if self.formats.is_none() {
            self.formats = Some(backend.pixel_formats()?);
        }
        let wants_alpha = depth == DEPTH_RGBA;
        self.formats
            .as_deref()
            .unwrap_or_default()
            .iter()
            .copied()
            .find(|f| f.texture_2d && f.samples <= 1 && f.alpha == wants_alpha)
            .ok_or(Error::NoCompatibleFormat { depth })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;

    fn record(window: u32) -> WindowRecord {
        WindowRecord {
            window,
            parent: 1,
            binding: BindingState::Unbound,
        }
    }

    #[test]
    fn test_acquire_binds_lazily() {
        let mut backend = FakeBackend::new();
        let mut cache = TextureCache::new();
        let mut rec = record(5);

        assert!(!rec.binding.is_bound());
        let texture = cache.acquire(&mut rec, &mut backend).unwrap();
        match rec.binding {
            BindingState::Bound(b) => {
                assert_eq!(b.texture, texture);
                assert!(backend.live_pixmaps.contains(&b.pixmap));
                assert!(backend.live_textures.contains(&b.texture));
            }
            BindingState::Unbound => panic!("record still unbound after acquire"),
        }
    }

    #[test]
    fn test_acquire_twice_returns_same_handle() {
        let mut backend = FakeBackend::new();
        let mut cache = TextureCache::new();
        let mut rec = record(5);

        let first = cache.acquire(&mut rec, &mut backend).unwrap();
        let second = cache.acquire(&mut rec, &mut backend).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.live_textures.len(), 1);
    }

    #[test]
    fn test_format_selection_by_depth() {
        let mut backend = FakeBackend::new();
        let mut cache = TextureCache::new();

        let mut opaque = record(5);
        backend.depths.insert(5, 24);
        cache.acquire(&mut opaque, &mut backend).unwrap();

        let mut argb = record(6);
        backend.depths.insert(6, 32);
        cache.acquire(&mut argb, &mut backend).unwrap();

        // Both bound; the format list was fetched exactly once.
        assert!(opaque.binding.is_bound());
        assert!(argb.binding.is_bound());
        assert_eq!(backend.format_enumerations, 1);
    }

    #[test]
    fn test_no_compatible_format() {
        let mut backend = FakeBackend::new();
        // Only a multisampled RGBA config is on offer.
        backend.formats = vec![PixelFormat {
            id: 9,
            alpha: true,
            samples: 8,
            texture_2d: true,
        }];
        let mut cache = TextureCache::new();
        let mut rec = record(5);
        backend.depths.insert(5, 32);

        let err = cache.acquire(&mut rec, &mut backend).unwrap_err();
        assert!(matches!(err, Error::NoCompatibleFormat { depth: 32 }));
        assert!(!rec.binding.is_bound());
        // Nothing was derived for the failed bind.
        assert!(backend.live_pixmaps.is_empty());
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let mut backend = FakeBackend::new();
        let mut cache = TextureCache::new();
        let mut rec = record(5);

        cache.acquire(&mut rec, &mut backend).unwrap();
        let binding = match rec.binding {
            BindingState::Bound(b) => b,
            BindingState::Unbound => unreachable!(),
        };

        cache.invalidate(&mut rec, &mut backend);
        cache.invalidate(&mut rec, &mut backend);

        assert!(!rec.binding.is_bound());
        assert_eq!(backend.destroy_count_texture(binding.texture), 1);
        assert_eq!(backend.destroy_count_pixmap(binding.pixmap), 1);
    }

    #[test]
    fn test_release_keeps_binding() {
        let mut backend = FakeBackend::new();
        let mut cache = TextureCache::new();
        let mut rec = record(5);

        let texture = cache.acquire(&mut rec, &mut backend).unwrap();
        cache.release(&rec, &mut backend);

        assert_eq!(backend.texture_releases, 1);
        assert!(rec.binding.is_bound());
        // A later acquire re-samples through the same linkage.
        assert_eq!(cache.acquire(&mut rec, &mut backend).unwrap(), texture);
    }

    #[test]
    fn test_release_unbound_is_noop() {
        let mut backend = FakeBackend::new();
        let cache = TextureCache::new();
        let rec = record(5);
        cache.release(&rec, &mut backend);
        assert_eq!(backend.texture_releases, 0);
    }

    #[test]
    fn test_rebind_after_invalidate_derives_fresh_handles() {
        let mut backend = FakeBackend::new();
        let mut cache = TextureCache::new();
        let mut rec = record(5);

        let first = cache.acquire(&mut rec, &mut backend).unwrap();
        cache.invalidate(&mut rec, &mut backend);
        let second = cache.acquire(&mut rec, &mut backend).unwrap();

        assert_ne!(first, second);
        assert!(rec.binding.is_bound());
    }
}
