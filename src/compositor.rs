//! Compositor core
//!
//! Owns the window registry, the texture binding cache, the event
//! processor, and the backend for one compositor instance. A render loop
//! drives it: pump the notification stream once per frame, walk the
//! tracked windows bottom to top, and acquire a texture for each window
//! it wants to draw.

use tracing::{info, warn};

use crate::backend::Backend;
use crate::binding::TextureCache;
use crate::error::{Error, Result};
use crate::events::EventProcessor;
use crate::registry::{Position, TextureId, WindowId, WindowRecord, WindowRegistry};

pub struct Compositor<B: Backend> {
    backend: B,
    registry: WindowRegistry,
    cache: TextureCache,
    processor: EventProcessor,
}

impl<B: Backend> Compositor<B> {
    /// Seed the registry from the backend's current view of the tree and
    /// start mirroring.
    pub fn new(mut backend: B) -> Result<Self> {
        let mut registry = WindowRegistry::new();
        for (window, parent) in backend.enumerate_initial_children()? {
            if let Err(err) = registry.insert(window, parent, Position::Top) {
                warn!("Skipping window from initial enumeration: {}", err);
            }
        }
        info!(
            "Mirroring {} windows under root {}",
            registry.len(),
            backend.root()
        );
        Ok(Self {
            backend,
            registry,
            cache: TextureCache::new(),
            processor: EventProcessor::new(),
        })
    }

    /// Drain the notifications queued at the moment of the call and
    /// return how many were processed. Notifications arriving during the
    /// drain are left for the next call, bounding the work done here.
    pub fn pump_events(&mut self) -> usize {
        let pending = match self.backend.pending_notifications() {
            Ok(count) => count,
            Err(err) => {
                warn!("Failed to query pending notifications: {}", err);
                return 0;
            }
        };

        let mut drained = 0;
        for _ in 0..pending {
            let notification = match self.backend.next_notification() {
                Ok(Some(notification)) => notification,
                Ok(None) => break,
                Err(err) => {
                    warn!("Failed to read notification: {}", err);
                    break;
                }
            };
            drained += 1;
            if let Err(err) = self.processor.apply(
                &mut self.registry,
                &mut self.cache,
                &mut self.backend,
                notification,
            ) {
                // The registry keeps its last-consistent state; later
                // notifications are still worth applying.
                warn!("Skipping {:?}: {}", notification, err);
            }
        }
        drained
    }

    /// Tracked windows, bottom to top.
    pub fn windows(&self) -> impl Iterator<Item = &WindowRecord> {
        self.registry.iter()
    }

    pub fn window_count(&self) -> usize {
        self.registry.len()
    }

    /// GPU texture handle for the window, binding lazily on first use.
    pub fn acquire_texture(&mut self, window: WindowId) -> Result<TextureId> {
        let record = self
            .registry
            .get_mut(window)
            .ok_or(Error::UnknownWindow(window))?;
        self.cache.acquire(record, &mut self.backend)
    }

    /// Detach the window's texture from sampling; the binding stays
    /// valid for the next acquire.
    pub fn release_texture(&mut self, window: WindowId) -> Result<()> {
        let record = self
            .registry
            .get(window)
            .ok_or(Error::UnknownWindow(window))?;
        self.cache.release(record, &mut self.backend);
        Ok(())
    }

    /// Drop the window's binding entirely; the next acquire re-derives
    /// both handles.
    pub fn invalidate_texture(&mut self, window: WindowId) -> Result<()> {
        let record = self
            .registry
            .get_mut(window)
            .ok_or(Error::UnknownWindow(window))?;
        self.cache.invalidate(record, &mut self.backend);
        Ok(())
    }

    /// Release every binding while the backend is still alive. Call
    /// before tearing the connection down.
    pub fn shutdown(&mut self) {
        for record in self.registry.iter_mut() {
            self.cache.invalidate(record, &mut self.backend);
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
