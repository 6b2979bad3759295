//! Stacking Event Processor
//!
//! Structural notifications from the windowing server, and the state
//! machine that applies them to the window registry one at a time, in
//! arrival order. Every lookup is checked: a notification about a window
//! the mirror never saw a Create for is reported and skipped, never
//! dereferenced blindly.

use tracing::trace;

use crate::backend::TextureBackend;
use crate::binding::TextureCache;
use crate::error::{Error, Result};
use crate::registry::{Place, Position, WindowId, WindowRegistry};

/// One structural notification, already translated from the server's
/// wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A window was created under `parent`; it enters the registry at the
    /// top of the stack, unbound.
    Create { window: WindowId, parent: WindowId },
    /// A window moved to a new parent container.
    Reparent { window: WindowId, parent: WindowId },
    /// A window was restacked directly above `above`; `SIBLING_NONE`
    /// reports it at the bottom of the stack.
    Configure { window: WindowId, above: WindowId },
    /// A window circulated to the top or bottom of its sibling group.
    Circulate { window: WindowId, place: Place },
    /// A window became viewable. No registry change: the texture binding
    /// is created lazily on the first render request.
    Map { window: WindowId },
    /// A window stopped being viewable; its binding is invalidated.
    Unmap { window: WindowId },
    /// A window was destroyed; its binding is invalidated and the record
    /// removed.
    Destroy { window: WindowId },
}

impl Notification {
    /// The window the notification is about.
    pub fn window(&self) -> WindowId {
        match *self {
            Notification::Create { window, .. }
            | Notification::Reparent { window, .. }
            | Notification::Configure { window, .. }
            | Notification::Circulate { window, .. }
            | Notification::Map { window }
            | Notification::Unmap { window }
            | Notification::Destroy { window } => window,
        }
    }
}

/// Applies notifications to the registry and keeps running counts for
/// diagnostics.
#[derive(Debug, Default)]
pub struct EventProcessor {
    applied: u64,
    skipped: u64,
}

impl EventProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications applied since creation.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Notifications skipped as consistency faults.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Apply one notification. On error the registry is unchanged and the
    /// caller may continue with the next notification.
    pub fn apply<B: TextureBackend>(
        &mut self,
        registry: &mut WindowRegistry,
        cache: &mut TextureCache,
        backend: &mut B,
        notification: Notification,
    ) -> Result<()> {
        let result = self.dispatch(registry, cache, backend, notification);
        match result {
            Ok(()) => self.applied += 1,
            Err(_) => self.skipped += 1,
        }
        result
    }

    fn dispatch<B: TextureBackend>(
        &mut self,
        registry: &mut WindowRegistry,
        cache: &mut TextureCache,
        backend: &mut B,
        notification: Notification,
    ) -> Result<()> {
        trace!("Applying {:?}", notification);
        match notification {
            Notification::Create { window, parent } => {
                registry.insert(window, parent, Position::Top)
            }
            Notification::Reparent { window, parent } => {
                registry.set_parent(window, parent).map_err(untracked)
            }
            Notification::Configure { window, above } => {
                registry.restack_above(window, above).map_err(untracked)
            }
            Notification::Circulate { window, place } => {
                registry.circulate(window, place).map_err(untracked)
            }
            Notification::Map { window } => {
                if registry.contains(window) {
                    Ok(())
                } else {
                    Err(Error::UnknownWindowReference(window))
                }
            }
            Notification::Unmap { window } => {
                let record = registry
                    .get_mut(window)
                    .ok_or(Error::UnknownWindowReference(window))?;
                cache.invalidate(record, backend);
                Ok(())
            }
            Notification::Destroy { window } => {
                let record = registry
                    .get_mut(window)
                    .ok_or(Error::UnknownWindowReference(window))?;
                // Resources are released before the record leaves the
                // registry; removal never frees by convention alone.
                cache.invalidate(record, backend);
                registry.remove(window).map(drop).map_err(untracked)
            }
        }
    }
}

/// In notification context an untracked window in the registry is a fault
/// of the notification stream, not of the caller.
fn untracked(err: Error) -> Error {
    match err {
        Error::UnknownWindow(window) => Error::UnknownWindowReference(window),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::registry::BindingState;

    struct Fixture {
        registry: WindowRegistry,
        cache: TextureCache,
        backend: FakeBackend,
        processor: EventProcessor,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: WindowRegistry::new(),
                cache: TextureCache::new(),
                backend: FakeBackend::new(),
                processor: EventProcessor::new(),
            }
        }

        fn apply(&mut self, notification: Notification) -> Result<()> {
            self.processor.apply(
                &mut self.registry,
                &mut self.cache,
                &mut self.backend,
                notification,
            )
        }

        fn order(&self) -> Vec<WindowId> {
            self.registry.iter().map(|r| r.window).collect()
        }
    }

    #[test]
    fn test_create_destroy_set_equality() {
        let mut fx = Fixture::new();
        for w in [5, 7, 9, 11] {
            fx.apply(Notification::Create { window: w, parent: 1 }).unwrap();
        }
        fx.apply(Notification::Destroy { window: 7 }).unwrap();
        fx.apply(Notification::Create { window: 13, parent: 1 }).unwrap();
        fx.apply(Notification::Destroy { window: 5 }).unwrap();

        assert_eq!(fx.order(), vec![9, 11, 13]);
    }

    #[test]
    fn test_create_duplicate_is_skipped() {
        let mut fx = Fixture::new();
        fx.apply(Notification::Create { window: 5, parent: 1 }).unwrap();
        let err = fx
            .apply(Notification::Create { window: 5, parent: 2 })
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateWindow(5)));
        assert_eq!(fx.registry.get(5).unwrap().parent, 1);
        assert_eq!(fx.processor.skipped(), 1);
    }

    #[test]
    fn test_configure_places_window_above_sibling() {
        let mut fx = Fixture::new();
        for w in [3, 5, 7] {
            fx.apply(Notification::Create { window: w, parent: 1 }).unwrap();
        }
        fx.apply(Notification::Configure { window: 3, above: 5 }).unwrap();
        assert_eq!(fx.order(), vec![5, 3, 7]);
    }

    #[test]
    fn test_configure_unknown_anchor_reports_and_skips() {
        let mut fx = Fixture::new();
        fx.apply(Notification::Create { window: 7, parent: 1 }).unwrap();
        let err = fx
            .apply(Notification::Configure { window: 7, above: 3 })
            .unwrap_err();
        assert!(matches!(err, Error::UnknownWindowReference(3)));
        assert_eq!(fx.order(), vec![7]);
    }

    #[test]
    fn test_untracked_window_reports_and_skips() {
        let mut fx = Fixture::new();
        fx.apply(Notification::Create { window: 5, parent: 1 }).unwrap();

        for notification in [
            Notification::Reparent { window: 9, parent: 2 },
            Notification::Configure { window: 9, above: 5 },
            Notification::Circulate { window: 9, place: Place::Top },
            Notification::Map { window: 9 },
            Notification::Unmap { window: 9 },
            Notification::Destroy { window: 9 },
        ] {
            let err = fx.apply(notification).unwrap_err();
            assert!(matches!(err, Error::UnknownWindowReference(9)));
        }
        assert_eq!(fx.order(), vec![5]);
        assert_eq!(fx.processor.skipped(), 6);
        assert_eq!(fx.processor.applied(), 1);
    }

    #[test]
    fn test_map_leaves_record_unbound() {
        let mut fx = Fixture::new();
        fx.apply(Notification::Create { window: 5, parent: 1 }).unwrap();
        fx.apply(Notification::Map { window: 5 }).unwrap();
        assert!(!fx.registry.get(5).unwrap().binding.is_bound());
    }

    #[test]
    fn test_unmap_invalidates_binding() {
        let mut fx = Fixture::new();
        fx.apply(Notification::Create { window: 5, parent: 1 }).unwrap();

        let record = fx.registry.get_mut(5).unwrap();
        fx.cache.acquire(record, &mut fx.backend).unwrap();
        let binding = match fx.registry.get(5).unwrap().binding {
            BindingState::Bound(b) => b,
            BindingState::Unbound => unreachable!(),
        };

        fx.apply(Notification::Unmap { window: 5 }).unwrap();
        assert!(!fx.registry.get(5).unwrap().binding.is_bound());
        assert_eq!(fx.backend.destroy_count_texture(binding.texture), 1);
        assert_eq!(fx.backend.destroy_count_pixmap(binding.pixmap), 1);
    }

    #[test]
    fn test_destroy_while_bound_releases_exactly_once() {
        let mut fx = Fixture::new();
        fx.apply(Notification::Create { window: 5, parent: 1 }).unwrap();

        let record = fx.registry.get_mut(5).unwrap();
        fx.cache.acquire(record, &mut fx.backend).unwrap();
        let binding = match fx.registry.get(5).unwrap().binding {
            BindingState::Bound(b) => b,
            BindingState::Unbound => unreachable!(),
        };

        fx.apply(Notification::Destroy { window: 5 }).unwrap();
        assert!(fx.registry.get(5).is_none());
        assert_eq!(fx.backend.destroy_count_texture(binding.texture), 1);
        assert_eq!(fx.backend.destroy_count_pixmap(binding.pixmap), 1);
        assert!(fx.backend.live_pixmaps.is_empty());
        assert!(fx.backend.live_textures.is_empty());
    }

    #[test]
    fn test_reparent_regroups_circulate() {
        let mut fx = Fixture::new();
        for w in [3, 5, 7] {
            fx.apply(Notification::Create { window: w, parent: 1 }).unwrap();
        }
        fx.apply(Notification::Reparent { window: 5, parent: 2 }).unwrap();
        // 5 no longer has siblings, so circulating it changes nothing.
        fx.apply(Notification::Circulate { window: 5, place: Place::Top }).unwrap();
        assert_eq!(fx.order(), vec![3, 5, 7]);
        // 3 and 7 still share parent 1.
        fx.apply(Notification::Circulate { window: 3, place: Place::Top }).unwrap();
        assert_eq!(fx.order(), vec![5, 7, 3]);
    }
}
