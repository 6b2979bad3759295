//! stackmirror - mirror of an X server's window stacking order, with
//! lazy GLX texture-from-pixmap bindings
//!
//! The core keeps an ordered registry of windows in sync with the
//! server's structural notification stream (create/destroy/reparent/
//! restack/map/unmap) and binds each window's offscreen contents to a
//! GPU-sampleable texture on first render request, so a compositor can
//! draw arbitrary desktop windows as textured quads.
//!
//! The core is backend-agnostic: it consumes the capability traits in
//! [`backend`] and never touches the connection itself. [`x11`] provides
//! the live implementation over x11rb and GLX.

pub mod backend;
pub mod binding;
pub mod compositor;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod render;
pub mod x11;

pub use backend::{Backend, EventSource, PixelFormat, TextureBackend};
pub use binding::TextureCache;
pub use compositor::Compositor;
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventProcessor, Notification};
pub use registry::{
    Binding, BindingState, Place, PixmapId, Position, TextureId, WindowId, WindowRecord,
    WindowRegistry, SIBLING_NONE,
};
