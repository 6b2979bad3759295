//! Live X11 backend
//!
//! Connects to the X server, redirects the window tree for compositing,
//! acquires the composite overlay window, and implements the capability
//! traits the core consumes: structural event translation on one side,
//! pixmap naming and GLX texture binding on the other.

pub mod glx;

use std::collections::VecDeque;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::composite::{self, ConnectionExt as CompositeExt, Redirect};
use x11rb::protocol::shape::{ConnectionExt as ShapeExt, SK, SO};
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ClipOrdering, ConnectionExt as XprotoExt, EventMask,
    MapState, Place as XPlace,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::backend::{EventSource, PixelFormat, TextureBackend};
use crate::error::Result as CoreResult;
use crate::events::Notification;
use crate::registry::{Place, PixmapId, TextureId, WindowId};
use glx::GlxInterop;

/// Root-relative placement of a window, for the render loop.
#[derive(Debug, Clone, Copy)]
pub struct WindowAttributes {
    pub x: i32,
    pub y: i32,
    pub width: u16,
    pub height: u16,
    pub viewable: bool,
}

pub struct X11Backend {
    conn: RustConnection,
    root: WindowId,
    overlay: WindowId,
    screen_width: u16,
    screen_height: u16,
    redirect: Redirect,
    glx: GlxInterop,
    queue: VecDeque<Notification>,
}

impl X11Backend {
    /// Connect, redirect the root's subwindows, and claim the composite
    /// overlay window for output.
    pub fn new(display: Option<&str>, manual_redirect: bool) -> Result<Self> {
        let display_name = display
            .map(|s| s.to_string())
            .or_else(|| std::env::var("DISPLAY").ok())
            .unwrap_or_else(|| ":0".into());

        let (conn, screen_num) = RustConnection::connect(Some(&display_name))
            .context("Failed to connect to X server")?;
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let screen_width = screen.width_in_pixels;
        let screen_height = screen.height_in_pixels;

        conn.extension_information(composite::X11_EXTENSION_NAME)?
            .context("Composite extension not available")?;
        let version = conn
            .composite_query_version(0, 4)?
            .reply()
            .context("Failed to query Composite version")?;
        info!(
            "Composite extension {}.{}",
            version.major_version, version.minor_version
        );

        let redirect = if manual_redirect {
            Redirect::MANUAL
        } else {
            Redirect::AUTOMATIC
        };
        conn.composite_redirect_subwindows(root, redirect)
            .context("Failed to redirect subwindows")?;

        let overlay = conn
            .composite_get_overlay_window(root)?
            .reply()
            .context("Failed to get composite overlay window")?
            .overlay_win;
        info!("Using composite overlay window {}", overlay);

        // The overlay must not eat input: clear its input shape so events
        // pass through to the windows underneath.
        conn.shape_rectangles(
            SO::SET,
            SK::INPUT,
            ClipOrdering::UNSORTED,
            overlay,
            0,
            0,
            &[],
        )
        .context("Failed to clear overlay input shape")?;

        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::SUBSTRUCTURE_NOTIFY),
        )
        .context("Failed to select SubstructureNotify on root")?;
        conn.flush()?;

        let glx = GlxInterop::new(Some(&display_name), overlay)
            .context("Failed to initialize GLX interop")?;

        Ok(Self {
            conn,
            root,
            overlay,
            screen_width,
            screen_height,
            redirect,
            glx,
            queue: VecDeque::new(),
        })
    }

    pub fn overlay(&self) -> WindowId {
        self.overlay
    }

    pub fn screen_size(&self) -> (u16, u16) {
        (self.screen_width, self.screen_height)
    }

    pub fn glx(&self) -> &GlxInterop {
        &self.glx
    }

    pub fn swap_buffers(&self) {
        self.glx.swap_buffers();
    }

    pub fn make_current(&self) -> Result<()> {
        self.glx.make_current()
    }

    /// Root-relative geometry and viewability, queried fresh from the
    /// server. An error usually means the window went away.
    pub fn window_attributes(&self, window: WindowId) -> Result<WindowAttributes> {
        let coords = self
            .conn
            .translate_coordinates(window, self.root, 0, 0)?
            .reply()
            .with_context(|| format!("Failed to translate coordinates of window {}", window))?;
        let attrs = self
            .conn
            .get_window_attributes(window)?
            .reply()
            .with_context(|| format!("Failed to get attributes of window {}", window))?;
        let geom = self
            .conn
            .get_geometry(window)?
            .reply()
            .with_context(|| format!("Failed to get geometry of window {}", window))?;
        Ok(WindowAttributes {
            x: coords.dst_x as i32,
            y: coords.dst_y as i32,
            width: geom.width,
            height: geom.height,
            viewable: attrs.map_state == MapState::VIEWABLE,
        })
    }

    /// First atom of the window's `_NET_WM_WINDOW_TYPE`, if set.
    pub fn window_type(&self, window: WindowId) -> Result<Option<u32>> {
        self.window_property32(window, b"_NET_WM_WINDOW_TYPE", AtomEnum::ATOM)
    }

    /// The window's `_NET_WM_DESKTOP` (workspace), if set.
    pub fn window_desktop(&self, window: WindowId) -> Result<Option<u32>> {
        self.window_property32(window, b"_NET_WM_DESKTOP", AtomEnum::CARDINAL)
    }

    fn window_property32(
        &self,
        window: WindowId,
        name: &[u8],
        type_: AtomEnum,
    ) -> Result<Option<u32>> {
        let atom = self
            .conn
            .intern_atom(false, name)?
            .reply()
            .context("Failed to intern atom")?
            .atom;
        let reply = self
            .conn
            .get_property(false, window, atom, type_, 0, 1)?
            .reply()
            .with_context(|| format!("Failed to read property on window {}", window))?;
        Ok(reply.value32().and_then(|mut values| values.next()))
    }

    fn translate(event: &Event) -> Option<Notification> {
        match event {
            Event::CreateNotify(e) => Some(Notification::Create {
                window: e.window,
                parent: e.parent,
            }),
            Event::ReparentNotify(e) => Some(Notification::Reparent {
                window: e.window,
                parent: e.parent,
            }),
            Event::ConfigureNotify(e) => Some(Notification::Configure {
                window: e.window,
                above: e.above_sibling,
            }),
            Event::CirculateNotify(e) => Some(Notification::Circulate {
                window: e.window,
                place: if e.place == XPlace::ON_TOP {
                    Place::Top
                } else {
                    Place::Bottom
                },
            }),
            Event::MapNotify(e) => Some(Notification::Map { window: e.window }),
            Event::UnmapNotify(e) => Some(Notification::Unmap { window: e.window }),
            Event::DestroyNotify(e) => Some(Notification::Destroy { window: e.window }),
            Event::Error(e) => {
                warn!(
                    "X11 error event: code={}, major={}, minor={}",
                    e.error_code, e.major_opcode, e.minor_opcode
                );
                None
            }
            _ => None,
        }
    }
}

impl EventSource for X11Backend {
    fn pending_notifications(&mut self) -> CoreResult<usize> {
        // Pull everything the connection has queued right now; events that
        // arrive after this snapshot wait for the next pump.
        while let Some(event) = self
            .conn
            .poll_for_event()
            .context("Lost connection while polling for events")?
        {
            if let Some(notification) = Self::translate(&event) {
                self.queue.push_back(notification);
            }
        }
        Ok(self.queue.len())
    }

    fn next_notification(&mut self) -> CoreResult<Option<Notification>> {
        Ok(self.queue.pop_front())
    }
}

impl TextureBackend for X11Backend {
    fn root(&self) -> WindowId {
        self.root
    }

    fn enumerate_initial_children(&mut self) -> CoreResult<Vec<(WindowId, WindowId)>> {
        let reply = self
            .conn
            .query_tree(self.root)
            .context("Failed to query the window tree")?
            .reply()
            .context("Failed to query the window tree")?;
        // XQueryTree reports children bottom to top, matching the
        // registry's ordering convention.
        Ok(reply
            .children
            .iter()
            .map(|&child| (child, self.root))
            .collect())
    }

    fn window_depth(&mut self, window: WindowId) -> CoreResult<u8> {
        let geom = self
            .conn
            .get_geometry(window)
            .with_context(|| format!("Failed to get depth of window {}", window))?
            .reply()
            .with_context(|| format!("Failed to get depth of window {}", window))?;
        Ok(geom.depth)
    }

    fn pixel_formats(&mut self) -> CoreResult<Vec<PixelFormat>> {
        Ok(self.glx.formats().to_vec())
    }

    fn name_offscreen_pixmap(&mut self, window: WindowId) -> CoreResult<PixmapId> {
        let pixmap = self
            .conn
            .generate_id()
            .context("Failed to generate pixmap id")?;
        self.conn
            .composite_name_window_pixmap(window, pixmap)
            .with_context(|| format!("NameWindowPixmap failed for window {}", window))?
            .check()
            .with_context(|| format!("NameWindowPixmap failed for window {}", window))?;
        debug!("Named pixmap {} for window {}", pixmap, window);
        Ok(pixmap)
    }

    fn create_gpu_texture(
        &mut self,
        pixmap: PixmapId,
        format: &PixelFormat,
    ) -> CoreResult<TextureId> {
        Ok(self.glx.create_pixmap(pixmap, format)?)
    }

    fn release_gpu_texture(&mut self, texture: TextureId) {
        self.glx.release_tex_image(texture);
    }

    fn destroy_gpu_texture(&mut self, texture: TextureId) {
        self.glx.destroy_pixmap(texture);
    }

    fn destroy_offscreen_pixmap(&mut self, pixmap: PixmapId) {
        if let Err(err) = self.conn.free_pixmap(pixmap) {
            warn!("Failed to free pixmap {}: {}", pixmap, err);
        }
    }
}

impl Drop for X11Backend {
    fn drop(&mut self) {
        // Give the windows back to the server before disconnecting.
        let _ = self
            .conn
            .composite_unredirect_subwindows(self.root, self.redirect);
        let _ = self.conn.flush();
    }
}
