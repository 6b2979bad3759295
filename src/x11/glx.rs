//! GLX interop for texture-from-pixmap
//!
//! Owns the GLX side of the backend: a rendering context on the overlay
//! window, the FBConfig list the binding cache scans as pixel formats,
//! and the GLX pixmap / TexImage operations that connect an X pixmap to
//! a GL texture.

use std::ffi::CString;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};
use x11_dl::glx::{self, Glx};
use x11_dl::xlib::{self, Xlib};

use crate::backend::PixelFormat;

// GLX_EXT_texture_from_pixmap attributes.
const GLX_BIND_TO_TEXTURE_RGB_EXT: i32 = 0x20D0;
const GLX_BIND_TO_TEXTURE_RGBA_EXT: i32 = 0x20D1;
const GLX_BIND_TO_TEXTURE_TARGETS_EXT: i32 = 0x20D3;
const GLX_TEXTURE_2D_BIT_EXT: i32 = 0x0002;
const GLX_TEXTURE_FORMAT_EXT: i32 = 0x20D5;
const GLX_TEXTURE_TARGET_EXT: i32 = 0x20D6;
const GLX_TEXTURE_FORMAT_RGB_EXT: i32 = 0x20D9;
const GLX_TEXTURE_FORMAT_RGBA_EXT: i32 = 0x20DA;
const GLX_TEXTURE_2D_EXT: i32 = 0x20DC;
const GLX_FRONT_LEFT_EXT: i32 = 0x20DE;
const GLX_SAMPLES: i32 = 100001;

// X errors are recorded, not fatal: BadPixmap/BadMatch are expected while
// a window is being resized or destroyed under us.
static X_ERROR_OCCURRED: AtomicBool = AtomicBool::new(false);
static X_ERROR_CODE: AtomicI32 = AtomicI32::new(0);

unsafe extern "C" fn x_error_handler(
    _display: *mut xlib::Display,
    event: *mut xlib::XErrorEvent,
) -> i32 {
    if !event.is_null() {
        let (error_code, request_code, minor_code) =
            unsafe { ((*event).error_code, (*event).request_code, (*event).minor_code) };
        X_ERROR_CODE.store(error_code as i32, Ordering::Relaxed);
        X_ERROR_OCCURRED.store(true, Ordering::Relaxed);
        warn!(
            "X error: code={}, request={}, minor={}",
            error_code, request_code, minor_code
        );
    }
    0
}

type BindTexImageFn = unsafe extern "C" fn(*mut xlib::Display, u64, i32, *const i32);
type ReleaseTexImageFn = unsafe extern "C" fn(*mut xlib::Display, u64, i32);

pub struct GlxInterop {
    glx: Glx,
    xlib: Xlib,
    display: *mut xlib::Display,
    context: glx::GLXContext,
    overlay: u64,
    /// FBConfig behind each entry of `formats`, same index.
    format_configs: Vec<glx::GLXFBConfig>,
    formats: Vec<PixelFormat>,
    bind_tex_image: BindTexImageFn,
    release_tex_image: ReleaseTexImageFn,
}

impl GlxInterop {
    /// Open a GLX-side display, create a context on the overlay window,
    /// and enumerate bindable FBConfigs.
    pub fn new(display_name: Option<&str>, overlay: u32) -> Result<Self> {
        let xlib = Xlib::open().context("Failed to load libX11")?;
        let glx = Glx::open().context("Failed to load libGLX")?;

        let display_cstr = display_name.map(CString::new).transpose()?;
        let display = unsafe {
            (xlib.XOpenDisplay)(
                display_cstr
                    .as_ref()
                    .map_or(ptr::null(), |name| name.as_ptr()),
            )
        };
        if display.is_null() {
            return Err(anyhow!("Failed to open X display for GLX"));
        }
        unsafe {
            (xlib.XSetErrorHandler)(Some(x_error_handler));
        }

        let screen = unsafe { (xlib.XDefaultScreen)(display) };

        let mut major = 0;
        let mut minor = 0;
        unsafe {
            (glx.glXQueryVersion)(display, &mut major, &mut minor);
        }
        info!("GLX version {}.{}", major, minor);

        let extensions = unsafe {
            let s = (glx.glXQueryExtensionsString)(display, screen);
            if s.is_null() {
                ""
            } else {
                std::ffi::CStr::from_ptr(s).to_str().unwrap_or("")
            }
        };
        if !extensions.contains("GLX_EXT_texture_from_pixmap") {
            unsafe { (xlib.XCloseDisplay)(display) };
            return Err(anyhow!("GLX_EXT_texture_from_pixmap not supported"));
        }

        let mut config_count = 0;
        let configs_ptr =
            unsafe { (glx.glXGetFBConfigs)(display, screen, &mut config_count) };
        if configs_ptr.is_null() || config_count == 0 {
            unsafe { (xlib.XCloseDisplay)(display) };
            return Err(anyhow!("glXGetFBConfigs returned nothing"));
        }

        // Pre-extract the attributes the binding cache scans. A config
        // bindable both ways yields an RGBA entry and an RGB entry.
        let mut format_configs = Vec::new();
        let mut formats = Vec::new();
        for i in 0..config_count as usize {
            let config = unsafe { *configs_ptr.add(i) };
            let attrib = |name: i32| -> i32 {
                let mut value = 0;
                unsafe {
                    (glx.glXGetFBConfigAttrib)(display, config, name, &mut value);
                }
                value
            };
            let samples = attrib(GLX_SAMPLES).clamp(0, u8::MAX as i32) as u8;
            let texture_2d = attrib(GLX_BIND_TO_TEXTURE_TARGETS_EXT) & GLX_TEXTURE_2D_BIT_EXT != 0;
            for (bindable, alpha) in [
                (attrib(GLX_BIND_TO_TEXTURE_RGBA_EXT) != 0, true),
                (attrib(GLX_BIND_TO_TEXTURE_RGB_EXT) != 0, false),
            ] {
                if bindable {
                    formats.push(PixelFormat {
                        id: formats.len() as u64,
                        alpha,
                        samples,
                        texture_2d,
                    });
                    format_configs.push(config);
                }
            }
        }
        info!(
            "Enumerated {} bindable pixel formats from {} FBConfigs",
            formats.len(),
            config_count
        );

        // Context config: prefer the FBConfig matching the overlay's
        // visual so glXMakeCurrent on the overlay works.
        let mut overlay_visual_id = 0u64;
        unsafe {
            let mut attrs = std::mem::zeroed::<xlib::XWindowAttributes>();
            if (xlib.XGetWindowAttributes)(display, overlay as u64, &mut attrs) != 0
                && !attrs.visual.is_null()
            {
                overlay_visual_id = (*attrs.visual).visualid;
            }
        }
        let mut context_config = None;
        for i in 0..config_count as usize {
            let config = unsafe { *configs_ptr.add(i) };
            let vinfo = unsafe { (glx.glXGetVisualFromFBConfig)(display, config) };
            if vinfo.is_null() {
                continue;
            }
            let visual_id = unsafe { (*vinfo).visualid };
            unsafe { (xlib.XFree)(vinfo as *mut _) };
            if visual_id == overlay_visual_id {
                context_config = Some(config);
                break;
            }
        }
        let context_config = match context_config {
            Some(config) => config,
            None => {
                warn!(
                    "No FBConfig matches overlay visual 0x{:x}, using the first one",
                    overlay_visual_id
                );
                unsafe { *configs_ptr }
            }
        };
        unsafe { (xlib.XFree)(configs_ptr as *mut _) };

        let context = unsafe {
            (glx.glXCreateNewContext)(
                display,
                context_config,
                glx::GLX_RGBA_TYPE as i32,
                ptr::null_mut(),
                1,
            )
        };
        if context.is_null() {
            unsafe { (xlib.XCloseDisplay)(display) };
            return Err(anyhow!("glXCreateNewContext failed"));
        }

        let made_current = unsafe { (glx.glXMakeCurrent)(display, overlay as u64, context) };
        if made_current == 0 {
            unsafe {
                (glx.glXDestroyContext)(display, context);
                (xlib.XCloseDisplay)(display);
            }
            return Err(anyhow!("glXMakeCurrent failed on overlay window {}", overlay));
        }

        gl::load_with(|symbol| {
            let symbol = CString::new(symbol).unwrap();
            unsafe {
                match (glx.glXGetProcAddress)(symbol.as_ptr() as *const _) {
                    Some(f) => f as *const _,
                    None => ptr::null(),
                }
            }
        });

        let bind_tex_image = unsafe {
            let sym = CString::new("glXBindTexImageEXT").unwrap();
            let f = (glx.glXGetProcAddress)(sym.as_ptr() as *const _)
                .context("glXBindTexImageEXT not found")?;
            std::mem::transmute::<unsafe extern "C" fn(), BindTexImageFn>(f)
        };
        let release_tex_image = unsafe {
            let sym = CString::new("glXReleaseTexImageEXT").unwrap();
            let f = (glx.glXGetProcAddress)(sym.as_ptr() as *const _)
                .context("glXReleaseTexImageEXT not found")?;
            std::mem::transmute::<unsafe extern "C" fn(), ReleaseTexImageFn>(f)
        };

        info!("GLX context ready on overlay {} (TFP enabled)", overlay);

        Ok(Self {
            glx,
            xlib,
            display,
            context,
            overlay: overlay as u64,
            format_configs,
            formats,
            bind_tex_image,
            release_tex_image,
        })
    }

    pub fn formats(&self) -> &[PixelFormat] {
        &self.formats
    }

    /// Create a GLX pixmap over an X pixmap, binding RGBA or RGB per the
    /// chosen format. X errors (a window resized or destroyed under us)
    /// surface as a checked failure, not a crash.
    pub fn create_pixmap(&self, pixmap: u32, format: &PixelFormat) -> Result<u64> {
        let config = self
            .format_configs
            .get(format.id as usize)
            .copied()
            .with_context(|| format!("Unknown pixel format id {}", format.id))?;
        let texture_format = if format.alpha {
            GLX_TEXTURE_FORMAT_RGBA_EXT
        } else {
            GLX_TEXTURE_FORMAT_RGB_EXT
        };
        let attribs = [
            GLX_TEXTURE_FORMAT_EXT,
            texture_format,
            GLX_TEXTURE_TARGET_EXT,
            GLX_TEXTURE_2D_EXT,
            0,
        ];

        unsafe { (self.xlib.XSync)(self.display, 0) };
        X_ERROR_OCCURRED.store(false, Ordering::Relaxed);
        X_ERROR_CODE.store(0, Ordering::Relaxed);

        let glx_pixmap = unsafe {
            (self.glx.glXCreatePixmap)(self.display, config, pixmap as u64, attribs.as_ptr())
        };
        unsafe { (self.xlib.XSync)(self.display, 0) };

        if glx_pixmap == 0 || X_ERROR_OCCURRED.load(Ordering::Relaxed) {
            let code = X_ERROR_CODE.load(Ordering::Relaxed);
            X_ERROR_OCCURRED.store(false, Ordering::Relaxed);
            X_ERROR_CODE.store(0, Ordering::Relaxed);
            return Err(anyhow!(
                "glXCreatePixmap failed for pixmap {} (X error code {})",
                pixmap,
                code
            ));
        }
        debug!("Created GLX pixmap {} over X pixmap {}", glx_pixmap, pixmap);
        Ok(glx_pixmap)
    }

    pub fn destroy_pixmap(&self, glx_pixmap: u64) {
        unsafe {
            (self.glx.glXDestroyPixmap)(self.display, glx_pixmap);
        }
    }

    /// Bind the GLX pixmap's contents to the currently bound GL texture.
    pub fn bind_tex_image(&self, glx_pixmap: u64) {
        unsafe {
            // Let the server finish drawing into the pixmap before GL
            // samples it.
            (self.glx.glXWaitX)();
            (self.bind_tex_image)(self.display, glx_pixmap, GLX_FRONT_LEFT_EXT, ptr::null());
        }
    }

    /// Detach the GLX pixmap from the texture; resources stay valid.
    pub fn release_tex_image(&self, glx_pixmap: u64) {
        unsafe {
            (self.release_tex_image)(self.display, glx_pixmap, GLX_FRONT_LEFT_EXT);
        }
    }

    pub fn make_current(&self) -> Result<()> {
        let ok = unsafe { (self.glx.glXMakeCurrent)(self.display, self.overlay, self.context) };
        if ok == 0 {
            return Err(anyhow!("glXMakeCurrent failed"));
        }
        Ok(())
    }

    pub fn swap_buffers(&self) {
        unsafe {
            (self.glx.glXSwapBuffers)(self.display, self.overlay);
        }
    }
}

impl Drop for GlxInterop {
    fn drop(&mut self) {
        unsafe {
            (self.glx.glXMakeCurrent)(self.display, 0, ptr::null_mut());
            (self.glx.glXDestroyContext)(self.display, self.context);
            (self.xlib.XCloseDisplay)(self.display);
        }
    }
}
